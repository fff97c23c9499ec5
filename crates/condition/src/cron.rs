//! Five-field cron schedules.
//!
//! Supports `*`, single values, `a-b` ranges, `/n` steps, comma lists,
//! month and weekday names, and the `@hourly`/`@daily`/`@weekly`/`@monthly`/
//! `@yearly` shorthands. When neither day-of-month nor day-of-week starts
//! with `*`, a day matches if either does; otherwise it must match both.

use crate::error::EvaluationError;
use chrono::{Datelike, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use tickwise_core::Time;

/// How far back to search for a tick. Covers a Feb 29 yearly schedule.
const MAX_LOOKBACK_DAYS: usize = 366 * 8;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    /// Sunday = 0
    days_of_week: BTreeSet<u32>,
    /// Either day field matching is enough
    day_or: bool,
}

struct Field {
    values: BTreeSet<u32>,
    /// Starts with `*`, stepped or not
    wildcard: bool,
}

fn invalid(expression: &str, reason: impl Into<String>) -> EvaluationError {
    EvaluationError::InvalidCron {
        schedule: expression.to_string(),
        reason: reason.into(),
    }
}

fn parse_value(s: &str, min: u32, names: &[&str]) -> Result<u32, String> {
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    let lower = s.to_ascii_lowercase();
    names
        .iter()
        .position(|name| *name == lower)
        .map(|i| i as u32 + min)
        .ok_or_else(|| format!("unrecognized value {s:?}"))
}

fn parse_field(field: &str, min: u32, max: u32, names: &[&str]) -> Result<Field, String> {
    let mut values = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("bad step in {part:?}"))?;
                if step == 0 {
                    return Err(format!("zero step in {part:?}"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, names)?, parse_value(b, min, names)?)
        } else {
            let v = parse_value(range, min, names)?;
            (v, if step.is_some() { max } else { v })
        };
        if start < min || end > max || start > end {
            return Err(format!("{part:?} out of range {min}-{max}"));
        }

        let mut v = start;
        while v <= end {
            values.insert(v);
            v += step.unwrap_or(1);
        }
    }
    Ok(Field {
        values,
        wildcard: field.starts_with('*'),
    })
}

impl CronSchedule {
    /// Parse a five-field expression or a `@` shorthand.
    pub fn parse(expression: &str) -> Result<Self, EvaluationError> {
        let expanded = match expression.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(invalid(expression, format!("expected 5 fields, got {}", fields.len())));
        };

        let minutes = parse_field(minute, 0, 59, &[]).map_err(|e| invalid(expression, e))?;
        let hours = parse_field(hour, 0, 23, &[]).map_err(|e| invalid(expression, e))?;
        let dom = parse_field(dom, 1, 31, &[]).map_err(|e| invalid(expression, e))?;
        let months = parse_field(month, 1, 12, &MONTH_NAMES).map_err(|e| invalid(expression, e))?;
        let mut dow = parse_field(dow, 0, 7, &WEEKDAY_NAMES).map_err(|e| invalid(expression, e))?;
        if dow.values.remove(&7) {
            dow.values.insert(0);
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes: minutes.values,
            hours: hours.values,
            days_of_month: dom.values,
            months: months.values,
            days_of_week: dow.values,
            day_or: !dom.wildcard && !dow.wildcard,
        })
    }

    /// The expression this schedule was parsed from.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&date.day());
        let dow = self.days_of_week.contains(&date.weekday().num_days_from_sunday());
        if self.day_or {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// The latest tick at or before `at`, in the given timezone.
    ///
    /// Local times skipped by a DST transition have no tick; local times
    /// repeated by one tick once, at their later instant.
    pub fn previous_tick(&self, at: Time, tz: Tz) -> Option<Time> {
        let mut date = at.with_timezone(&tz).date_naive();
        for _ in 0..MAX_LOOKBACK_DAYS {
            if self.matches_date(date) {
                for hour in self.hours.iter().rev() {
                    for minute in self.minutes.iter().rev() {
                        let Some(naive) = date.and_hms_opt(*hour, *minute, 0) else {
                            continue;
                        };
                        let instant = match tz.from_local_datetime(&naive) {
                            LocalResult::Single(t) => t,
                            LocalResult::Ambiguous(_, latest) => latest,
                            LocalResult::None => continue,
                        };
                        let tick = instant.with_timezone(&Utc);
                        if tick <= at {
                            return Some(tick);
                        }
                    }
                }
            }
            date = date.pred_opt()?;
        }
        None
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, EvaluationError> {
    name.parse::<Tz>().map_err(|e| EvaluationError::InvalidCron {
        schedule: name.to_string(),
        reason: format!("unknown timezone: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> Time {
        s.parse().unwrap()
    }

    #[test]
    fn test_daily_midnight() {
        let cron = CronSchedule::parse("0 0 * * *").unwrap();
        assert_eq!(
            cron.previous_tick(at("2024-01-02T01:00:00Z"), Tz::UTC),
            Some(at("2024-01-02T00:00:00Z"))
        );
        assert_eq!(
            cron.previous_tick(at("2024-01-02T00:00:00Z"), Tz::UTC),
            Some(at("2024-01-02T00:00:00Z"))
        );
    }

    #[test]
    fn test_steps_lists_and_names() {
        let cron = CronSchedule::parse("*/15 9-17 * jan-mar mon,wed").unwrap();
        // 2024-01-10 is a Wednesday.
        assert_eq!(
            cron.previous_tick(at("2024-01-10T09:44:00Z"), Tz::UTC),
            Some(at("2024-01-10T09:30:00Z"))
        );
        assert_eq!(
            cron.previous_tick(at("2024-01-10T08:00:00Z"), Tz::UTC),
            Some(at("2024-01-08T17:45:00Z"))
        );
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        let cron = CronSchedule::parse("0 0 1 * 1").unwrap();
        assert_eq!(
            cron.previous_tick(at("2024-01-10T12:00:00Z"), Tz::UTC),
            Some(at("2024-01-08T00:00:00Z"))
        );
    }

    #[test]
    fn test_stepped_day_of_week_is_honored() {
        let cron = CronSchedule::parse("0 0 * * */2").unwrap();
        // 2024-01-08 is a Monday; the schedule runs Sun, Tue, Thu, Sat.
        assert_eq!(
            cron.previous_tick(at("2024-01-08T12:00:00Z"), Tz::UTC),
            Some(at("2024-01-07T00:00:00Z"))
        );

        // A wildcard day-of-month makes both day fields apply.
        let cron = CronSchedule::parse("0 0 */2 * 1").unwrap();
        assert_eq!(
            cron.previous_tick(at("2024-01-10T12:00:00Z"), Tz::UTC),
            Some(at("2024-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_timezone_and_dst_gap() {
        let tz = parse_timezone("America/New_York").unwrap();
        let cron = CronSchedule::parse("30 2 * * *").unwrap();
        // 02:30 local did not exist on 2024-03-10.
        assert_eq!(
            cron.previous_tick(at("2024-03-10T12:00:00Z"), tz),
            Some(at("2024-03-09T07:30:00Z"))
        );
    }

    #[test]
    fn test_shorthands_and_sunday_alias() {
        assert_eq!(
            CronSchedule::parse("@weekly").unwrap().days_of_week,
            CronSchedule::parse("0 0 * * 7").unwrap().days_of_week
        );
        assert!(CronSchedule::parse("@daily").is_ok());
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronSchedule::parse("0 0 * *").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("0 0 * foo *").is_err());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
