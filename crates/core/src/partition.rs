//! Partition spaces of entities.

use crate::Time;
use chrono::{Duration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator between dimension keys of a multi-partition key.
pub const MULTI_KEY_SEPARATOR: &str = "|";

/// Upper bound on generated time windows per definition.
const MAX_TIME_WINDOWS: usize = 100_000;

/// Describes the partition space of a partitioned entity.
///
/// Unpartitioned entities carry no definition at all (`Option::None` at the
/// use site).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionsDefinition {
    /// Fixed list of keys.
    Static {
        /// Partition keys in declaration order
        keys: Vec<String>,
    },

    /// Regular time windows.
    TimeWindow(TimeWindowPartitions),

    /// Keys added at runtime and read from storage.
    Dynamic {
        /// Name under which the keys are stored
        name: String,
    },

    /// Product of several single-dimension definitions.
    Multi {
        /// Dimensions, ordered by name when keys are built
        dimensions: Vec<PartitionDimension>,
    },
}

/// One dimension of a multi-partitioned space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDimension {
    /// Dimension name
    pub name: String,

    /// Partitions along this dimension (never `Multi`)
    pub partitions: PartitionsDefinition,
}

/// How subsets of a partition space are represented internally.
///
/// Subsets are only combinable when their representations match; a stored
/// subset with a different representation than the entity's current one is
/// stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsetRepr {
    /// Present/absent
    Unpartitioned,
    /// Plain key set (static and dynamic spaces)
    Keys,
    /// Time-window keys
    TimeWindows,
    /// Multi-dimensional keys
    Multi,
}

impl SubsetRepr {
    /// Representation used for an entity with the given definition.
    pub fn of(partitions: Option<&PartitionsDefinition>) -> Self {
        match partitions {
            None => SubsetRepr::Unpartitioned,
            Some(PartitionsDefinition::Static { .. } | PartitionsDefinition::Dynamic { .. }) => {
                SubsetRepr::Keys
            }
            Some(PartitionsDefinition::TimeWindow(_)) => SubsetRepr::TimeWindows,
            Some(PartitionsDefinition::Multi { .. }) => SubsetRepr::Multi,
        }
    }
}

/// Lookup of dynamic partition keys by definition name.
pub type DynamicPartitions = BTreeMap<String, Vec<String>>;

/// A partitions definition that cannot produce well-formed keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionsError {
    /// A multi definition without dimensions
    #[error("multi partitions need at least one dimension")]
    EmptyMulti,

    /// A multi dimension that is itself multi-partitioned
    #[error("dimension {0:?} is multi-partitioned")]
    NestedMulti(String),

    /// Two dimensions share a name
    #[error("duplicate dimension {0:?}")]
    DuplicateDimension(String),
}

impl PartitionsDefinition {
    /// Convenience constructor for a static definition.
    pub fn static_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PartitionsDefinition::Static {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Convenience constructor for a daily definition.
    pub fn daily(start: Time) -> Self {
        PartitionsDefinition::TimeWindow(TimeWindowPartitions::new(start, Cadence::Daily))
    }

    /// Reject multi definitions that are empty, nested or have repeated
    /// dimension names.
    pub fn validate(&self) -> Result<(), PartitionsError> {
        let PartitionsDefinition::Multi { dimensions } = self else {
            return Ok(());
        };
        if dimensions.is_empty() {
            return Err(PartitionsError::EmptyMulti);
        }
        let mut seen = std::collections::BTreeSet::new();
        for dimension in dimensions {
            if matches!(dimension.partitions, PartitionsDefinition::Multi { .. }) {
                return Err(PartitionsError::NestedMulti(dimension.name.clone()));
            }
            if !seen.insert(dimension.name.as_str()) {
                return Err(PartitionsError::DuplicateDimension(dimension.name.clone()));
            }
        }
        Ok(())
    }

    /// Names of all dynamic definitions referenced by this definition.
    pub fn dynamic_names(&self) -> Vec<&str> {
        match self {
            PartitionsDefinition::Dynamic { name } => vec![name.as_str()],
            PartitionsDefinition::Multi { dimensions } => dimensions
                .iter()
                .flat_map(|d| d.partitions.dynamic_names())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// All partition keys that exist as of `now`, in definition order.
    pub fn partition_keys(&self, now: Time, dynamic: &DynamicPartitions) -> Vec<String> {
        match self {
            PartitionsDefinition::Static { keys } => keys.clone(),
            PartitionsDefinition::TimeWindow(windows) => windows
                .windows(now)
                .into_iter()
                .map(|w| windows.format_key(w.start))
                .collect(),
            PartitionsDefinition::Dynamic { name } => dynamic.get(name).cloned().unwrap_or_default(),
            PartitionsDefinition::Multi { dimensions } => {
                let mut combos: Vec<String> = vec![String::new()];
                for (i, dimension) in sorted_dimensions(dimensions).into_iter().enumerate() {
                    let keys = dimension.partitions.partition_keys(now, dynamic);
                    combos = combos
                        .iter()
                        .flat_map(|prefix| {
                            keys.iter().map(move |k| {
                                if i == 0 {
                                    k.clone()
                                } else {
                                    format!("{prefix}{MULTI_KEY_SEPARATOR}{k}")
                                }
                            })
                        })
                        .collect();
                }
                combos
            }
        }
    }

    /// Time dimension of this definition, with its position in a multi key.
    pub fn time_dimension(&self) -> Option<(Option<usize>, &TimeWindowPartitions)> {
        match self {
            PartitionsDefinition::TimeWindow(windows) => Some((None, windows)),
            PartitionsDefinition::Multi { dimensions } => sorted_dimensions(dimensions)
                .into_iter()
                .enumerate()
                .find_map(|(i, d)| match &d.partitions {
                    PartitionsDefinition::TimeWindow(windows) => Some((Some(i), windows)),
                    _ => None,
                }),
            _ => None,
        }
    }
}

fn sorted_dimensions(dimensions: &[PartitionDimension]) -> Vec<&PartitionDimension> {
    let mut sorted: Vec<&PartitionDimension> = dimensions.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted
}

/// Width of each time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// One hour
    Hourly,
    /// One day
    Daily,
    /// Seven days
    Weekly,
    /// One calendar month
    Monthly,
}

/// Regular, contiguous time windows starting at a fixed instant (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowPartitions {
    /// Start of the first window
    pub start: Time,

    /// Window width
    pub cadence: Cadence,

    /// Extra windows past the last complete one (may be negative)
    #[serde(default)]
    pub end_offset: i64,
}

/// A half-open `[start, end)` time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start
    pub start: Time,
    /// Exclusive end
    pub end: Time,
}

impl TimeWindowPartitions {
    /// Create a definition with no end offset.
    pub fn new(start: Time, cadence: Cadence) -> Self {
        Self {
            start,
            cadence,
            end_offset: 0,
        }
    }

    /// Format string for partition keys.
    pub fn key_format(&self) -> &'static str {
        match self.cadence {
            Cadence::Hourly => "%Y-%m-%d-%H:%M",
            _ => "%Y-%m-%d",
        }
    }

    /// Partition key of the window starting at `start`.
    pub fn format_key(&self, start: Time) -> String {
        start.format(self.key_format()).to_string()
    }

    /// Parse a partition key back to its window.
    pub fn window_for_key(&self, key: &str) -> Option<TimeWindow> {
        let naive = match self.cadence {
            Cadence::Hourly => chrono::NaiveDateTime::parse_from_str(key, self.key_format()).ok()?,
            _ => chrono::NaiveDate::parse_from_str(key, self.key_format())
                .ok()?
                .and_hms_opt(self.start.hour(), self.start.minute(), 0)?,
        };
        let start = Utc.from_utc_datetime(&naive);
        Some(TimeWindow {
            start,
            end: self.advance(start)?,
        })
    }

    fn advance(&self, start: Time) -> Option<Time> {
        match self.cadence {
            Cadence::Hourly => start.checked_add_signed(Duration::hours(1)),
            Cadence::Daily => start.checked_add_signed(Duration::days(1)),
            Cadence::Weekly => start.checked_add_signed(Duration::days(7)),
            Cadence::Monthly => start.checked_add_months(Months::new(1)),
        }
    }

    /// Windows that exist as of `now`: every window whose end is at or before
    /// `now`, adjusted by `end_offset`.
    pub fn windows(&self, now: Time) -> Vec<TimeWindow> {
        let mut windows = Vec::new();
        let mut start = self.start;
        while windows.len() < MAX_TIME_WINDOWS {
            let Some(end) = self.advance(start) else { break };
            if end > now {
                break;
            }
            windows.push(TimeWindow { start, end });
            start = end;
        }

        if self.end_offset < 0 {
            let drop = usize::try_from(-self.end_offset).unwrap_or(usize::MAX);
            windows.truncate(windows.len().saturating_sub(drop));
        } else {
            for _ in 0..self.end_offset {
                let Some(end) = self.advance(start) else { break };
                windows.push(TimeWindow { start, end });
                start = end;
            }
        }
        windows
    }

    /// The most recent existing window.
    pub fn last_window(&self, now: Time) -> Option<TimeWindow> {
        self.windows(now).pop()
    }
}
