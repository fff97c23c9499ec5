//! Leaf conditions.

use crate::context::AutomationContext;
use crate::cron::{parse_timezone, CronSchedule};
use crate::evaluate::result_for;
use crate::{AutomationResult, EvaluationError};
use std::collections::{BTreeMap, BTreeSet};
use tickwise_core::{CheckStatus, Cursor, EntitySubset};
use tickwise_graph::ViewError;

type Result<T> = std::result::Result<T, EvaluationError>;

/// Result whose true subset is `subset` clipped to the candidate.
fn subset_result(ctx: &AutomationContext<'_>, subset: EntitySubset) -> Result<AutomationResult> {
    let true_subset = subset.intersect(ctx.candidate_subset())?;
    Ok(result_for(ctx, true_subset, None, Vec::new()))
}

pub(crate) fn code_version_changed(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let previous = match ctx.cursor() {
        Some(Cursor::CodeVersion { version: Some(v) }) => Some(v.as_str()),
        _ => None,
    };
    let node = ctx.view().graph().node(ctx.key()).map_err(ViewError::from)?;
    let current = node.code_version.clone();

    let true_subset = match previous {
        Some(prev) if Some(prev) != current.as_deref() => ctx.candidate_subset().clone(),
        _ => ctx.get_empty_subset()?,
    };
    Ok(result_for(ctx, true_subset, Some(Cursor::CodeVersion { version: current }), Vec::new()))
}

pub(crate) fn initial_evaluation(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let root = ctx.root();
    let is_initial = ctx.get_previous_requested_subset(root.key())?.is_none();
    let true_subset = if is_initial {
        ctx.candidate_subset().clone()
    } else {
        ctx.get_empty_subset()?
    };
    // The tree id is persisted but not read back.
    let cursor = Cursor::ConditionTreeId {
        id: root.condition().unique_id().clone(),
    };
    Ok(result_for(ctx, true_subset, Some(cursor), Vec::new()))
}

pub(crate) async fn missing(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let subset = ctx
        .view()
        .compute_missing_subset(ctx.key(), ctx.candidate_subset())
        .await?;
    subset_result(ctx, subset)
}

pub(crate) async fn run_in_progress(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let subset = ctx.view().compute_run_in_progress_subset(ctx.key()).await?;
    subset_result(ctx, subset)
}

pub(crate) async fn backfill_in_progress(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let subset = ctx.view().compute_backfill_in_progress_subset(ctx.key()).await?;
    subset_result(ctx, subset)
}

pub(crate) async fn execution_failed(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let subset = ctx.view().compute_execution_failed_subset(ctx.key()).await?;
    subset_result(ctx, subset)
}

pub(crate) fn will_be_requested(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let root_key = ctx.root().key();
    let requested = ctx.get_requested_this_tick(ctx.key());
    let subset = match requested {
        Some(subset) if ctx.view().graph().executable_in_same_run(root_key, ctx.key()) => subset,
        _ => ctx.get_empty_subset()?,
    };
    subset_result(ctx, subset)
}

pub(crate) fn newly_requested(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let subset = match ctx.get_previous_requested_subset(ctx.key())? {
        Some(subset) => subset,
        None => ctx.get_empty_subset()?,
    };
    subset_result(ctx, subset)
}

pub(crate) async fn executed_with_root_target(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let root_key = ctx.root().key();
    let is_root = ctx.key() == root_key;
    let subset = ctx
        .view()
        .compute_latest_run_matches_subset(ctx.candidate_subset(), |run| {
            // A self-dependency always targets a different partition.
            !is_root && run.targets(root_key)
        })
        .await?;
    subset_result(ctx, subset)
}

pub(crate) async fn executed_with_tags(
    ctx: &AutomationContext<'_>,
    tag_keys: Option<&BTreeSet<String>>,
    tag_values: Option<&BTreeMap<String, String>>,
) -> Result<AutomationResult> {
    let subset = ctx
        .view()
        .compute_latest_run_matches_subset(ctx.candidate_subset(), |run| {
            let has_keys = tag_keys.map_or(true, |keys| keys.iter().all(|k| run.tags.contains_key(k)));
            let has_values = tag_values.map_or(true, |values| {
                values.iter().all(|(k, v)| run.tags.get(k) == Some(v))
            });
            has_keys && has_values
        })
        .await?;
    subset_result(ctx, subset)
}

pub(crate) async fn newly_updated(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let Some(previous) = ctx.previous_temporal_context() else {
        return subset_result(ctx, ctx.get_empty_subset()?);
    };
    let subset = ctx
        .view()
        .compute_updated_since_temporal_context_subset(ctx.key(), &previous)
        .await?;
    subset_result(ctx, subset)
}

pub(crate) async fn data_version_changed(ctx: &AutomationContext<'_>) -> Result<AutomationResult> {
    let Some(previous) = ctx.previous_temporal_context() else {
        return subset_result(ctx, ctx.get_empty_subset()?);
    };
    let subset = ctx
        .view()
        .compute_data_version_changed_since_temporal_context_subset(ctx.key(), &previous)
        .await?;
    subset_result(ctx, subset)
}

pub(crate) fn cron_tick_passed(
    ctx: &AutomationContext<'_>,
    cron_schedule: &str,
    cron_timezone: &str,
) -> Result<AutomationResult> {
    let schedule = CronSchedule::parse(cron_schedule)?;
    let tz = parse_timezone(cron_timezone)?;
    let now = ctx.evaluation_time();

    let passed = match (ctx.previous_evaluation_time(), schedule.previous_tick(now, tz)) {
        (Some(previous), Some(tick)) => previous < tick && tick <= now,
        _ => false,
    };
    let subset = if passed {
        ctx.candidate_subset().clone()
    } else {
        ctx.get_empty_subset()?
    };
    subset_result(ctx, subset)
}

pub(crate) fn in_latest_time_window(
    ctx: &AutomationContext<'_>,
    lookback_seconds: Option<i64>,
) -> Result<AutomationResult> {
    // A non-positive lookback selects the latest window only; one past
    // chrono's range covers all history.
    let lookback = lookback_seconds
        .filter(|secs| *secs > 0)
        .map(|secs| chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX));
    let subset = ctx.view().compute_latest_time_window_subset(ctx.key(), lookback)?;
    subset_result(ctx, subset)
}

pub(crate) async fn check_result(ctx: &AutomationContext<'_>, passed: bool) -> Result<AutomationResult> {
    let status = if passed {
        CheckStatus::Succeeded
    } else {
        CheckStatus::Failed
    };
    let subset = ctx.view().compute_subset_with_status(ctx.key(), status).await?;
    subset_result(ctx, subset)
}
