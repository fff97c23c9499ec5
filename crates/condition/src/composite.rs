//! Combinators over child conditions.

use crate::context::AutomationContext;
use crate::evaluate::{evaluate, result_for};
use crate::{AutomationResult, EvaluationError};
use tickwise_core::{AutomationCondition, Cursor};

type Result<T> = std::result::Result<T, EvaluationError>;

/// Children see the intersection so far; stops once it is empty.
pub(crate) async fn and<'a>(
    ctx: &AutomationContext<'a>,
    operands: &'a [AutomationCondition],
) -> Result<AutomationResult> {
    let mut true_subset = ctx.candidate_subset().clone();
    let mut child_results = Vec::with_capacity(operands.len());
    for operand in operands {
        if true_subset.is_empty() {
            break;
        }
        let child = evaluate(ctx.for_child(operand, true_subset.clone())).await?;
        true_subset = true_subset.intersect(&child.true_subset)?;
        child_results.push(child);
    }
    Ok(result_for(ctx, true_subset, None, child_results))
}

pub(crate) async fn or<'a>(
    ctx: &AutomationContext<'a>,
    operands: &'a [AutomationCondition],
) -> Result<AutomationResult> {
    let mut true_subset = ctx.get_empty_subset()?;
    let mut child_results = Vec::with_capacity(operands.len());
    for operand in operands {
        let child = evaluate(ctx.for_child(operand, ctx.candidate_subset().clone())).await?;
        true_subset = true_subset.union(&child.true_subset)?;
        child_results.push(child);
    }
    Ok(result_for(ctx, true_subset, None, child_results))
}

pub(crate) async fn not<'a>(ctx: &AutomationContext<'a>, operand: &'a AutomationCondition) -> Result<AutomationResult> {
    let child = evaluate(ctx.for_child(operand, ctx.candidate_subset().clone())).await?;
    let true_subset = ctx.candidate_subset().subtract(&child.true_subset)?;
    Ok(result_for(ctx, true_subset, None, vec![child]))
}

/// `state = (previous ∪ trigger) − reset`, both children over the full subset.
pub(crate) async fn since<'a>(
    ctx: &AutomationContext<'a>,
    trigger: &'a AutomationCondition,
    reset: &'a AutomationCondition,
) -> Result<AutomationResult> {
    let full = ctx.get_full_subset()?;
    let trigger_result = evaluate(ctx.for_child(trigger, full.clone())).await?;
    let reset_result = evaluate(ctx.for_child(reset, full)).await?;

    let previous = match ctx.previous_subset()? {
        Some(previous) => previous,
        None => ctx.get_empty_subset()?,
    };
    let state = previous
        .union(&trigger_result.true_subset)?
        .subtract(&reset_result.true_subset)?;
    let true_subset = state.intersect(ctx.candidate_subset())?;

    Ok(result_for(
        ctx,
        true_subset,
        Some(Cursor::Subset { subset: state }),
        vec![trigger_result, reset_result],
    ))
}

/// True where the operand is true now but was not on the previous tick.
pub(crate) async fn newly_true<'a>(
    ctx: &AutomationContext<'a>,
    operand: &'a AutomationCondition,
) -> Result<AutomationResult> {
    let child = evaluate(ctx.for_child(operand, ctx.candidate_subset().clone())).await?;
    let true_subset = match ctx.previous_subset()? {
        Some(previous) => child.true_subset.subtract(&previous)?,
        None => child.true_subset.clone(),
    };
    let cursor = Cursor::Subset {
        subset: child.true_subset.clone(),
    };
    Ok(result_for(ctx, true_subset, Some(cursor), vec![child]))
}

/// Evaluate the operand once per parent, mapping subsets across each edge.
/// ANY unions the mapped results; ALL intersects them.
pub(crate) async fn deps_match<'a>(
    ctx: &AutomationContext<'a>,
    operand: &'a AutomationCondition,
    all: bool,
) -> Result<AutomationResult> {
    let view = ctx.view();
    let mut true_subset = if all {
        ctx.candidate_subset().clone()
    } else {
        ctx.get_empty_subset()?
    };

    let parents = view.graph().parents(ctx.key());
    let mut child_results = Vec::with_capacity(parents.len());
    for parent in parents {
        let parent_candidate = view.compute_parent_subset(parent, ctx.candidate_subset())?;
        let child = evaluate(ctx.for_dependency(operand, parent.clone(), parent_candidate)).await?;
        let matched = view.compute_child_subset(ctx.key(), &child.true_subset)?;
        true_subset = if all {
            true_subset.intersect(&matched)?
        } else {
            true_subset.union(&matched)?
        };
        child_results.push(child);
    }

    let true_subset = true_subset.intersect(ctx.candidate_subset())?;
    Ok(result_for(ctx, true_subset, None, child_results))
}

/// Transparent wrapper; the label only changes the reported name.
pub(crate) async fn named<'a>(ctx: &AutomationContext<'a>, operand: &'a AutomationCondition) -> Result<AutomationResult> {
    let child = evaluate(ctx.for_child(operand, ctx.candidate_subset().clone())).await?;
    let true_subset = child.true_subset.clone();
    Ok(result_for(ctx, true_subset, None, vec![child]))
}
