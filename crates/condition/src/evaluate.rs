//! Recursive evaluation of condition trees.

use crate::context::{AutomationContext, RootContext};
use crate::result::{AutomationResult, EntityEvaluation};
use crate::{composite, operands as leaf, EvaluationError};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet};
use tickwise_core::{
    AutomationCondition, ConditionId, ConditionKind, Cursor, EntityCursor, EntityKey, EntitySubset,
};
use tickwise_graph::AssetGraph;
use tracing::debug;

/// Assemble the result of the node `ctx` points at.
pub(crate) fn result_for(
    ctx: &AutomationContext<'_>,
    true_subset: EntitySubset,
    cursor: Option<Cursor>,
    child_results: Vec<AutomationResult>,
) -> AutomationResult {
    AutomationResult {
        node_id: ctx.node_id().clone(),
        name: ctx.condition().name(),
        key: ctx.key().clone(),
        candidate_subset: ctx.candidate_subset().clone(),
        true_subset,
        cursor,
        child_results,
    }
}

/// Evaluate one node and, through it, its subtree.
pub fn evaluate<'a>(ctx: AutomationContext<'a>) -> BoxFuture<'a, Result<AutomationResult, EvaluationError>> {
    async move {
        let ctx = &ctx;
        let result = match ctx.condition().kind() {
            ConditionKind::CodeVersionChanged => leaf::code_version_changed(ctx)?,
            ConditionKind::InitialEvaluation => leaf::initial_evaluation(ctx)?,
            ConditionKind::Missing => leaf::missing(ctx).await?,
            ConditionKind::RunInProgress => leaf::run_in_progress(ctx).await?,
            ConditionKind::BackfillInProgress => leaf::backfill_in_progress(ctx).await?,
            ConditionKind::ExecutionFailed => leaf::execution_failed(ctx).await?,
            ConditionKind::WillBeRequested => leaf::will_be_requested(ctx)?,
            ConditionKind::NewlyRequested => leaf::newly_requested(ctx)?,
            ConditionKind::ExecutedWithRootTarget => leaf::executed_with_root_target(ctx).await?,
            ConditionKind::ExecutedWithTags {
                tag_keys,
                tag_values,
            } => leaf::executed_with_tags(ctx, tag_keys.as_ref(), tag_values.as_ref()).await?,
            ConditionKind::NewlyUpdated => leaf::newly_updated(ctx).await?,
            ConditionKind::DataVersionChanged => leaf::data_version_changed(ctx).await?,
            ConditionKind::CronTickPassed {
                cron_schedule,
                cron_timezone,
            } => leaf::cron_tick_passed(ctx, cron_schedule, cron_timezone)?,
            ConditionKind::InLatestTimeWindow { lookback_seconds } => {
                leaf::in_latest_time_window(ctx, *lookback_seconds)?
            }
            ConditionKind::CheckResult { passed } => leaf::check_result(ctx, *passed).await?,
            ConditionKind::And { operands } => composite::and(ctx, operands).await?,
            ConditionKind::Or { operands } => composite::or(ctx, operands).await?,
            ConditionKind::Not { operand } => composite::not(ctx, operand).await?,
            ConditionKind::Since { trigger, reset } => composite::since(ctx, trigger, reset).await?,
            ConditionKind::NewlyTrue { operand } => composite::newly_true(ctx, operand).await?,
            ConditionKind::AnyDepsMatch { operand } => composite::deps_match(ctx, operand, false).await?,
            ConditionKind::AllDepsMatch { operand } => composite::deps_match(ctx, operand, true).await?,
            ConditionKind::Named { operand, .. } => composite::named(ctx, operand).await?,
        };

        debug!(
            "{} on {}: {} of {} true",
            result.name,
            result.key,
            result.true_subset.size(),
            result.candidate_subset.size()
        );
        Ok(result)
    }
    .boxed()
}

/// Evaluate an entity's whole tree and build the cursor to persist for it.
///
/// Node cursors of the previous tick are carried over when the tree is
/// unchanged, so nodes skipped this tick keep their state.
pub async fn evaluate_entity(root: &RootContext) -> Result<EntityEvaluation, EvaluationError> {
    let result = evaluate(root.node_context()?).await?;
    let tree_id = root.condition().unique_id().clone();

    let mut node_cursors = match root.previous() {
        Some(previous) if previous.condition_tree_id == tree_id => {
            let mut live = BTreeSet::new();
            collect_node_ids(root.scope().view.graph(), root.key(), root.condition(), &tree_id, None, &mut live);
            previous
                .node_cursors
                .iter()
                .filter(|(id, _)| live.contains(*id))
                .map(|(id, cursor)| (id.clone(), cursor.clone()))
                .collect()
        }
        _ => BTreeMap::new(),
    };
    node_cursors.extend(result.cursors());

    let view = &root.scope().view;
    let cursor = EntityCursor {
        condition_tree_id: tree_id,
        previous_requested_subset: result.true_subset.clone(),
        effective_timestamp: view.evaluation_time(),
        temporal_context: view.temporal_context(),
        node_cursors,
    };
    Ok(EntityEvaluation { result, cursor })
}

/// Every cursor key the tree can write against the current graph. Mirrors the
/// id derivation of [`AutomationContext::for_child`] and
/// [`AutomationContext::for_dependency`].
fn collect_node_ids(
    graph: &AssetGraph,
    key: &EntityKey,
    condition: &AutomationCondition,
    node_id: &ConditionId,
    scope: Option<&ConditionId>,
    ids: &mut BTreeSet<ConditionId>,
) {
    ids.insert(node_id.clone());
    match condition.kind() {
        ConditionKind::AnyDepsMatch { operand } | ConditionKind::AllDepsMatch { operand } => {
            for parent in graph.parents(key) {
                let dep_scope = node_id.scoped(parent);
                let child_id = operand.unique_id().within(&dep_scope);
                collect_node_ids(graph, parent, operand, &child_id, Some(&dep_scope), ids);
            }
        }
        _ => {
            for child in condition.children() {
                let child_id = match scope {
                    None => child.unique_id().clone(),
                    Some(scope) => child.unique_id().within(scope),
                };
                collect_node_ids(graph, key, child, &child_id, scope, ids);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TickScope;
    use crate::requested::RequestedSubsets;
    use std::sync::Arc;
    use tickwise_core::{
        AssetEventKind, AssetKey, AutomationCondition as C, BackfillRecord, BackfillStatus,
        BackfillTarget, CheckStatus, EntityKey, PartitionsDefinition, RunRecord, RunStatus,
        SubsetRepr, TickCursor, Time,
    };
    use tickwise_graph::{AssetDep, AssetGraph, AssetGraphView, AssetNode, CheckNode, GraphDefinition};
    use tickwise_storage::MemoryEventStore;

    fn at(s: &str) -> Time {
        s.parse().unwrap()
    }

    fn key(s: &str) -> EntityKey {
        AssetKey::from(s).into()
    }

    fn daily() -> PartitionsDefinition {
        PartitionsDefinition::daily(at("2024-01-01T00:00:00Z"))
    }

    fn days(entity: &str, keys: &[&str]) -> EntitySubset {
        EntitySubset::from_keys(key(entity), SubsetRepr::TimeWindows, keys.iter().copied())
    }

    fn graph(assets: Vec<AssetNode>) -> Arc<AssetGraph> {
        let def = GraphDefinition {
            assets,
            checks: Vec::new(),
        };
        Arc::new(AssetGraph::build(def).unwrap())
    }

    /// Evaluates trees tick after tick, carrying cursors forward.
    struct Harness {
        graph: Arc<AssetGraph>,
        store: Arc<MemoryEventStore>,
        previous: TickCursor,
    }

    impl Harness {
        fn new(graph: Arc<AssetGraph>) -> Self {
            Self {
                graph,
                store: Arc::new(MemoryEventStore::new()),
                previous: TickCursor::default(),
            }
        }

        async fn tick_with(
            &mut self,
            entity: &str,
            condition: C,
            now: &str,
            published: Vec<EntitySubset>,
        ) -> EntityEvaluation {
            self.tick_entity(key(entity), condition, now, published).await
        }

        async fn tick_entity(
            &mut self,
            entity: EntityKey,
            condition: C,
            now: &str,
            published: Vec<EntitySubset>,
        ) -> EntityEvaluation {
            let view = AssetGraphView::new(Arc::clone(&self.graph), self.store.clone(), at(now))
                .await
                .unwrap();
            let requested = Arc::new(RequestedSubsets::new(self.graph.keys()));
            for subset in published {
                requested.publish(subset);
            }
            let scope = Arc::new(TickScope::new(Arc::new(view), requested, Arc::new(self.previous.clone())));
            let root = RootContext::new(entity.clone(), condition, scope);
            let evaluation = evaluate_entity(&root).await.unwrap();

            self.previous.evaluation_id += 1;
            self.previous.evaluation_time = Some(at(now));
            self.previous.entities.insert(entity, evaluation.cursor.clone());
            evaluation
        }

        async fn tick(&mut self, entity: &str, condition: C, now: &str) -> EntityEvaluation {
            self.tick_with(entity, condition, now, Vec::new()).await
        }
    }

    const NOW: &str = "2024-01-03T12:00:00Z";

    #[tokio::test]
    async fn test_and_or_not_over_leaves() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a").with_partitions(daily())]));
        h.store
            .record_materialization(&AssetKey::from("a"), Some("2024-01-01"))
            .await;

        let missing = h.tick("a", C::missing(), NOW).await;
        assert_eq!(missing.requested(), &days("a", &["2024-01-02"]));

        let latest = h.tick("a", C::in_latest_time_window(None), NOW).await;
        let both = h.tick("a", C::missing() & C::in_latest_time_window(None), NOW).await;
        assert_eq!(
            both.requested(),
            &missing.requested().intersect(latest.requested()).unwrap()
        );

        let not_missing = h.tick("a", !C::missing(), NOW).await;
        assert_eq!(not_missing.requested(), &days("a", &["2024-01-01"]));

        let either = h.tick("a", C::missing() | !C::missing(), NOW).await;
        assert_eq!(either.requested(), &days("a", &["2024-01-01", "2024-01-02"]));
    }

    #[tokio::test]
    async fn test_and_stops_once_empty() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        h.store.record_materialization(&AssetKey::from("a"), None).await;

        let eval = h.tick("a", C::missing() & C::newly_updated(), NOW).await;
        assert!(eval.requested().is_empty());
        assert_eq!(eval.result.child_results.len(), 1);
        assert_eq!(eval.result.evaluated_nodes(), 2);
    }

    #[tokio::test]
    async fn test_cron_tick_passed_between_ticks() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        let cron = || C::cron_tick_passed("0 0 * * *", "UTC");

        assert!(h.tick("a", cron(), "2024-01-01T23:00:00Z").await.requested().is_empty());
        assert!(!h.tick("a", cron(), "2024-01-02T00:30:00Z").await.requested().is_empty());
        assert!(h.tick("a", cron(), "2024-01-02T01:00:00Z").await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_cron_fails_evaluation() {
        let h = Harness::new(graph(vec![AssetNode::new("a")]));
        let view = AssetGraphView::new(Arc::clone(&h.graph), h.store.clone(), at(NOW))
            .await
            .unwrap();
        let scope = Arc::new(TickScope::new(
            Arc::new(view),
            Arc::new(RequestedSubsets::new(h.graph.keys())),
            Arc::new(TickCursor::default()),
        ));
        let root = RootContext::new(key("a"), C::cron_tick_passed("not a cron", "UTC"), scope);
        let err = evaluate_entity(&root).await.unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidCron { .. }));
    }

    #[tokio::test]
    async fn test_initial_evaluation_resets_on_partition_change() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        assert!(!h.tick("a", C::initial_evaluation(), NOW).await.requested().is_empty());
        // The first tick requested something, so the cursor holds a non-empty subset.
        assert!(h.tick("a", C::initial_evaluation(), NOW).await.requested().is_empty());

        h.graph = graph(vec![AssetNode::new("a").with_partitions(daily())]);
        let eval = h.tick("a", C::initial_evaluation(), NOW).await;
        assert_eq!(eval.requested(), &days("a", &["2024-01-01", "2024-01-02"]));
    }

    #[tokio::test]
    async fn test_data_version_changed_across_ticks() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        let a = AssetKey::from("a");

        assert!(h.tick("a", C::data_version_changed(), NOW).await.requested().is_empty());

        h.store.record_observation(&a, None, "v1").await;
        assert!(!h.tick("a", C::data_version_changed(), NOW).await.requested().is_empty());

        h.store.record_observation(&a, None, "v1").await;
        assert!(h.tick("a", C::data_version_changed(), NOW).await.requested().is_empty());

        h.store.record_observation(&a, None, "v2").await;
        assert!(!h.tick("a", C::data_version_changed(), NOW).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_since_holds_until_reset() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        let condition = || C::newly_updated().since(C::execution_failed());

        assert!(h.tick("a", condition(), NOW).await.requested().is_empty());

        h.store.record_materialization(&AssetKey::from("a"), None).await;
        assert!(!h.tick("a", condition(), NOW).await.requested().is_empty());
        // Trigger no longer fires, state persists.
        assert!(!h.tick("a", condition(), NOW).await.requested().is_empty());

        h.store
            .add_run(RunRecord::new("r1", RunStatus::Failure, &[key("a")]))
            .await;
        assert!(h.tick("a", condition(), NOW).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_newly_true_only_reports_new_partitions() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a").with_partitions(daily())]));

        let first = h.tick("a", C::newly_missing(), NOW).await;
        assert_eq!(first.requested(), &days("a", &["2024-01-01", "2024-01-02"]));

        assert!(h.tick("a", C::newly_missing(), NOW).await.requested().is_empty());

        let next_day = h.tick("a", C::newly_missing(), "2024-01-04T12:00:00Z").await;
        assert_eq!(next_day.requested(), &days("a", &["2024-01-03"]));
    }

    #[tokio::test]
    async fn test_any_and_all_deps_match() {
        let mut h = Harness::new(graph(vec![
            AssetNode::new("a"),
            AssetNode::new("b"),
            AssetNode::new("c")
                .with_dep(AssetDep::new("a"))
                .with_dep(AssetDep::new("b")),
        ]));
        h.store.record_materialization(&AssetKey::from("a"), None).await;

        let any = h.tick("c", C::any_deps_match(C::missing()), NOW).await;
        assert!(!any.requested().is_empty());
        assert_eq!(any.result.child_results.len(), 2);

        let all = h.tick("c", C::all_deps_match(C::missing()), NOW).await;
        assert!(all.requested().is_empty());

        // Without parents, ANY is false and ALL is vacuously true.
        assert!(h.tick("a", C::any_deps_match(C::missing()), NOW).await.requested().is_empty());
        assert!(!h.tick("a", C::all_deps_match(C::missing()), NOW).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_dependency_cursors_are_scoped_per_parent() {
        let mut h = Harness::new(graph(vec![
            AssetNode::new("a"),
            AssetNode::new("b"),
            AssetNode::new("c")
                .with_dep(AssetDep::new("a"))
                .with_dep(AssetDep::new("b")),
        ]));
        let eval = h.tick("c", C::any_deps_match(C::newly_missing()), NOW).await;
        // One cursor per parent for the same newly_true node.
        assert_eq!(eval.cursor.node_cursors.len(), 2);
    }

    #[tokio::test]
    async fn test_will_be_requested_reads_same_tick_decisions() {
        let statics = PartitionsDefinition::static_keys(["p1", "p2"]);
        let mut h = Harness::new(graph(vec![
            AssetNode::new("a").with_partitions(statics.clone()),
            AssetNode::new("b")
                .with_partitions(statics)
                .with_dep(AssetDep::new("a")),
        ]));
        let published = EntitySubset::from_keys(key("a"), SubsetRepr::Keys, ["p1"]);

        let eval = h
            .tick_with("b", C::any_deps_match(C::will_be_requested()), NOW, vec![published])
            .await;
        assert_eq!(
            eval.requested(),
            &EntitySubset::from_keys(key("b"), SubsetRepr::Keys, ["p1"])
        );
    }

    #[tokio::test]
    async fn test_eager_requests_after_parent_update() {
        let mut h = Harness::new(graph(vec![
            AssetNode::new("a"),
            AssetNode::new("b").with_dep(AssetDep::new("a")),
        ]));
        assert!(h.tick("b", C::eager(), NOW).await.requested().is_empty());

        h.store.record_materialization(&AssetKey::from("a"), None).await;
        let eval = h.tick("b", C::eager(), NOW).await;
        assert!(!eval.requested().is_empty());
        assert!(eval
            .result
            .find("newly_missing_or_any_deps_updated_since_last_handled")
            .is_some());

        // Requested last tick counts as handled.
        assert!(h.tick("b", C::eager(), NOW).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_code_version_changed() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a").with_code_version("1")]));
        assert!(h.tick("a", C::code_version_changed(), NOW).await.requested().is_empty());
        assert!(h.tick("a", C::code_version_changed(), NOW).await.requested().is_empty());

        h.graph = graph(vec![AssetNode::new("a").with_code_version("2")]);
        assert!(!h.tick("a", C::code_version_changed(), NOW).await.requested().is_empty());
    }

    async fn materialize_in_run(h: &Harness, asset: &str, run: RunRecord) {
        let run_id = run.run_id.clone();
        h.store.add_run(run).await;
        h.store
            .record_asset_event(
                AssetKey::from(asset),
                None,
                AssetEventKind::Materialization,
                None,
                Some(run_id),
            )
            .await;
    }

    #[tokio::test]
    async fn test_executed_with_root_target() {
        let mut h = Harness::new(graph(vec![
            AssetNode::new("a"),
            AssetNode::new("b").with_dep(AssetDep::new("a")),
        ]));
        let both = RunRecord::new("r1", RunStatus::Success, &[key("a"), key("b")]);
        materialize_in_run(&h, "a", both.clone()).await;
        materialize_in_run(&h, "b", both).await;

        let via_parent = h
            .tick("b", C::any_deps_match(C::executed_with_root_target()), NOW)
            .await;
        assert!(!via_parent.requested().is_empty());

        // The root's own run never counts.
        assert!(h.tick("b", C::executed_with_root_target(), NOW).await.requested().is_empty());

        materialize_in_run(&h, "a", RunRecord::new("r2", RunStatus::Success, &[key("a")])).await;
        let parent_alone = h
            .tick("b", C::any_deps_match(C::executed_with_root_target()), NOW)
            .await;
        assert!(parent_alone.requested().is_empty());
    }

    #[tokio::test]
    async fn test_executed_with_tags() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        materialize_in_run(
            &h,
            "a",
            RunRecord::new("r1", RunStatus::Success, &[key("a")]).with_tag("team", "data"),
        )
        .await;

        let has_key = C::executed_with_tags(Some(BTreeSet::from(["team".to_string()])), None);
        assert!(!h.tick("a", has_key, NOW).await.requested().is_empty());

        let value = |v: &str| {
            C::executed_with_tags(None, Some(BTreeMap::from([("team".to_string(), v.to_string())])))
        };
        assert!(!h.tick("a", value("data"), NOW).await.requested().is_empty());
        assert!(h.tick("a", value("ml"), NOW).await.requested().is_empty());

        let other_key = C::executed_with_tags(Some(BTreeSet::from(["owner".to_string()])), None);
        assert!(h.tick("a", other_key, NOW).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_check_passed_and_failed() {
        let check = AssetKey::from("a").check("rows");
        let mut h = Harness::new(Arc::new(
            AssetGraph::build(GraphDefinition {
                assets: vec![AssetNode::new("a")],
                checks: vec![CheckNode {
                    key: check.clone(),
                    automation_condition: None,
                }],
            })
            .unwrap(),
        ));
        let entity: EntityKey = check.clone().into();

        let passed = h.tick_entity(entity.clone(), C::check_passed(), NOW, Vec::new()).await;
        assert!(passed.requested().is_empty());

        h.store
            .record_check_evaluation(check.clone(), None, CheckStatus::Succeeded, None)
            .await;
        let passed = h.tick_entity(entity.clone(), C::check_passed(), NOW, Vec::new()).await;
        assert_eq!(passed.requested(), &EntitySubset::present(entity.clone()));
        let failed = h.tick_entity(entity.clone(), C::check_failed(), NOW, Vec::new()).await;
        assert!(failed.requested().is_empty());

        h.store
            .record_check_evaluation(check, None, CheckStatus::Failed, None)
            .await;
        let failed = h.tick_entity(entity.clone(), C::check_failed(), NOW, Vec::new()).await;
        assert_eq!(failed.requested(), &EntitySubset::present(entity));
    }

    #[tokio::test]
    async fn test_run_and_backfill_in_progress() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a").with_partitions(daily())]));
        h.store
            .add_run(RunRecord::new("r1", RunStatus::Started, &[key("a")]).with_partition("2024-01-02"))
            .await;
        h.store
            .add_backfill(BackfillRecord {
                backfill_id: "b1".into(),
                status: BackfillStatus::Requested,
                targets: vec![BackfillTarget {
                    key: key("a"),
                    partitions: Some(BTreeSet::from(["2024-01-01".to_string()])),
                }],
            })
            .await;

        let runs = h.tick("a", C::run_in_progress(), NOW).await;
        assert_eq!(runs.requested(), &days("a", &["2024-01-02"]));
        let backfills = h.tick("a", C::backfill_in_progress(), NOW).await;
        assert_eq!(backfills.requested(), &days("a", &["2024-01-01"]));
        let either = h.tick("a", C::in_progress(), NOW).await;
        assert_eq!(either.requested(), &days("a", &["2024-01-01", "2024-01-02"]));

        h.store.set_run_status("r1", RunStatus::Success).await.unwrap();
        h.store
            .set_backfill_status("b1", BackfillStatus::Completed)
            .await
            .unwrap();
        assert!(h.tick("a", C::in_progress(), NOW).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_newly_requested_follows_previous_tick() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        assert!(h.tick("a", C::newly_requested(), NOW).await.requested().is_empty());

        assert!(!h.tick("a", C::missing(), NOW).await.requested().is_empty());
        assert!(!h.tick("a", C::newly_requested(), NOW).await.requested().is_empty());

        h.store.record_materialization(&AssetKey::from("a"), None).await;
        assert!(h.tick("a", C::missing(), NOW).await.requested().is_empty());
        assert!(h.tick("a", C::newly_requested(), NOW).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_on_missing_requests_new_partitions_once() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a").with_partitions(daily())]));
        // The first evaluation counts as handled.
        assert!(h.tick("a", C::on_missing(), NOW).await.requested().is_empty());

        let next_day = "2024-01-04T12:00:00Z";
        let eval = h.tick("a", C::on_missing(), next_day).await;
        assert_eq!(eval.requested(), &days("a", &["2024-01-03"]));
        assert!(eval.result.find("newly_missing_since_last_handled").is_some());

        // Still missing, but already requested.
        assert!(h.tick("a", C::on_missing(), next_day).await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_on_cron_requests_once_per_tick() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a")]));
        let cron = || C::on_cron("0 0 * * *", "UTC");

        assert!(h.tick("a", cron(), "2024-01-01T23:00:00Z").await.requested().is_empty());
        assert!(!h.tick("a", cron(), "2024-01-02T00:30:00Z").await.requested().is_empty());
        assert!(h.tick("a", cron(), "2024-01-02T01:00:00Z").await.requested().is_empty());
    }

    #[tokio::test]
    async fn test_on_cron_counts_parent_requested_on_the_tick() {
        let mut h = Harness::new(graph(vec![
            AssetNode::new("a"),
            AssetNode::new("b").with_dep(AssetDep::new("a")),
        ]));
        let cron = || C::on_cron("0 0 * * *", "UTC");

        assert!(h.tick("b", cron(), "2024-01-01T23:00:00Z").await.requested().is_empty());
        let eval = h
            .tick_with("b", cron(), "2024-01-02T00:30:00Z", vec![EntitySubset::present(key("a"))])
            .await;
        assert!(!eval.requested().is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_lookback_covers_all_windows() {
        let mut h = Harness::new(graph(vec![AssetNode::new("a").with_partitions(daily())]));
        let condition = C::new(ConditionKind::InLatestTimeWindow {
            lookback_seconds: Some(i64::MAX),
        });
        let eval = h.tick("a", condition, NOW).await;
        assert_eq!(eval.requested(), &days("a", &["2024-01-01", "2024-01-02"]));

        let negative = C::new(ConditionKind::InLatestTimeWindow {
            lookback_seconds: Some(i64::MIN),
        });
        assert_eq!(h.tick("a", negative, NOW).await.requested(), &days("a", &["2024-01-02"]));
    }

    #[tokio::test]
    async fn test_cursors_of_removed_parents_are_dropped() {
        let mut h = Harness::new(graph(vec![
            AssetNode::new("a"),
            AssetNode::new("b"),
            AssetNode::new("c")
                .with_dep(AssetDep::new("a"))
                .with_dep(AssetDep::new("b")),
        ]));
        let condition = || C::any_deps_match(C::newly_missing());
        assert_eq!(h.tick("c", condition(), NOW).await.cursor.node_cursors.len(), 2);

        h.graph = graph(vec![
            AssetNode::new("a"),
            AssetNode::new("b"),
            AssetNode::new("c").with_dep(AssetDep::new("a")),
        ]);
        assert_eq!(h.tick("c", condition(), NOW).await.cursor.node_cursors.len(), 1);
    }
}
