//! Evaluation contexts.
//!
//! A [`RootContext`] exists per evaluated entity per tick; an
//! [`AutomationContext`] exists per node evaluation and is passed down the
//! recursion by value. The only shared mutable state is the tick's
//! [`RequestedSubsets`].

use crate::requested::RequestedSubsets;
use crate::EvaluationError;
use std::sync::Arc;
use tickwise_core::{
    AutomationCondition, ConditionId, Cursor, EntityCursor, EntityKey, EntitySubset,
    TemporalContext, TickCursor, Time,
};
use tickwise_graph::AssetGraphView;
use tracing::debug;

/// State shared by every entity evaluation of one tick.
pub struct TickScope {
    /// Graph view for this tick
    pub view: Arc<AssetGraphView>,

    /// Decisions published so far this tick
    pub requested: Arc<RequestedSubsets>,

    /// Last committed cursor
    pub previous: Arc<TickCursor>,
}

impl TickScope {
    /// Bundle the shared state of a tick.
    pub fn new(view: Arc<AssetGraphView>, requested: Arc<RequestedSubsets>, previous: Arc<TickCursor>) -> Self {
        Self {
            view,
            requested,
            previous,
        }
    }
}

/// Identity of the entity whose tree is being evaluated.
pub struct RootContext {
    key: EntityKey,
    condition: AutomationCondition,
    previous: Option<EntityCursor>,
    scope: Arc<TickScope>,
}

impl RootContext {
    /// Root context for one entity, picking up its previous cursor.
    pub fn new(key: EntityKey, condition: AutomationCondition, scope: Arc<TickScope>) -> Self {
        let previous = scope.previous.entity(&key).cloned();
        Self {
            key,
            condition,
            previous,
            scope,
        }
    }

    /// Root entity.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Root condition.
    pub fn condition(&self) -> &AutomationCondition {
        &self.condition
    }

    /// Cursor written for this entity on the previous tick.
    pub fn previous(&self) -> Option<&EntityCursor> {
        self.previous.as_ref()
    }

    /// Shared tick state.
    pub fn scope(&self) -> &TickScope {
        &self.scope
    }

    /// Current evaluation time.
    pub fn evaluation_time(&self) -> Time {
        self.scope.view.evaluation_time()
    }

    /// Evaluation time of the previous tick this entity was evaluated in.
    pub fn previous_evaluation_time(&self) -> Option<Time> {
        self.previous.as_ref().map(|p| p.effective_timestamp)
    }

    /// Event log snapshot of the previous evaluation.
    pub fn previous_temporal_context(&self) -> Option<TemporalContext> {
        self.previous.as_ref().map(|p| p.temporal_context)
    }

    /// Context for the root node, with the entity's full subset as candidate.
    pub fn node_context(&self) -> Result<AutomationContext<'_>, EvaluationError> {
        Ok(AutomationContext {
            condition: &self.condition,
            root: self,
            key: self.key.clone(),
            candidate_subset: self.scope.view.get_full_subset(&self.key)?,
            node_id: self.condition.unique_id().clone(),
            scope_id: None,
        })
    }
}

/// Per-node evaluation frame.
#[derive(Clone)]
pub struct AutomationContext<'a> {
    condition: &'a AutomationCondition,
    root: &'a RootContext,
    key: EntityKey,
    candidate_subset: EntitySubset,
    node_id: ConditionId,
    /// Set once evaluation crosses a dependency edge
    scope_id: Option<ConditionId>,
}

impl<'a> AutomationContext<'a> {
    /// Node being evaluated.
    pub fn condition(&self) -> &'a AutomationCondition {
        self.condition
    }

    /// Root context.
    pub fn root(&self) -> &'a RootContext {
        self.root
    }

    /// Entity this node is evaluated for (the root, or a dependency).
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Upper bound on this node's true subset.
    pub fn candidate_subset(&self) -> &EntitySubset {
        &self.candidate_subset
    }

    /// Cursor key of this node.
    pub fn node_id(&self) -> &ConditionId {
        &self.node_id
    }

    /// Graph view of the tick.
    pub fn view(&self) -> &'a AssetGraphView {
        &self.root.scope.view
    }

    /// Current evaluation time.
    pub fn evaluation_time(&self) -> Time {
        self.root.evaluation_time()
    }

    /// Empty subset of this node's entity.
    pub fn get_empty_subset(&self) -> Result<EntitySubset, EvaluationError> {
        Ok(self.view().get_empty_subset(&self.key)?)
    }

    /// Full subset of this node's entity.
    pub fn get_full_subset(&self) -> Result<EntitySubset, EvaluationError> {
        Ok(self.view().get_full_subset(&self.key)?)
    }

    fn child_id(&self, child: &AutomationCondition) -> ConditionId {
        match &self.scope_id {
            None => child.unique_id().clone(),
            Some(scope) => child.unique_id().within(scope),
        }
    }

    /// Context for a child evaluated for the same entity.
    pub fn for_child(&self, child: &'a AutomationCondition, candidate_subset: EntitySubset) -> Self {
        Self {
            condition: child,
            root: self.root,
            key: self.key.clone(),
            candidate_subset,
            node_id: self.child_id(child),
            scope_id: self.scope_id.clone(),
        }
    }

    /// Context for a child evaluated on behalf of a dependency.
    pub fn for_dependency(
        &self,
        child: &'a AutomationCondition,
        dependency: EntityKey,
        candidate_subset: EntitySubset,
    ) -> Self {
        let scope = self.node_id.scoped(&dependency);
        Self {
            condition: child,
            root: self.root,
            node_id: child.unique_id().within(&scope),
            key: dependency,
            candidate_subset,
            scope_id: Some(scope),
        }
    }

    /// Cursor this node wrote on the previous tick.
    pub fn cursor(&self) -> Option<&'a Cursor> {
        self.root.previous()?.node_cursors.get(&self.node_id)
    }

    /// Subset stored in this node's cursor, unless it is stale.
    pub fn previous_subset(&self) -> Result<Option<EntitySubset>, EvaluationError> {
        let Some(Cursor::Subset { subset }) = self.cursor() else {
            return Ok(None);
        };
        let repr = self.view().subset_repr(&self.key)?;
        if subset.key() != &self.key || subset.repr() != repr {
            debug!(
                "Discarding stale cursor of {} for {} ({:?} vs {:?})",
                self.condition.name(),
                self.key,
                subset.repr(),
                repr
            );
            return Ok(None);
        }
        Ok(Some(subset.clone()))
    }

    /// Evaluation time of the previous tick for the root entity.
    pub fn previous_evaluation_time(&self) -> Option<Time> {
        self.root.previous_evaluation_time()
    }

    /// Event log snapshot of the previous tick for the root entity.
    pub fn previous_temporal_context(&self) -> Option<TemporalContext> {
        self.root.previous_temporal_context()
    }

    /// Subset requested for `key` on the previous tick, unless its
    /// representation no longer matches the entity's partitions.
    pub fn get_previous_requested_subset(&self, key: &EntityKey) -> Result<Option<EntitySubset>, EvaluationError> {
        let Some(subset) = self.root.scope.previous.previous_requested_subset(key) else {
            return Ok(None);
        };
        let repr = self.view().subset_repr(key)?;
        if subset.repr() != repr {
            debug!("Discarding stale requested subset of {} ({:?} vs {:?})", key, subset.repr(), repr);
            return Ok(None);
        }
        Ok(Some(subset.clone()))
    }

    /// Subset already requested for `key` earlier in this tick.
    pub fn get_requested_this_tick(&self, key: &EntityKey) -> Option<EntitySubset> {
        self.root.scope.requested.get(key)
    }
}
