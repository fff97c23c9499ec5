//! Output of one tick.

use std::collections::BTreeMap;
use std::time::Duration;
use tickwise_condition::{AutomationResult, EvaluationError};
use tickwise_core::{EntityCursor, EntityKey, EntitySubset, TickCursor, Time};
use tickwise_graph::AssetGraph;

/// Why an entity has no decision this tick.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The condition tree failed to evaluate
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Evaluation exceeded its deadline
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// The evaluation task panicked
    #[error("evaluation task panicked: {0}")]
    Panicked(String),
}

/// Decisions, cursors and failures of one tick.
#[derive(Debug)]
pub struct TickResult {
    /// Sequence number of the tick
    pub evaluation_id: u64,

    /// Evaluation time of the tick
    pub evaluation_time: Time,

    /// Subset requested per successfully evaluated entity (possibly empty)
    pub requested: BTreeMap<EntityKey, EntitySubset>,

    /// New cursor per successfully evaluated entity
    pub cursors: BTreeMap<EntityKey, EntityCursor>,

    /// Per-entity failures; these entities keep their previous cursor
    pub errors: BTreeMap<EntityKey, EntityError>,

    /// Entities not finished when the tick was cancelled
    pub omitted: Vec<EntityKey>,

    /// Evaluation trees, for inspection
    pub results: BTreeMap<EntityKey, AutomationResult>,
}

impl TickResult {
    pub(crate) fn new(evaluation_id: u64, evaluation_time: Time) -> Self {
        Self {
            evaluation_id,
            evaluation_time,
            requested: BTreeMap::new(),
            cursors: BTreeMap::new(),
            errors: BTreeMap::new(),
            omitted: Vec::new(),
            results: BTreeMap::new(),
        }
    }

    /// Requests worth launching.
    pub fn non_empty_requests(&self) -> BTreeMap<EntityKey, EntitySubset> {
        self.requested
            .iter()
            .filter(|(_, subset)| !subset.is_empty())
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect()
    }

    /// Whether any entity failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Cursor to commit after this tick.
    ///
    /// New entity cursors replace previous ones; failed and omitted entities
    /// keep theirs; entities no longer in the graph are dropped.
    pub fn next_cursor(&self, previous: &TickCursor, graph: &AssetGraph) -> TickCursor {
        let mut entities: BTreeMap<EntityKey, EntityCursor> = previous
            .entities
            .iter()
            .filter(|(key, _)| graph.contains(key))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        entities.extend(self.cursors.iter().map(|(k, c)| (k.clone(), c.clone())));

        TickCursor {
            evaluation_id: self.evaluation_id,
            evaluation_time: Some(self.evaluation_time),
            entities,
        }
    }
}
