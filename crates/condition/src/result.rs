//! Evaluation results.

use std::collections::BTreeMap;
use tickwise_core::{ConditionId, Cursor, EntityCursor, EntityKey, EntitySubset};

/// Output of one node evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationResult {
    /// Cursor key of the node
    pub node_id: ConditionId,

    /// Node name
    pub name: String,

    /// Entity the node was evaluated for
    pub key: EntityKey,

    /// Candidate subset the node received
    pub candidate_subset: EntitySubset,

    /// Where the node is true; always within the candidate subset
    pub true_subset: EntitySubset,

    /// State to persist for the next tick
    pub cursor: Option<Cursor>,

    /// Results of evaluated children, in evaluation order
    pub child_results: Vec<AutomationResult>,
}

impl AutomationResult {
    /// Cursors of this node and every evaluated descendant.
    pub fn cursors(&self) -> BTreeMap<ConditionId, Cursor> {
        let mut cursors = BTreeMap::new();
        self.collect_cursors(&mut cursors);
        cursors
    }

    fn collect_cursors(&self, out: &mut BTreeMap<ConditionId, Cursor>) {
        if let Some(cursor) = &self.cursor {
            out.insert(self.node_id.clone(), cursor.clone());
        }
        for child in &self.child_results {
            child.collect_cursors(out);
        }
    }

    /// Find the first result (depth first) for a node name.
    pub fn find(&self, name: &str) -> Option<&AutomationResult> {
        if self.name == name {
            return Some(self);
        }
        self.child_results.iter().find_map(|c| c.find(name))
    }

    /// Number of evaluated nodes.
    pub fn evaluated_nodes(&self) -> usize {
        1 + self.child_results.iter().map(Self::evaluated_nodes).sum::<usize>()
    }
}

/// Outcome of evaluating one entity's whole tree.
#[derive(Debug, Clone)]
pub struct EntityEvaluation {
    /// Root node result
    pub result: AutomationResult,

    /// Cursor to persist for the entity
    pub cursor: EntityCursor,
}

impl EntityEvaluation {
    /// Subset the entity requests this tick.
    pub fn requested(&self) -> &EntitySubset {
        &self.result.true_subset
    }
}
