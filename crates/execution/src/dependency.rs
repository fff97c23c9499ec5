//! Ordering constraints between entity evaluations of one tick.

use std::collections::BTreeSet;
use tickwise_core::EntityKey;
use tickwise_graph::AssetGraph;

/// Entities an evaluation must wait for before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No same-tick reads; start immediately
    Ready,
    /// Wait until these entities have settled
    WaitFor(Vec<EntityKey>),
}

/// Resolves which evaluations read decisions published earlier in the tick.
pub struct DependencyResolver<'g> {
    graph: &'g AssetGraph,
    evaluated: BTreeSet<EntityKey>,
}

impl<'g> DependencyResolver<'g> {
    /// Resolver for the entities evaluated this tick.
    pub fn new(graph: &'g AssetGraph, evaluated: &[EntityKey]) -> Self {
        Self {
            graph,
            evaluated: evaluated.iter().cloned().collect(),
        }
    }

    /// What `key` must wait for.
    ///
    /// A tree that reads same-tick results waits for every evaluated
    /// ancestor, since dependency conditions may nest.
    pub fn check(&self, key: &EntityKey) -> Resolution {
        let reads_same_tick = self
            .graph
            .condition_tree(key)
            .ok()
            .flatten()
            .is_some_and(|c| c.reads_same_tick_results());
        if !reads_same_tick {
            return Resolution::Ready;
        }

        let ancestors: Vec<EntityKey> = self
            .ancestors(key)
            .into_iter()
            .filter(|k| self.evaluated.contains(k))
            .collect();
        if ancestors.is_empty() {
            Resolution::Ready
        } else {
            Resolution::WaitFor(ancestors)
        }
    }

    fn ancestors(&self, key: &EntityKey) -> BTreeSet<EntityKey> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&EntityKey> = self.graph.parents(key).iter().collect();
        while let Some(parent) = stack.pop() {
            if seen.insert(parent.clone()) {
                stack.extend(self.graph.parents(parent));
            }
        }
        seen
    }
}
