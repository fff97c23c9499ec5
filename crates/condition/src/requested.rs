//! Subsets requested so far in the current tick.
//!
//! Each entity publishes its decision exactly once; any number of readers
//! may look it up. Readers that must see a decision before it is made wait
//! on the entity's watch channel, which flips once the entity is settled
//! (published, failed or cancelled).

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tickwise_core::{EntityKey, EntitySubset};
use tokio::sync::watch;

/// Tick-scoped, append-only map of requested subsets.
#[derive(Debug)]
pub struct RequestedSubsets {
    subsets: RwLock<BTreeMap<EntityKey, EntitySubset>>,
    settled: HashMap<EntityKey, watch::Sender<bool>>,
}

impl RequestedSubsets {
    /// Create for the entities evaluated this tick. Entities outside this set
    /// are considered settled from the start.
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a EntityKey>) -> Self {
        let settled = keys
            .into_iter()
            .map(|k| (k.clone(), watch::channel(false).0))
            .collect();
        Self {
            subsets: RwLock::new(BTreeMap::new()),
            settled,
        }
    }

    /// Record an entity's decision and wake its waiters. A second publish
    /// for the same entity is ignored.
    pub fn publish(&self, subset: EntitySubset) {
        let key = subset.key().clone();
        {
            let mut subsets = self.subsets.write().unwrap_or_else(|e| e.into_inner());
            subsets.entry(key.clone()).or_insert(subset);
        }
        self.settle(&key);
    }

    /// Wake waiters without publishing a decision.
    pub fn settle(&self, key: &EntityKey) {
        if let Some(tx) = self.settled.get(key) {
            tx.send_replace(true);
        }
    }

    /// Decision published for an entity, if any.
    pub fn get(&self, key: &EntityKey) -> Option<EntitySubset> {
        let subsets = self.subsets.read().unwrap_or_else(|e| e.into_inner());
        subsets.get(key).cloned()
    }

    /// Whether the entity has settled.
    pub fn is_settled(&self, key: &EntityKey) -> bool {
        self.settled.get(key).map_or(true, |tx| *tx.borrow())
    }

    /// Wait until the entity has settled.
    pub async fn wait_for(&self, key: &EntityKey) {
        let Some(tx) = self.settled.get(key) else {
            return;
        };
        let mut rx = tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|settled| *settled).await;
    }

    /// Every published decision.
    pub fn snapshot(&self) -> BTreeMap<EntityKey, EntitySubset> {
        self.subsets.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
