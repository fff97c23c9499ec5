//! Consumers of a tick's requests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tickwise_core::{EntityKey, EntitySubset};
use tracing::info;

/// Receives the non-empty requests of each committed tick, e.g. to launch runs.
#[async_trait]
pub trait RequestSink: Send + Sync {
    /// Hand off the requests of tick `evaluation_id`.
    async fn submit(
        &self,
        evaluation_id: u64,
        requests: &BTreeMap<EntityKey, EntitySubset>,
    ) -> anyhow::Result<()>;
}

/// Sink that only logs what would be launched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl RequestSink for LogSink {
    async fn submit(
        &self,
        evaluation_id: u64,
        requests: &BTreeMap<EntityKey, EntitySubset>,
    ) -> anyhow::Result<()> {
        for (key, subset) in requests {
            info!("Tick {}: requesting {} ({})", evaluation_id, key, describe(subset));
        }
        Ok(())
    }
}

/// Human-readable form of a subset.
pub fn describe(subset: &EntitySubset) -> String {
    let keys: Vec<&str> = subset.partition_keys().map(String::as_str).collect();
    if keys.is_empty() {
        let state = if subset.is_empty() { "nothing" } else { "unpartitioned" };
        state.to_string()
    } else {
        format!("partitions {}", keys.join(", "))
    }
}
