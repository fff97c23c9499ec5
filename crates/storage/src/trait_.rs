//! Storage trait abstraction.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tickwise_core::{
    AssetCheckKey, AssetEvent, AssetKey, BackfillRecord, CheckEvaluation, EntityKey, PartitionSlot,
    RunRecord, StorageId, TickCursor,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached; transient
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Read access to the event and run log.
///
/// All queries are read-only. Storage ids are assigned by the log in
/// increasing order across asset events and check evaluations, so the
/// maximum id works as a high-water mark.
#[async_trait]
pub trait EventStore: Send + Sync {
    // === Event log ===

    /// Highest storage id assigned so far (0 when empty).
    async fn max_storage_id(&self) -> Result<StorageId>;

    /// Latest materialization or observation per partition of an asset.
    async fn latest_asset_events(&self, key: &AssetKey) -> Result<BTreeMap<PartitionSlot, AssetEvent>>;

    /// Asset events with `after < storage_id <= up_to`, in storage order.
    async fn asset_events_between(
        &self,
        key: &AssetKey,
        after: StorageId,
        up_to: StorageId,
    ) -> Result<Vec<AssetEvent>>;

    /// Latest event for one partition with `storage_id <= at`.
    async fn latest_asset_event_at_or_before(
        &self,
        key: &AssetKey,
        partition: Option<&str>,
        at: StorageId,
    ) -> Result<Option<AssetEvent>>;

    // === Checks ===

    /// Latest evaluation per partition of a check.
    async fn latest_check_evaluations(
        &self,
        key: &AssetCheckKey,
    ) -> Result<BTreeMap<PartitionSlot, CheckEvaluation>>;

    /// Check evaluations with `after < storage_id <= up_to`, in storage order.
    async fn check_evaluations_between(
        &self,
        key: &AssetCheckKey,
        after: StorageId,
        up_to: StorageId,
    ) -> Result<Vec<CheckEvaluation>>;

    // === Runs ===

    /// Runs whose selection includes the entity, oldest first.
    async fn runs_targeting(&self, key: &EntityKey) -> Result<Vec<RunRecord>>;

    /// Load a run by id.
    async fn run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Backfills that have not reached a terminal state.
    async fn in_progress_backfills(&self) -> Result<Vec<BackfillRecord>>;

    // === Partitions ===

    /// Keys of a dynamic partitions definition, in insertion order.
    async fn dynamic_partition_keys(&self, name: &str) -> Result<Vec<String>>;
}

/// Persistence for tick cursors.
///
/// `load` returns the last fully committed cursor; a partially written
/// commit must never be observable.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the last committed cursor, if any.
    async fn load(&self) -> Result<Option<TickCursor>>;

    /// Atomically replace the committed cursor.
    async fn commit(&mut self, cursor: &TickCursor) -> Result<()>;
}
