//! In-memory stores.
//!
//! `MemoryEventStore` keeps the whole event and run log behind a tokio
//! `RwLock` and can be seeded from, or dumped to, a JSON snapshot.

use super::{CursorStore, EventStore, Result, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tickwise_core::{
    AssetCheckKey, AssetEvent, AssetEventKind, AssetKey, BackfillRecord, BackfillStatus,
    CheckEvaluation, CheckStatus, EntityKey, PartitionSlot, RunRecord, RunStatus, StorageId,
    TickCursor,
};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Serializable form of the whole event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogSnapshot {
    /// Materializations and observations
    #[serde(default)]
    pub asset_events: Vec<AssetEvent>,

    /// Check evaluations
    #[serde(default)]
    pub check_evaluations: Vec<CheckEvaluation>,

    /// Runs, oldest first
    #[serde(default)]
    pub runs: Vec<RunRecord>,

    /// Backfills
    #[serde(default)]
    pub backfills: Vec<BackfillRecord>,

    /// Dynamic partition keys by definition name
    #[serde(default)]
    pub dynamic_partitions: BTreeMap<String, Vec<String>>,
}

impl EventLogSnapshot {
    fn max_storage_id(&self) -> StorageId {
        let events = self.asset_events.iter().map(|e| e.storage_id);
        let checks = self.check_evaluations.iter().map(|e| e.storage_id);
        events.chain(checks).max().unwrap_or(0)
    }
}

/// Event and run log held in memory.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    log: RwLock<EventLogSnapshot>,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a snapshot.
    pub fn from_snapshot(snapshot: EventLogSnapshot) -> Self {
        Self {
            log: RwLock::new(snapshot),
        }
    }

    /// Load a snapshot from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: EventLogSnapshot = serde_json::from_str(&json)?;
        debug!(
            "Loaded event log from {}: {} asset events, {} runs",
            path.display(),
            snapshot.asset_events.len(),
            snapshot.runs.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Copy of the current log.
    pub async fn snapshot(&self) -> EventLogSnapshot {
        self.log.read().await.clone()
    }

    /// Write the current log to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.log.read().await)?;
        fs::write(path.as_ref(), json.as_bytes()).await?;
        Ok(())
    }

    // === Recording ===

    /// Append an asset event, returning its storage id.
    pub async fn record_asset_event(
        &self,
        key: AssetKey,
        partition: PartitionSlot,
        kind: AssetEventKind,
        data_version: Option<String>,
        run_id: Option<String>,
    ) -> StorageId {
        let mut log = self.log.write().await;
        let storage_id = log.max_storage_id() + 1;
        log.asset_events.push(AssetEvent {
            storage_id,
            key,
            partition,
            kind,
            data_version,
            run_id,
            timestamp: chrono::Utc::now(),
        });
        storage_id
    }

    /// Record a materialization without data version or run.
    pub async fn record_materialization(&self, key: &AssetKey, partition: Option<&str>) -> StorageId {
        self.record_asset_event(
            key.clone(),
            partition.map(str::to_string),
            AssetEventKind::Materialization,
            None,
            None,
        )
        .await
    }

    /// Record an observation carrying a data version.
    pub async fn record_observation(
        &self,
        key: &AssetKey,
        partition: Option<&str>,
        data_version: impl Into<String>,
    ) -> StorageId {
        self.record_asset_event(
            key.clone(),
            partition.map(str::to_string),
            AssetEventKind::Observation,
            Some(data_version.into()),
            None,
        )
        .await
    }

    /// Append a check evaluation, returning its storage id.
    pub async fn record_check_evaluation(
        &self,
        key: AssetCheckKey,
        partition: PartitionSlot,
        status: CheckStatus,
        run_id: Option<String>,
    ) -> StorageId {
        let mut log = self.log.write().await;
        let storage_id = log.max_storage_id() + 1;
        log.check_evaluations.push(CheckEvaluation {
            storage_id,
            key,
            partition,
            status,
            run_id,
            timestamp: chrono::Utc::now(),
        });
        storage_id
    }

    /// Add a run.
    pub async fn add_run(&self, run: RunRecord) {
        self.log.write().await.runs.push(run);
    }

    /// Update the status of a run.
    pub async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let mut log = self.log.write().await;
        let run = log
            .runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| StorageError::NotFound(format!("run {run_id}")))?;
        run.status = status;
        Ok(())
    }

    /// Add a backfill.
    pub async fn add_backfill(&self, backfill: BackfillRecord) {
        self.log.write().await.backfills.push(backfill);
    }

    /// Update the status of a backfill.
    pub async fn set_backfill_status(&self, backfill_id: &str, status: BackfillStatus) -> Result<()> {
        let mut log = self.log.write().await;
        let backfill = log
            .backfills
            .iter_mut()
            .find(|b| b.backfill_id == backfill_id)
            .ok_or_else(|| StorageError::NotFound(format!("backfill {backfill_id}")))?;
        backfill.status = status;
        Ok(())
    }

    /// Add keys to a dynamic partitions definition. Existing keys are skipped.
    pub async fn add_dynamic_partitions<I, S>(&self, name: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut log = self.log.write().await;
        let existing = log.dynamic_partitions.entry(name.to_string()).or_default();
        for key in keys {
            let key = key.into();
            if !existing.contains(&key) {
                existing.push(key);
            }
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn max_storage_id(&self) -> Result<StorageId> {
        Ok(self.log.read().await.max_storage_id())
    }

    async fn latest_asset_events(&self, key: &AssetKey) -> Result<BTreeMap<PartitionSlot, AssetEvent>> {
        let log = self.log.read().await;
        let mut latest: BTreeMap<PartitionSlot, AssetEvent> = BTreeMap::new();
        for event in log.asset_events.iter().filter(|e| &e.key == key) {
            match latest.get(&event.partition) {
                Some(seen) if seen.storage_id > event.storage_id => {}
                _ => {
                    latest.insert(event.partition.clone(), event.clone());
                }
            }
        }
        Ok(latest)
    }

    async fn asset_events_between(
        &self,
        key: &AssetKey,
        after: StorageId,
        up_to: StorageId,
    ) -> Result<Vec<AssetEvent>> {
        let log = self.log.read().await;
        let mut events: Vec<AssetEvent> = log
            .asset_events
            .iter()
            .filter(|e| &e.key == key && e.storage_id > after && e.storage_id <= up_to)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.storage_id);
        Ok(events)
    }

    async fn latest_asset_event_at_or_before(
        &self,
        key: &AssetKey,
        partition: Option<&str>,
        at: StorageId,
    ) -> Result<Option<AssetEvent>> {
        let log = self.log.read().await;
        Ok(log
            .asset_events
            .iter()
            .filter(|e| &e.key == key && e.partition.as_deref() == partition && e.storage_id <= at)
            .max_by_key(|e| e.storage_id)
            .cloned())
    }

    async fn latest_check_evaluations(
        &self,
        key: &AssetCheckKey,
    ) -> Result<BTreeMap<PartitionSlot, CheckEvaluation>> {
        let log = self.log.read().await;
        let mut latest: BTreeMap<PartitionSlot, CheckEvaluation> = BTreeMap::new();
        for evaluation in log.check_evaluations.iter().filter(|e| &e.key == key) {
            match latest.get(&evaluation.partition) {
                Some(seen) if seen.storage_id > evaluation.storage_id => {}
                _ => {
                    latest.insert(evaluation.partition.clone(), evaluation.clone());
                }
            }
        }
        Ok(latest)
    }

    async fn check_evaluations_between(
        &self,
        key: &AssetCheckKey,
        after: StorageId,
        up_to: StorageId,
    ) -> Result<Vec<CheckEvaluation>> {
        let log = self.log.read().await;
        let mut evaluations: Vec<CheckEvaluation> = log
            .check_evaluations
            .iter()
            .filter(|e| &e.key == key && e.storage_id > after && e.storage_id <= up_to)
            .cloned()
            .collect();
        evaluations.sort_by_key(|e| e.storage_id);
        Ok(evaluations)
    }

    async fn runs_targeting(&self, key: &EntityKey) -> Result<Vec<RunRecord>> {
        let log = self.log.read().await;
        Ok(log.runs.iter().filter(|r| r.targets(key)).cloned().collect())
    }

    async fn run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let log = self.log.read().await;
        Ok(log.runs.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn in_progress_backfills(&self) -> Result<Vec<BackfillRecord>> {
        let log = self.log.read().await;
        Ok(log
            .backfills
            .iter()
            .filter(|b| b.status == BackfillStatus::Requested)
            .cloned()
            .collect())
    }

    async fn dynamic_partition_keys(&self, name: &str) -> Result<Vec<String>> {
        let log = self.log.read().await;
        Ok(log.dynamic_partitions.get(name).cloned().unwrap_or_default())
    }
}

/// Cursor store held in memory.
///
/// Clones share state, so a test can keep a handle while the evaluator owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    committed: Arc<RwLock<Option<TickCursor>>>,
}

impl MemoryCursorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with an already committed cursor.
    pub fn with_cursor(cursor: TickCursor) -> Self {
        Self {
            committed: Arc::new(RwLock::new(Some(cursor))),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<TickCursor>> {
        Ok(self.committed.read().await.clone())
    }

    async fn commit(&mut self, cursor: &TickCursor) -> Result<()> {
        *self.committed.write().await = Some(cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(s: &str) -> AssetKey {
        AssetKey::from(s)
    }

    #[tokio::test]
    async fn test_storage_ids_are_monotonic() {
        let store = MemoryEventStore::new();
        assert_eq!(store.max_storage_id().await.unwrap(), 0);

        let first = store.record_materialization(&asset("a"), None).await;
        let second = store
            .record_check_evaluation(asset("a").check("c"), None, CheckStatus::Succeeded, None)
            .await;
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(store.max_storage_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_latest_events_per_partition() {
        let store = MemoryEventStore::new();
        let key = asset("a");
        store.record_materialization(&key, Some("p1")).await;
        store.record_observation(&key, Some("p1"), "v2").await;
        store.record_materialization(&key, Some("p2")).await;

        let latest = store.latest_asset_events(&key).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(
            latest[&Some("p1".to_string())].data_version.as_deref(),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_event_range_is_half_open() {
        let store = MemoryEventStore::new();
        let key = asset("a");
        for p in ["p1", "p2", "p3"] {
            store.record_materialization(&key, Some(p)).await;
        }
        let events = store.asset_events_between(&key, 1, 3).await.unwrap();
        let ids: Vec<StorageId> = events.iter().map(|e| e.storage_id).collect();
        assert_eq!(ids, vec![2, 3]);

        let before = store
            .latest_asset_event_at_or_before(&key, Some("p2"), 1)
            .await
            .unwrap();
        assert!(before.is_none());
    }

    #[tokio::test]
    async fn test_run_status_updates() {
        let store = MemoryEventStore::new();
        let key: EntityKey = asset("a").into();
        store
            .add_run(RunRecord::new("r1", RunStatus::Started, &[key.clone()]))
            .await;
        store.set_run_status("r1", RunStatus::Success).await.unwrap();

        let runs = store.runs_targeting(&key).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Success);
        assert!(matches!(
            store.set_run_status("missing", RunStatus::Failure).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");

        let store = MemoryEventStore::new();
        store.record_materialization(&asset("a"), None).await;
        store.add_dynamic_partitions("customers", ["acme", "acme", "globex"]).await;
        store.save(&path).await.unwrap();

        let loaded = MemoryEventStore::load(&path).await.unwrap();
        assert_eq!(loaded.snapshot().await, store.snapshot().await);
        assert_eq!(
            loaded.dynamic_partition_keys("customers").await.unwrap(),
            vec!["acme", "globex"]
        );
    }

    #[tokio::test]
    async fn test_memory_cursor_store_shares_state() {
        let mut store = MemoryCursorStore::new();
        let handle = store.clone();
        assert!(handle.load().await.unwrap().is_none());

        let cursor = TickCursor {
            evaluation_id: 7,
            ..Default::default()
        };
        store.commit(&cursor).await.unwrap();
        assert_eq!(handle.load().await.unwrap(), Some(cursor));
    }
}
