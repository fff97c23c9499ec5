//! Event-log and run records consulted by conditions.

use crate::id::{AssetCheckKey, AssetKey, EntityKey};
use crate::subset::PartitionSlot;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Monotonic id assigned by the event log to every stored event.
pub type StorageId = u64;

/// Kind of asset event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetEventKind {
    /// The asset was produced
    Materialization,
    /// The asset was observed (external or source asset)
    Observation,
}

/// A materialization or observation recorded in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEvent {
    /// Event log id
    pub storage_id: StorageId,

    /// Asset key
    pub key: AssetKey,

    /// Partition, if partitioned
    #[serde(default)]
    pub partition: PartitionSlot,

    /// Event kind
    pub kind: AssetEventKind,

    /// Content version reported with the event
    #[serde(default)]
    pub data_version: Option<String>,

    /// Run that produced the event
    #[serde(default)]
    pub run_id: Option<String>,

    /// When it happened
    pub timestamp: Time,
}

/// Resolved status of an asset check execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Still running
    InProgress,
    /// Check passed
    Succeeded,
    /// Check failed
    Failed,
    /// The run executing the check failed
    ExecutionFailed,
    /// The check was skipped
    Skipped,
}

/// A check evaluation recorded in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEvaluation {
    /// Event log id
    pub storage_id: StorageId,

    /// Check key
    pub key: AssetCheckKey,

    /// Partition, if partitioned
    #[serde(default)]
    pub partition: PartitionSlot,

    /// Resolved status
    pub status: CheckStatus,

    /// Run that executed the check
    #[serde(default)]
    pub run_id: Option<String>,

    /// When it happened
    pub timestamp: Time,
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting in the run queue
    Queued,
    /// Created, not yet launched
    NotStarted,
    /// Being launched
    Starting,
    /// Executing
    Started,
    /// Finished successfully
    Success,
    /// Finished with a failure
    Failure,
    /// Cancellation requested
    Canceling,
    /// Cancelled
    Canceled,
}

impl RunStatus {
    /// Whether the run has not reached a terminal state.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            RunStatus::Queued
                | RunStatus::NotStarted
                | RunStatus::Starting
                | RunStatus::Started
                | RunStatus::Canceling
        )
    }
}

/// A completed or attempted execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run id
    pub run_id: String,

    /// Current status
    pub status: RunStatus,

    /// Assets targeted by the run
    #[serde(default)]
    pub asset_selection: BTreeSet<AssetKey>,

    /// Checks targeted by the run
    #[serde(default)]
    pub asset_check_selection: BTreeSet<AssetCheckKey>,

    /// Partition targeted by the run, if any
    #[serde(default)]
    pub partition_key: Option<String>,

    /// Run tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Backfill that launched the run
    #[serde(default)]
    pub backfill_id: Option<String>,

    /// Creation time
    pub created_at: Time,
}

impl RunRecord {
    /// Create a run targeting the given entities.
    pub fn new(run_id: impl Into<String>, status: RunStatus, targets: &[EntityKey]) -> Self {
        let mut run = Self {
            run_id: run_id.into(),
            status,
            asset_selection: BTreeSet::new(),
            asset_check_selection: BTreeSet::new(),
            partition_key: None,
            tags: BTreeMap::new(),
            backfill_id: None,
            created_at: chrono::Utc::now(),
        };
        for target in targets {
            match target {
                EntityKey::Asset(key) => {
                    run.asset_selection.insert(key.clone());
                }
                EntityKey::Check(key) => {
                    run.asset_check_selection.insert(key.clone());
                }
            }
        }
        run
    }

    /// Set the targeted partition.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition_key = Some(partition.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Whether the run selected the given entity.
    pub fn targets(&self, key: &EntityKey) -> bool {
        match key {
            EntityKey::Asset(key) => self.asset_selection.contains(key),
            EntityKey::Check(key) => self.asset_check_selection.contains(key),
        }
    }
}

/// Backfill lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    /// Still launching or executing
    Requested,
    /// All targets finished
    Completed,
    /// Gave up
    Failed,
    /// Cancelled
    Canceled,
}

/// One entity targeted by a backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillTarget {
    /// Targeted entity
    pub key: EntityKey,

    /// Targeted partitions; `None` means every partition
    #[serde(default)]
    pub partitions: Option<BTreeSet<String>>,
}

/// A batch request over many entities and partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillRecord {
    /// Backfill id
    pub backfill_id: String,

    /// Current status
    pub status: BackfillStatus,

    /// Targets
    pub targets: Vec<BackfillTarget>,
}
