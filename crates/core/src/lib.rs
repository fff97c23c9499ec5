//! Tickwise core data models.
//!
//! This crate defines the value types shared by every part of the
//! automation engine: entity keys, partition spaces, subsets, event-log
//! records, condition trees and the cursors persisted between ticks.

#![warn(missing_docs)]

// Identities
mod id;

// Partition spaces and subsets
mod partition;
mod subset;

// Event log
mod record;

// Conditions and their persisted state
mod condition;
mod cursor;

// Re-exports
pub use id::{AssetCheckKey, AssetKey, ConditionId, EntityKey, KeyParseError};

pub use partition::{
    Cadence, DynamicPartitions, PartitionDimension, PartitionsDefinition, PartitionsError, SubsetRepr,
    TimeWindow, TimeWindowPartitions, MULTI_KEY_SEPARATOR,
};
pub use subset::{EntitySubset, PartitionSlot, SubsetError, SubsetValue};

pub use record::{
    AssetEvent, AssetEventKind, BackfillRecord, BackfillStatus, BackfillTarget, CheckEvaluation,
    CheckStatus, RunRecord, RunStatus, StorageId,
};

pub use condition::{AutomationCondition, ConditionKind};
pub use cursor::{Cursor, CursorError, EntityCursor, TemporalContext, TickCursor};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
