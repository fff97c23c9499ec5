//! Persisted evaluation state carried from one tick to the next.

use crate::id::{ConditionId, EntityKey};
use crate::record::StorageId;
use crate::subset::EntitySubset;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot used to detect what changed since the previous tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalContext {
    /// Evaluation time of the snapshot
    pub effective_dt: Time,

    /// Event log high-water mark at that time
    pub last_event_id: StorageId,
}

/// Per-node cursor value. Its meaning depends on the condition kind.
///
/// Unknown variants written by other versions deserialize to `Unknown`
/// rather than failing the whole cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cursor {
    /// Code version seen on the previous evaluation
    CodeVersion {
        /// The version, if the entity declares one
        #[serde(default)]
        version: Option<String>,
    },
    /// Id of the whole condition tree; written but not read
    ConditionTreeId {
        /// Tree id
        id: ConditionId,
    },
    /// A previously computed subset
    Subset {
        /// The subset
        subset: EntitySubset,
    },
    /// A point in time
    Timestamp {
        /// The time
        at: Time,
    },
    /// A cursor shape this version does not know
    #[serde(other)]
    Unknown,
}

/// Everything persisted for one root entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCursor {
    /// Unique id of the root condition when this was written
    pub condition_tree_id: ConditionId,

    /// Subset requested for the entity on that tick
    pub previous_requested_subset: EntitySubset,

    /// Evaluation time of that tick
    pub effective_timestamp: Time,

    /// Event log snapshot of that tick
    pub temporal_context: TemporalContext,

    /// Cursor of each node, by unique id
    #[serde(default)]
    pub node_cursors: BTreeMap<ConditionId, Cursor>,
}

/// Errors reading or writing serialized cursors.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// Malformed bytes
    #[error("cursor serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cursor state of a whole tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickCursor {
    /// Number of ticks committed so far
    pub evaluation_id: u64,

    /// Evaluation time of the last committed tick
    #[serde(default)]
    pub evaluation_time: Option<Time>,

    /// Per root entity state
    #[serde(default)]
    pub entities: BTreeMap<EntityKey, EntityCursor>,
}

impl TickCursor {
    /// Cursor of one root entity.
    pub fn entity(&self, key: &EntityKey) -> Option<&EntityCursor> {
        self.entities.get(key)
    }

    /// Subset requested for an entity on the previous tick.
    pub fn previous_requested_subset(&self, key: &EntityKey) -> Option<&EntitySubset> {
        self.entities.get(key).map(|c| &c.previous_requested_subset)
    }

    /// Serialize to the stable on-disk form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CursorError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse the on-disk form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CursorError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AssetKey;
    use crate::partition::SubsetRepr;

    fn sample() -> TickCursor {
        let key: EntityKey = AssetKey::from("a").into();
        let id = ConditionId::from_hash(blake3::hash(b"root"));
        let mut node_cursors = BTreeMap::new();
        node_cursors.insert(
            id.clone(),
            Cursor::CodeVersion {
                version: Some("v1".into()),
            },
        );
        node_cursors.insert(
            ConditionId::from_hash(blake3::hash(b"since")),
            Cursor::Subset {
                subset: EntitySubset::from_keys(key.clone(), SubsetRepr::Keys, ["x", "y"]),
            },
        );
        let at: Time = "2024-01-02T03:04:05.123456789Z".parse().unwrap();
        let mut entities = BTreeMap::new();
        entities.insert(
            key.clone(),
            EntityCursor {
                condition_tree_id: id,
                previous_requested_subset: EntitySubset::from_keys(key, SubsetRepr::Keys, ["x"]),
                effective_timestamp: at,
                temporal_context: TemporalContext {
                    effective_dt: at,
                    last_event_id: 42,
                },
                node_cursors,
            },
        );
        TickCursor {
            evaluation_id: 3,
            evaluation_time: Some(at),
            entities,
        }
    }

    #[test]
    fn test_cursor_bytes_are_stable() {
        let bytes = sample().to_bytes().unwrap();
        let parsed = TickCursor::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, sample());
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_cursor_variants_tolerated() {
        let json = r#"{"type":"some_future_shape","payload":1}"#;
        let cursor: Cursor = serde_json::from_str(json).unwrap();
        assert_eq!(cursor, Cursor::Unknown);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"evaluation_id":1,"legacy_field":"x"}"#;
        let cursor = TickCursor::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(cursor.evaluation_id, 1);
        assert!(cursor.entities.is_empty());
    }
}
