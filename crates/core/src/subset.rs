//! Entity subsets and their set algebra.
//!
//! A subset pairs an entity key with a value in that entity's partition
//! space. All operations are pure; combining subsets of different entities
//! or of different representations fails.

use crate::id::EntityKey;
use crate::partition::SubsetRepr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A partition key, or `None` for an unpartitioned entity.
pub type PartitionSlot = Option<String>;

/// Errors from combining incompatible subsets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubsetError {
    /// Operands belong to different entities
    #[error("cannot combine subsets of {left} and {right}")]
    KeyMismatch {
        /// Left operand key
        left: EntityKey,
        /// Right operand key
        right: EntityKey,
    },

    /// Operands use different partition-space representations
    #[error("partition space mismatch for {key}: {left:?} vs {right:?}")]
    PartitionSpaceMismatch {
        /// Entity key
        key: EntityKey,
        /// Left representation
        left: SubsetRepr,
        /// Right representation
        right: SubsetRepr,
    },
}

/// Membership value of a subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubsetValue {
    /// Unpartitioned entity: present or absent
    Unpartitioned {
        /// Whether the entity is in the subset
        present: bool,
    },
    /// Keys of a static or dynamic space
    Keys {
        /// Member keys
        keys: BTreeSet<String>,
    },
    /// Keys of a time-window space
    TimeWindows {
        /// Member keys
        keys: BTreeSet<String>,
    },
    /// Keys of a multi-dimensional space
    Multi {
        /// Member keys
        keys: BTreeSet<String>,
    },
}

impl SubsetValue {
    /// Empty value in the given representation.
    pub fn empty(repr: SubsetRepr) -> Self {
        Self::from_keys(repr, BTreeSet::new())
    }

    /// Value with the given member keys. For an unpartitioned representation,
    /// any key makes the value present.
    pub fn from_keys(repr: SubsetRepr, keys: BTreeSet<String>) -> Self {
        match repr {
            SubsetRepr::Unpartitioned => SubsetValue::Unpartitioned {
                present: !keys.is_empty(),
            },
            SubsetRepr::Keys => SubsetValue::Keys { keys },
            SubsetRepr::TimeWindows => SubsetValue::TimeWindows { keys },
            SubsetRepr::Multi => SubsetValue::Multi { keys },
        }
    }

    /// Representation of this value.
    pub fn repr(&self) -> SubsetRepr {
        match self {
            SubsetValue::Unpartitioned { .. } => SubsetRepr::Unpartitioned,
            SubsetValue::Keys { .. } => SubsetRepr::Keys,
            SubsetValue::TimeWindows { .. } => SubsetRepr::TimeWindows,
            SubsetValue::Multi { .. } => SubsetRepr::Multi,
        }
    }

    fn keys(&self) -> Option<&BTreeSet<String>> {
        match self {
            SubsetValue::Unpartitioned { .. } => None,
            SubsetValue::Keys { keys }
            | SubsetValue::TimeWindows { keys }
            | SubsetValue::Multi { keys } => Some(keys),
        }
    }
}

/// A set of partitions (or presence) of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySubset {
    key: EntityKey,
    value: SubsetValue,
}

impl EntitySubset {
    /// Create from a key and value.
    pub fn new(key: EntityKey, value: SubsetValue) -> Self {
        Self { key, value }
    }

    /// The empty subset in a given representation.
    pub fn empty(key: EntityKey, repr: SubsetRepr) -> Self {
        Self::new(key, SubsetValue::empty(repr))
    }

    /// The "present" subset of an unpartitioned entity.
    pub fn present(key: EntityKey) -> Self {
        Self::new(key, SubsetValue::Unpartitioned { present: true })
    }

    /// Subset with the given member partitions.
    pub fn from_keys<I, S>(key: EntityKey, repr: SubsetRepr, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            key,
            SubsetValue::from_keys(repr, keys.into_iter().map(Into::into).collect()),
        )
    }

    /// Entity key.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Internal value.
    pub fn value(&self) -> &SubsetValue {
        &self.value
    }

    /// Representation of the value.
    pub fn repr(&self) -> SubsetRepr {
        self.value.repr()
    }

    /// Whether no partition (or absence) is selected.
    pub fn is_empty(&self) -> bool {
        match &self.value {
            SubsetValue::Unpartitioned { present } => !present,
            other => other.keys().map_or(true, BTreeSet::is_empty),
        }
    }

    /// Number of selected partitions (0 or 1 when unpartitioned).
    pub fn size(&self) -> usize {
        match &self.value {
            SubsetValue::Unpartitioned { present } => usize::from(*present),
            other => other.keys().map_or(0, BTreeSet::len),
        }
    }

    /// Membership test. Unpartitioned subsets answer for `None`.
    pub fn contains(&self, partition: Option<&str>) -> bool {
        match (&self.value, partition) {
            (SubsetValue::Unpartitioned { present }, None) => *present,
            (SubsetValue::Unpartitioned { .. }, Some(_)) => false,
            (_, None) => false,
            (other, Some(k)) => other.keys().is_some_and(|keys| keys.contains(k)),
        }
    }

    /// Selected partition keys, in order. Empty for unpartitioned subsets.
    pub fn partition_keys(&self) -> impl Iterator<Item = &String> + '_ {
        self.value.keys().into_iter().flatten()
    }

    /// Selected slots: `None` for a present unpartitioned entity, one
    /// `Some(key)` per selected partition otherwise.
    pub fn slots(&self) -> Vec<PartitionSlot> {
        match &self.value {
            SubsetValue::Unpartitioned { present: true } => vec![None],
            SubsetValue::Unpartitioned { present: false } => Vec::new(),
            _ => self.partition_keys().cloned().map(Some).collect(),
        }
    }

    /// Same partitions, relabelled to another entity with the same representation.
    pub fn with_key(&self, key: EntityKey) -> Self {
        Self::new(key, self.value.clone())
    }

    fn check_compatible(&self, other: &Self) -> Result<(), SubsetError> {
        if self.key != other.key {
            return Err(SubsetError::KeyMismatch {
                left: self.key.clone(),
                right: other.key.clone(),
            });
        }
        if self.repr() != other.repr() {
            return Err(SubsetError::PartitionSpaceMismatch {
                key: self.key.clone(),
                left: self.repr(),
                right: other.repr(),
            });
        }
        Ok(())
    }

    fn combine(
        &self,
        other: &Self,
        present: impl Fn(bool, bool) -> bool,
        keys: impl Fn(&BTreeSet<String>, &BTreeSet<String>) -> BTreeSet<String>,
    ) -> Result<Self, SubsetError> {
        self.check_compatible(other)?;
        let value = match (&self.value, &other.value) {
            (SubsetValue::Unpartitioned { present: a }, SubsetValue::Unpartitioned { present: b }) => {
                SubsetValue::Unpartitioned {
                    present: present(*a, *b),
                }
            }
            (left, right) => {
                let empty = BTreeSet::new();
                let l = left.keys().unwrap_or(&empty);
                let r = right.keys().unwrap_or(&empty);
                SubsetValue::from_keys(left.repr(), keys(l, r))
            }
        };
        Ok(Self::new(self.key.clone(), value))
    }

    /// Set union.
    pub fn union(&self, other: &Self) -> Result<Self, SubsetError> {
        self.combine(other, |a, b| a || b, |l, r| l.union(r).cloned().collect())
    }

    /// Set intersection.
    pub fn intersect(&self, other: &Self) -> Result<Self, SubsetError> {
        self.combine(other, |a, b| a && b, |l, r| l.intersection(r).cloned().collect())
    }

    /// Set difference `self − other`.
    pub fn subtract(&self, other: &Self) -> Result<Self, SubsetError> {
        self.combine(other, |a, b| a && !b, |l, r| l.difference(r).cloned().collect())
    }

    /// Whether every member of `self` is in `other`.
    pub fn is_subset_of(&self, other: &Self) -> Result<bool, SubsetError> {
        Ok(self.subtract(other)?.is_empty())
    }
}

impl std::fmt::Display for EntitySubset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            SubsetValue::Unpartitioned { present } => {
                write!(f, "{}[{}]", self.key, if *present { "present" } else { "absent" })
            }
            other => {
                let keys: Vec<&str> = other.keys().into_iter().flatten().map(String::as_str).collect();
                write!(f, "{}{{{}}}", self.key, keys.join(", "))
            }
        }
    }
}
