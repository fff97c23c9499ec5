//! Partition mappings across dependency edges.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tickwise_core::{EntitySubset, SubsetError};

/// How partitions of a parent correspond to partitions of a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionMapping {
    /// Same key on both sides
    Identity,
    /// Every child partition depends on every parent partition
    AllPartitions,
    /// Every child partition depends on the parent's last partition
    LastPartition,
    /// Explicit table from parent key to child keys
    StaticMap {
        /// Parent key -> child keys
        mapping: BTreeMap<String, BTreeSet<String>>,
    },
}

/// One side of an edge: its full subset and its keys in definition order.
#[derive(Debug, Clone, Copy)]
pub struct MappingSide<'a> {
    /// All partitions that exist
    pub full: &'a EntitySubset,
    /// Partition keys in definition order (empty when unpartitioned)
    pub ordered_keys: &'a [String],
}

impl MappingSide<'_> {
    fn last(&self) -> EntitySubset {
        match self.ordered_keys.last() {
            Some(last) => EntitySubset::from_keys(self.full.key().clone(), self.full.repr(), [last.as_str()]),
            None => self.full.clone(),
        }
    }

    fn empty(&self) -> EntitySubset {
        EntitySubset::empty(self.full.key().clone(), self.full.repr())
    }

    fn with_keys<'k>(&self, keys: impl IntoIterator<Item = &'k String>) -> Result<EntitySubset, SubsetError> {
        let subset = EntitySubset::from_keys(self.full.key().clone(), self.full.repr(), keys.into_iter().cloned());
        subset.intersect(self.full)
    }
}

impl PartitionMapping {
    /// Parent partitions that the given child partitions depend on.
    pub fn parent_subset(
        &self,
        child_subset: &EntitySubset,
        parent: MappingSide<'_>,
    ) -> Result<EntitySubset, SubsetError> {
        if child_subset.is_empty() {
            return Ok(parent.empty());
        }
        match self {
            PartitionMapping::Identity => child_subset.with_key(parent.full.key().clone()).intersect(parent.full),
            PartitionMapping::AllPartitions => Ok(parent.full.clone()),
            PartitionMapping::LastPartition => Ok(parent.last()),
            PartitionMapping::StaticMap { mapping } => {
                let keys = mapping
                    .iter()
                    .filter(|(_, children)| children.iter().any(|c| child_subset.contains(Some(c))))
                    .map(|(p, _)| p);
                parent.with_keys(keys)
            }
        }
    }

    /// Child partitions that depend on the given parent partitions.
    pub fn child_subset(
        &self,
        parent_subset: &EntitySubset,
        parent: MappingSide<'_>,
        child: MappingSide<'_>,
    ) -> Result<EntitySubset, SubsetError> {
        if parent_subset.is_empty() {
            return Ok(child.empty());
        }
        match self {
            PartitionMapping::Identity => parent_subset.with_key(child.full.key().clone()).intersect(child.full),
            PartitionMapping::AllPartitions => Ok(child.full.clone()),
            PartitionMapping::LastPartition => {
                let last = parent.last();
                if last.is_subset_of(parent_subset)? {
                    Ok(child.full.clone())
                } else {
                    Ok(child.empty())
                }
            }
            PartitionMapping::StaticMap { mapping } => {
                let keys = parent_subset
                    .partition_keys()
                    .filter_map(|p| mapping.get(p))
                    .flatten();
                child.with_keys(keys)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwise_core::{AssetKey, EntityKey, SubsetRepr};

    fn key(s: &str) -> EntityKey {
        AssetKey::from(s).into()
    }

    fn subset(entity: &str, keys: &[&str]) -> EntitySubset {
        EntitySubset::from_keys(key(entity), SubsetRepr::Keys, keys.iter().copied())
    }

    fn strings(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_identity_relabels_and_clips() {
        let parent_full = subset("p", &["a", "b"]);
        let parent_keys = strings(&["a", "b"]);
        let side = MappingSide { full: &parent_full, ordered_keys: &parent_keys };
        let mapped = PartitionMapping::Identity
            .parent_subset(&subset("c", &["a", "z"]), side)
            .unwrap();
        assert_eq!(mapped, subset("p", &["a"]));
    }

    #[test]
    fn test_last_partition() {
        let parent_full = subset("p", &["a", "b"]);
        let parent_keys = strings(&["a", "b"]);
        let child_full = EntitySubset::present(key("c"));
        let parent = MappingSide { full: &parent_full, ordered_keys: &parent_keys };
        let child = MappingSide { full: &child_full, ordered_keys: &[] };

        let up = PartitionMapping::LastPartition.parent_subset(&child_full, parent).unwrap();
        assert_eq!(up, subset("p", &["b"]));

        let down = PartitionMapping::LastPartition
            .child_subset(&subset("p", &["a"]), parent, child)
            .unwrap();
        assert!(down.is_empty());
        let down = PartitionMapping::LastPartition
            .child_subset(&subset("p", &["b"]), parent, child)
            .unwrap();
        assert_eq!(down, child_full);
    }

    #[test]
    fn test_static_map_both_directions() {
        let mut table = BTreeMap::new();
        table.insert("eu".to_string(), ["de", "fr"].iter().map(|s| s.to_string()).collect());
        table.insert("us".to_string(), ["ny"].iter().map(|s| s.to_string()).collect());
        let mapping = PartitionMapping::StaticMap { mapping: table };

        let parent_full = subset("p", &["eu", "us"]);
        let child_full = subset("c", &["de", "fr", "ny"]);
        let parent_keys = strings(&["eu", "us"]);
        let child_keys = strings(&["de", "fr", "ny"]);
        let parent = MappingSide { full: &parent_full, ordered_keys: &parent_keys };
        let child = MappingSide { full: &child_full, ordered_keys: &child_keys };

        let up = mapping.parent_subset(&subset("c", &["fr"]), parent).unwrap();
        assert_eq!(up, subset("p", &["eu"]));
        let down = mapping.child_subset(&subset("p", &["eu"]), parent, child).unwrap();
        assert_eq!(down, subset("c", &["de", "fr"]));
    }
}
