//! Tick-scoped view over the graph and the event log.
//!
//! An [`AssetGraphView`] is built once per tick. It snapshots the event log
//! high-water mark and the dynamic partitions at construction, so every query
//! made during the tick sees the same partition spaces and the same "now".

use crate::graph::{AssetGraph, EntityNode, GraphError};
use crate::mapping::MappingSide;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tickwise_core::{
    CheckStatus, DynamicPartitions, EntityKey, EntitySubset, PartitionSlot, PartitionsDefinition,
    RunRecord, RunStatus, StorageId, SubsetError, SubsetRepr, TemporalContext, Time,
    MULTI_KEY_SEPARATOR,
};
use tickwise_storage::{EventStore, StorageError};
use tracing::debug;

/// Errors from view queries.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// The event log failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Incompatible subsets were combined
    #[error(transparent)]
    Subset(#[from] SubsetError),

    /// Structural query failed
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Read-only façade answering one tick's structural and state queries.
pub struct AssetGraphView {
    graph: Arc<AssetGraph>,
    storage: Arc<dyn EventStore>,
    evaluation_time: Time,
    last_event_id: StorageId,
    /// Keys of every entity, in definition order
    ordered_keys: BTreeMap<EntityKey, Vec<String>>,
    /// Full subset of every entity
    full: BTreeMap<EntityKey, EntitySubset>,
}

impl AssetGraphView {
    /// Snapshot the event log and partition spaces for a tick.
    pub async fn new(
        graph: Arc<AssetGraph>,
        storage: Arc<dyn EventStore>,
        evaluation_time: Time,
    ) -> Result<Self, ViewError> {
        let last_event_id = storage.max_storage_id().await?;

        let names: BTreeSet<&str> = graph
            .keys()
            .filter_map(|k| graph.node(k).ok())
            .filter_map(|n| n.partitions.as_ref())
            .flat_map(PartitionsDefinition::dynamic_names)
            .collect();
        let mut dynamic = DynamicPartitions::new();
        for name in names {
            dynamic.insert(name.to_string(), storage.dynamic_partition_keys(name).await?);
        }

        let mut ordered_keys = BTreeMap::new();
        let mut full = BTreeMap::new();
        for key in graph.keys() {
            let node = graph.node(key)?;
            let subset = match &node.partitions {
                None => EntitySubset::present(key.clone()),
                Some(def) => {
                    let keys = def.partition_keys(evaluation_time, &dynamic);
                    let subset = EntitySubset::from_keys(key.clone(), node.repr(), keys.iter().cloned());
                    ordered_keys.insert(key.clone(), keys);
                    subset
                }
            };
            full.insert(key.clone(), subset);
        }

        debug!(
            "Built graph view at {} (last event id {}, {} entities)",
            evaluation_time,
            last_event_id,
            full.len()
        );

        Ok(Self {
            graph,
            storage,
            evaluation_time,
            last_event_id,
            ordered_keys,
            full,
        })
    }

    /// The underlying graph.
    pub fn graph(&self) -> &AssetGraph {
        &self.graph
    }

    /// Evaluation time of this tick.
    pub fn evaluation_time(&self) -> Time {
        self.evaluation_time
    }

    /// Event log high-water mark at construction.
    pub fn last_event_id(&self) -> StorageId {
        self.last_event_id
    }

    /// Snapshot to hand to the next tick.
    pub fn temporal_context(&self) -> TemporalContext {
        TemporalContext {
            effective_dt: self.evaluation_time,
            last_event_id: self.last_event_id,
        }
    }

    fn node(&self, key: &EntityKey) -> Result<&EntityNode, ViewError> {
        Ok(self.graph.node(key)?)
    }

    fn full(&self, key: &EntityKey) -> Result<&EntitySubset, ViewError> {
        self.full
            .get(key)
            .ok_or_else(|| ViewError::Graph(GraphError::UnknownEntity(key.clone())))
    }

    fn side(&self, key: &EntityKey) -> Result<MappingSide<'_>, ViewError> {
        Ok(MappingSide {
            full: self.full(key)?,
            ordered_keys: self.ordered_keys.get(key).map(Vec::as_slice).unwrap_or(&[]),
        })
    }

    /// Subset built from storage slots, clipped to partitions that exist.
    fn subset_from_slots<'s>(
        &self,
        key: &EntityKey,
        slots: impl IntoIterator<Item = &'s PartitionSlot>,
    ) -> Result<EntitySubset, ViewError> {
        let full = self.full(key)?;
        let subset = match full.repr() {
            SubsetRepr::Unpartitioned => {
                if slots.into_iter().any(Option::is_none) {
                    EntitySubset::present(key.clone())
                } else {
                    self.get_empty_subset(key)?
                }
            }
            repr => EntitySubset::from_keys(key.clone(), repr, slots.into_iter().flatten().cloned()),
        };
        Ok(subset.intersect(full)?)
    }

    /// Slot a run targets for an entity, if any.
    fn run_slot(&self, key: &EntityKey, run: &RunRecord) -> Result<Option<PartitionSlot>, ViewError> {
        Ok(match self.node(key)?.partitions {
            None => Some(None),
            Some(_) => run.partition_key.clone().map(Some),
        })
    }

    // === Subsets ===

    /// The empty subset of an entity.
    pub fn get_empty_subset(&self, key: &EntityKey) -> Result<EntitySubset, ViewError> {
        Ok(EntitySubset::empty(key.clone(), self.node(key)?.repr()))
    }

    /// Every partition of an entity that exists at this tick, or "present".
    pub fn get_full_subset(&self, key: &EntityKey) -> Result<EntitySubset, ViewError> {
        Ok(self.full(key)?.clone())
    }

    /// Current representation of an entity's subsets.
    pub fn subset_repr(&self, key: &EntityKey) -> Result<SubsetRepr, ViewError> {
        Ok(self.node(key)?.repr())
    }

    // === State queries ===

    /// Partitions of `from_subset` never materialized or observed (for a
    /// check: never evaluated).
    pub async fn compute_missing_subset(
        &self,
        key: &EntityKey,
        from_subset: &EntitySubset,
    ) -> Result<EntitySubset, ViewError> {
        let present: Vec<PartitionSlot> = match key {
            EntityKey::Asset(asset) => self.storage.latest_asset_events(asset).await?.into_keys().collect(),
            EntityKey::Check(check) => self
                .storage
                .latest_check_evaluations(check)
                .await?
                .into_iter()
                .filter(|(_, e)| e.status != CheckStatus::InProgress)
                .map(|(slot, _)| slot)
                .collect(),
        };
        let present = self.subset_from_slots(key, &present)?;
        Ok(from_subset.subtract(&present)?)
    }

    /// Partitions targeted by a run that has not finished.
    pub async fn compute_run_in_progress_subset(&self, key: &EntityKey) -> Result<EntitySubset, ViewError> {
        let mut slots = Vec::new();
        for run in self.storage.runs_targeting(key).await? {
            if run.status.is_in_progress() {
                slots.extend(self.run_slot(key, &run)?);
            }
        }
        self.subset_from_slots(key, &slots)
    }

    /// Partitions targeted by a backfill that has not finished.
    pub async fn compute_backfill_in_progress_subset(
        &self,
        key: &EntityKey,
    ) -> Result<EntitySubset, ViewError> {
        let mut result = self.get_empty_subset(key)?;
        for backfill in self.storage.in_progress_backfills().await? {
            for target in backfill.targets.iter().filter(|t| &t.key == key) {
                let targeted = match &target.partitions {
                    None => self.get_full_subset(key)?,
                    Some(partitions) => {
                        let slots: Vec<PartitionSlot> = partitions.iter().cloned().map(Some).collect();
                        self.subset_from_slots(key, &slots)?
                    }
                };
                result = result.union(&targeted)?;
            }
        }
        Ok(result)
    }

    /// Partitions whose most recent run failed.
    pub async fn compute_execution_failed_subset(&self, key: &EntityKey) -> Result<EntitySubset, ViewError> {
        let mut latest: BTreeMap<PartitionSlot, RunStatus> = BTreeMap::new();
        for run in self.storage.runs_targeting(key).await? {
            if let Some(slot) = self.run_slot(key, &run)? {
                latest.insert(slot, run.status);
            }
        }
        let failed: Vec<PartitionSlot> = latest
            .into_iter()
            .filter(|(_, status)| *status == RunStatus::Failure)
            .map(|(slot, _)| slot)
            .collect();
        self.subset_from_slots(key, &failed)
    }

    /// Partitions with an event after the reference snapshot.
    pub async fn compute_updated_since_temporal_context_subset(
        &self,
        key: &EntityKey,
        temporal_context: &TemporalContext,
    ) -> Result<EntitySubset, ViewError> {
        let after = temporal_context.last_event_id;
        let slots: Vec<PartitionSlot> = match key {
            EntityKey::Asset(asset) => self
                .storage
                .asset_events_between(asset, after, self.last_event_id)
                .await?
                .into_iter()
                .map(|e| e.partition)
                .collect(),
            EntityKey::Check(check) => self
                .storage
                .check_evaluations_between(check, after, self.last_event_id)
                .await?
                .into_iter()
                .filter(|e| e.status != CheckStatus::InProgress)
                .map(|e| e.partition)
                .collect(),
        };
        self.subset_from_slots(key, &slots)
    }

    /// Partitions whose data version changed after the reference snapshot.
    ///
    /// An event without a data version counts as a change. Checks carry no
    /// data version, so the result is always empty for them.
    pub async fn compute_data_version_changed_since_temporal_context_subset(
        &self,
        key: &EntityKey,
        temporal_context: &TemporalContext,
    ) -> Result<EntitySubset, ViewError> {
        let EntityKey::Asset(asset) = key else {
            return self.get_empty_subset(key);
        };
        let after = temporal_context.last_event_id;

        let mut newest: BTreeMap<PartitionSlot, Option<String>> = BTreeMap::new();
        for event in self.storage.asset_events_between(asset, after, self.last_event_id).await? {
            newest.insert(event.partition, event.data_version);
        }

        let mut changed = Vec::new();
        for (slot, version) in newest {
            let previous = self
                .storage
                .latest_asset_event_at_or_before(asset, slot.as_deref(), after)
                .await?;
            let is_change = match (previous, &version) {
                (None, _) | (_, None) => true,
                (Some(prev), Some(v)) => prev.data_version.as_ref() != Some(v),
            };
            if is_change {
                changed.push(slot);
            }
        }
        self.subset_from_slots(key, &changed)
    }

    /// Partitions in the latest time window, optionally widened backward.
    ///
    /// Entities without a time dimension are entirely "latest".
    pub fn compute_latest_time_window_subset(
        &self,
        key: &EntityKey,
        lookback: Option<chrono::Duration>,
    ) -> Result<EntitySubset, ViewError> {
        let node = self.node(key)?;
        let Some((dimension, windows)) = node.partitions.as_ref().and_then(|p| p.time_dimension()) else {
            return self.get_full_subset(key);
        };
        let Some(last) = windows.last_window(self.evaluation_time) else {
            return self.get_empty_subset(key);
        };

        let time_keys: BTreeSet<String> = match lookback {
            None => BTreeSet::from([windows.format_key(last.start)]),
            Some(lookback) => {
                let from = last.end.checked_sub_signed(lookback).unwrap_or(Time::MIN_UTC);
                windows
                    .windows(self.evaluation_time)
                    .into_iter()
                    .filter(|w| w.end > from && w.start < last.end)
                    .map(|w| windows.format_key(w.start))
                    .collect()
            }
        };

        let full = self.full(key)?;
        let selected = full.partition_keys().filter(|k| match dimension {
            None => time_keys.contains(*k),
            Some(i) => k
                .split(MULTI_KEY_SEPARATOR)
                .nth(i)
                .is_some_and(|part| time_keys.contains(part)),
        });
        Ok(EntitySubset::from_keys(key.clone(), full.repr(), selected.cloned()))
    }

    /// Partitions of `from_subset` whose latest event came from a run that
    /// satisfies `filter`.
    pub async fn compute_latest_run_matches_subset<F>(
        &self,
        from_subset: &EntitySubset,
        filter: F,
    ) -> Result<EntitySubset, ViewError>
    where
        F: Fn(&RunRecord) -> bool + Send + Sync,
    {
        let key = from_subset.key();
        let run_ids: BTreeMap<PartitionSlot, Option<String>> = match key {
            EntityKey::Asset(asset) => self
                .storage
                .latest_asset_events(asset)
                .await?
                .into_iter()
                .map(|(slot, e)| (slot, e.run_id))
                .collect(),
            EntityKey::Check(check) => self
                .storage
                .latest_check_evaluations(check)
                .await?
                .into_iter()
                .map(|(slot, e)| (slot, e.run_id))
                .collect(),
        };

        let mut matches: HashMap<String, bool> = HashMap::new();
        let mut slots = Vec::new();
        for slot in from_subset.slots() {
            let Some(Some(run_id)) = run_ids.get(&slot) else {
                continue;
            };
            let matched = match matches.get(run_id) {
                Some(m) => *m,
                None => {
                    let m = self.storage.run(run_id).await?.is_some_and(|run| filter(&run));
                    matches.insert(run_id.clone(), m);
                    m
                }
            };
            if matched {
                slots.push(slot);
            }
        }
        self.subset_from_slots(key, &slots)
    }

    /// Check partitions whose latest evaluation has the given status.
    /// Empty for assets.
    pub async fn compute_subset_with_status(
        &self,
        key: &EntityKey,
        status: CheckStatus,
    ) -> Result<EntitySubset, ViewError> {
        let EntityKey::Check(check) = key else {
            return self.get_empty_subset(key);
        };
        let slots: Vec<PartitionSlot> = self
            .storage
            .latest_check_evaluations(check)
            .await?
            .into_iter()
            .filter(|(_, e)| e.status == status)
            .map(|(slot, _)| slot)
            .collect();
        self.subset_from_slots(key, &slots)
    }

    // === Structural queries ===

    /// Partitions of `parent` that `child_subset` depends on.
    pub fn compute_parent_subset(
        &self,
        parent: &EntityKey,
        child_subset: &EntitySubset,
    ) -> Result<EntitySubset, ViewError> {
        let mapping = self.graph.partition_mapping(child_subset.key(), parent)?;
        Ok(mapping.parent_subset(child_subset, self.side(parent)?)?)
    }

    /// Partitions of `child` that depend on `parent_subset`.
    pub fn compute_child_subset(
        &self,
        child: &EntityKey,
        parent_subset: &EntitySubset,
    ) -> Result<EntitySubset, ViewError> {
        let parent = parent_subset.key();
        let mapping = self.graph.partition_mapping(child, parent)?;
        Ok(mapping.child_subset(parent_subset, self.side(parent)?, self.side(child)?)?)
    }
}
