//! The entity dependency graph.
//!
//! Built once from a [`GraphDefinition`] when definitions load. Validates
//! that every dependency exists and that there are no cycles, and fixes a
//! stable topological order (parents before children, ties broken by key).

use crate::mapping::PartitionMapping;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tickwise_core::{
    AssetCheckKey, AssetKey, AutomationCondition, EntityKey, PartitionsDefinition, PartitionsError,
    SubsetRepr,
};

/// Code location used when a definition does not name one.
pub const DEFAULT_CODE_LOCATION: &str = "default";

/// Errors from building or querying the graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// No entity with this key
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityKey),

    /// A dependency names an entity that is not defined
    #[error("{child} depends on undefined {parent}")]
    UnknownDependency {
        /// Dependent entity
        child: EntityKey,
        /// Missing dependency
        parent: EntityKey,
    },

    /// The same key is defined twice
    #[error("duplicate definition of {0}")]
    DuplicateEntity(EntityKey),

    /// Dependencies form a cycle
    #[error("dependency cycle: {}", format_path(.0))]
    Cycle(Vec<EntityKey>),

    /// No 1:1 partition correspondence across an edge
    #[error("ambiguous partition mapping from {parent} to {child}")]
    AmbiguousPartitionMapping {
        /// Dependent entity
        child: EntityKey,
        /// Dependency
        parent: EntityKey,
    },

    /// An entity's partitions definition is malformed
    #[error("invalid partitions for {key}: {source}")]
    InvalidPartitions {
        /// Entity
        key: EntityKey,
        /// What is wrong
        source: PartitionsError,
    },
}

fn format_path(path: &[EntityKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn default_code_location() -> String {
    DEFAULT_CODE_LOCATION.to_string()
}

fn default_executable() -> bool {
    true
}

/// An upstream dependency of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDep {
    /// Upstream asset
    pub key: AssetKey,

    /// Explicit mapping; inferred from the partitions definitions when absent
    #[serde(default)]
    pub partition_mapping: Option<PartitionMapping>,
}

impl AssetDep {
    /// Dependency with an inferred mapping.
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            partition_mapping: None,
        }
    }

    /// Dependency with an explicit mapping.
    pub fn with_mapping(key: impl Into<AssetKey>, mapping: PartitionMapping) -> Self {
        Self {
            key: key.into(),
            partition_mapping: Some(mapping),
        }
    }
}

/// Definition of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetNode {
    /// Asset key
    pub key: AssetKey,

    /// Upstream assets
    #[serde(default)]
    pub deps: Vec<AssetDep>,

    /// Partition space; `None` when unpartitioned
    #[serde(default)]
    pub partitions: Option<PartitionsDefinition>,

    /// Declared code version
    #[serde(default)]
    pub code_version: Option<String>,

    /// Condition deciding when to request this asset
    #[serde(default)]
    pub automation_condition: Option<AutomationCondition>,

    /// Code location that defines the asset
    #[serde(default = "default_code_location")]
    pub code_location: String,

    /// Whether the engine can launch runs for it (false for source assets)
    #[serde(default = "default_executable")]
    pub executable: bool,
}

impl AssetNode {
    /// An unpartitioned, executable asset with no deps or condition.
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            deps: Vec::new(),
            partitions: None,
            code_version: None,
            automation_condition: None,
            code_location: default_code_location(),
            executable: true,
        }
    }

    /// Add a dependency.
    pub fn with_dep(mut self, dep: AssetDep) -> Self {
        self.deps.push(dep);
        self
    }

    /// Set the partitions definition.
    pub fn with_partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Set the code version.
    pub fn with_code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }

    /// Set the automation condition.
    pub fn with_condition(mut self, condition: AutomationCondition) -> Self {
        self.automation_condition = Some(condition);
        self
    }

    /// Set the code location.
    pub fn with_code_location(mut self, location: impl Into<String>) -> Self {
        self.code_location = location.into();
        self
    }

    /// Mark as not executable.
    pub fn non_executable(mut self) -> Self {
        self.executable = false;
        self
    }
}

/// Definition of one asset check. Checks are unpartitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckNode {
    /// Check key; its asset must be defined
    pub key: AssetCheckKey,

    /// Condition deciding when to request this check
    #[serde(default)]
    pub automation_condition: Option<AutomationCondition>,
}

/// Loadable graph definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Assets
    #[serde(default)]
    pub assets: Vec<AssetNode>,

    /// Asset checks
    #[serde(default)]
    pub checks: Vec<CheckNode>,
}

impl GraphDefinition {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Resolved attributes of one entity.
#[derive(Debug, Clone)]
pub struct EntityNode {
    /// Entity key
    pub key: EntityKey,

    /// Partition space
    pub partitions: Option<PartitionsDefinition>,

    /// Declared code version
    pub code_version: Option<String>,

    /// Condition tree, if the entity is automated
    pub condition: Option<AutomationCondition>,

    /// Code location
    pub code_location: String,

    /// Whether runs can be launched for it
    pub executable: bool,
}

impl EntityNode {
    /// Representation of subsets of this entity.
    pub fn repr(&self) -> SubsetRepr {
        SubsetRepr::of(self.partitions.as_ref())
    }
}

/// Validated, immutable dependency graph of assets and checks.
#[derive(Debug, Clone)]
pub struct AssetGraph {
    nodes: BTreeMap<EntityKey, EntityNode>,
    /// entity -> [parents]
    parents: BTreeMap<EntityKey, Vec<EntityKey>>,
    /// entity -> [children]
    children: BTreeMap<EntityKey, Vec<EntityKey>>,
    /// (child, parent) -> explicit mapping
    explicit_mappings: BTreeMap<(EntityKey, EntityKey), PartitionMapping>,
    /// Parents before children
    toposorted: Vec<EntityKey>,
}

impl AssetGraph {
    /// Validate definitions and build the graph.
    pub fn build(definition: GraphDefinition) -> Result<Self, GraphError> {
        let mut nodes = BTreeMap::new();
        let mut parents: BTreeMap<EntityKey, Vec<EntityKey>> = BTreeMap::new();
        let mut explicit_mappings = BTreeMap::new();

        for asset in &definition.assets {
            let key = EntityKey::Asset(asset.key.clone());
            if let Some(partitions) = &asset.partitions {
                partitions
                    .validate()
                    .map_err(|source| GraphError::InvalidPartitions {
                        key: key.clone(),
                        source,
                    })?;
            }
            let node = EntityNode {
                key: key.clone(),
                partitions: asset.partitions.clone(),
                code_version: asset.code_version.clone(),
                condition: asset.automation_condition.clone(),
                code_location: asset.code_location.clone(),
                executable: asset.executable,
            };
            if nodes.insert(key.clone(), node).is_some() {
                return Err(GraphError::DuplicateEntity(key));
            }

            let mut deps = Vec::new();
            for dep in &asset.deps {
                let parent = EntityKey::Asset(dep.key.clone());
                if let Some(mapping) = &dep.partition_mapping {
                    explicit_mappings.insert((key.clone(), parent.clone()), mapping.clone());
                }
                if !deps.contains(&parent) {
                    deps.push(parent);
                }
            }
            parents.insert(key, deps);
        }

        for check in &definition.checks {
            let key = EntityKey::Check(check.key.clone());
            let asset_key = EntityKey::Asset(check.key.asset_key.clone());
            let asset = nodes
                .get(&asset_key)
                .ok_or_else(|| GraphError::UnknownDependency {
                    child: key.clone(),
                    parent: asset_key.clone(),
                })?;
            let node = EntityNode {
                key: key.clone(),
                partitions: None,
                code_version: None,
                condition: check.automation_condition.clone(),
                code_location: asset.code_location.clone(),
                executable: asset.executable,
            };
            if nodes.insert(key.clone(), node).is_some() {
                return Err(GraphError::DuplicateEntity(key));
            }
            parents.insert(key, vec![asset_key]);
        }

        let mut children: BTreeMap<EntityKey, Vec<EntityKey>> =
            nodes.keys().map(|k| (k.clone(), Vec::new())).collect();
        for (child, deps) in &parents {
            for parent in deps {
                let Some(list) = children.get_mut(parent) else {
                    return Err(GraphError::UnknownDependency {
                        child: child.clone(),
                        parent: parent.clone(),
                    });
                };
                list.push(child.clone());
            }
        }

        let mut graph = Self {
            nodes,
            parents,
            children,
            explicit_mappings,
            toposorted: Vec::new(),
        };

        if let Some(cycle) = graph.detect_cycle() {
            return Err(GraphError::Cycle(cycle));
        }
        graph.toposorted = graph.topological_sort();
        Ok(graph)
    }

    /// Find any cycle using DFS.
    fn detect_cycle(&self) -> Option<Vec<EntityKey>> {
        let mut visited = HashSet::new();
        for key in self.nodes.keys() {
            if visited.contains(key) {
                continue;
            }
            let mut recursion_stack = HashSet::new();
            let mut path = Vec::new();
            if let Some(cycle) = self.find_cycle(key, &mut visited, &mut recursion_stack, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle(
        &self,
        node: &EntityKey,
        visited: &mut HashSet<EntityKey>,
        recursion_stack: &mut HashSet<EntityKey>,
        path: &mut Vec<EntityKey>,
    ) -> Option<Vec<EntityKey>> {
        visited.insert(node.clone());
        recursion_stack.insert(node.clone());
        path.push(node.clone());

        for parent in self.parents(node) {
            if !visited.contains(parent) {
                if let Some(cycle) = self.find_cycle(parent, visited, recursion_stack, path) {
                    return Some(cycle);
                }
            } else if recursion_stack.contains(parent) {
                let start = path.iter().position(|k| k == parent).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(parent.clone());
                return Some(cycle);
            }
        }

        path.pop();
        recursion_stack.remove(node);
        None
    }

    /// Kahn's algorithm over an ordered ready set, so the order is stable.
    fn topological_sort(&self) -> Vec<EntityKey> {
        let mut remaining: BTreeMap<&EntityKey, usize> = self
            .nodes
            .keys()
            .map(|k| (k, self.parents(k).len()))
            .collect();
        let mut ready: BTreeSet<&EntityKey> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(key) = ready.pop_first() {
            sorted.push(key.clone());
            for child in self.children(key) {
                if let Some(n) = remaining.get_mut(child) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(child);
                    }
                }
            }
        }
        sorted
    }

    /// Entity attributes.
    pub fn node(&self, key: &EntityKey) -> Result<&EntityNode, GraphError> {
        self.nodes
            .get(key)
            .ok_or_else(|| GraphError::UnknownEntity(key.clone()))
    }

    /// Whether the entity is defined.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// All entity keys, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> + '_ {
        self.nodes.keys()
    }

    /// All entity keys, parents before children.
    pub fn toposorted_keys(&self) -> &[EntityKey] {
        &self.toposorted
    }

    /// Keys of entities that carry a condition, parents before children.
    pub fn automated_keys(&self) -> Vec<EntityKey> {
        self.toposorted
            .iter()
            .filter(|k| self.nodes.get(*k).is_some_and(|n| n.condition.is_some()))
            .cloned()
            .collect()
    }

    /// Direct parents. Empty for an unknown key.
    pub fn parents(&self, key: &EntityKey) -> &[EntityKey] {
        self.parents.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct children. Empty for an unknown key.
    pub fn children(&self, key: &EntityKey) -> &[EntityKey] {
        self.children.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Partition space of an entity.
    pub fn partitions_definition(&self, key: &EntityKey) -> Result<Option<&PartitionsDefinition>, GraphError> {
        Ok(self.node(key)?.partitions.as_ref())
    }

    /// Condition tree of an entity.
    pub fn condition_tree(&self, key: &EntityKey) -> Result<Option<&AutomationCondition>, GraphError> {
        Ok(self.node(key)?.condition.as_ref())
    }

    /// Mapping from `parent` partitions to `child` partitions along an edge.
    ///
    /// Without an explicit mapping: identity when both sides share a
    /// definition (or are both unpartitioned), all-partitions when exactly
    /// one side is partitioned, ambiguous otherwise.
    pub fn partition_mapping(
        &self,
        child: &EntityKey,
        parent: &EntityKey,
    ) -> Result<PartitionMapping, GraphError> {
        if !self.parents(child).contains(parent) {
            return Err(GraphError::UnknownDependency {
                child: child.clone(),
                parent: parent.clone(),
            });
        }
        let child_partitions = &self.node(child)?.partitions;
        let parent_partitions = &self.node(parent)?.partitions;
        let ambiguous = || GraphError::AmbiguousPartitionMapping {
            child: child.clone(),
            parent: parent.clone(),
        };

        if let Some(mapping) = self.explicit_mappings.get(&(child.clone(), parent.clone())) {
            let same_repr =
                SubsetRepr::of(child_partitions.as_ref()) == SubsetRepr::of(parent_partitions.as_ref());
            if *mapping == PartitionMapping::Identity && !same_repr {
                return Err(ambiguous());
            }
            return Ok(mapping.clone());
        }

        match (child_partitions, parent_partitions) {
            (None, None) => Ok(PartitionMapping::Identity),
            (Some(c), Some(p)) if c == p => Ok(PartitionMapping::Identity),
            (None, Some(_)) | (Some(_), None) => Ok(PartitionMapping::AllPartitions),
            _ => Err(ambiguous()),
        }
    }

    /// Whether `parent` can be materialized in the same run as `child`.
    pub fn executable_in_same_run(&self, child: &EntityKey, parent: &EntityKey) -> bool {
        if child == parent {
            return true;
        }
        if !self.parents(child).contains(parent) {
            return false;
        }
        let (Some(c), Some(p)) = (self.nodes.get(child), self.nodes.get(parent)) else {
            return false;
        };

        // A check always runs with its own asset.
        if let EntityKey::Check(check) = child {
            if EntityKey::Asset(check.asset_key.clone()) == *parent {
                return c.executable && p.executable;
            }
        }

        c.executable
            && p.executable
            && c.code_location == p.code_location
            && c.partitions == p.partitions
            && self.partition_mapping(child, parent) == Ok(PartitionMapping::Identity)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no entities.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwise_core::AutomationCondition as C;

    fn key(s: &str) -> EntityKey {
        AssetKey::from(s).into()
    }

    fn daily() -> PartitionsDefinition {
        PartitionsDefinition::daily("2024-01-01T00:00:00Z".parse().unwrap())
    }

    fn diamond() -> GraphDefinition {
        GraphDefinition {
            assets: vec![
                AssetNode::new("d")
                    .with_dep(AssetDep::new("b"))
                    .with_dep(AssetDep::new("c"))
                    .with_condition(C::eager()),
                AssetNode::new("b").with_dep(AssetDep::new("a")),
                AssetNode::new("c").with_dep(AssetDep::new("a")),
                AssetNode::new("a").with_condition(C::missing()),
            ],
            checks: vec![CheckNode {
                key: AssetKey::from("d").check("rows"),
                automation_condition: None,
            }],
        }
    }

    #[test]
    fn test_topological_order_is_stable() {
        let graph = AssetGraph::build(diamond()).unwrap();
        let order: Vec<String> = graph.toposorted_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d", "d#rows"]);
        assert_eq!(graph.automated_keys(), vec![key("a"), key("d")]);
    }

    #[test]
    fn test_parents_and_children() {
        let graph = AssetGraph::build(diamond()).unwrap();
        assert_eq!(graph.parents(&key("d")), &[key("b"), key("c")]);
        assert_eq!(graph.children(&key("a")), &[key("b"), key("c")]);
        let check: EntityKey = AssetKey::from("d").check("rows").into();
        assert_eq!(graph.parents(&check), &[key("d")]);
        assert!(graph.children(&key("d")).contains(&check));
    }

    #[test]
    fn test_cycle_detected() {
        let def = GraphDefinition {
            assets: vec![
                AssetNode::new("a").with_dep(AssetDep::new("b")),
                AssetNode::new("b").with_dep(AssetDep::new("a")),
            ],
            checks: vec![],
        };
        assert!(matches!(AssetGraph::build(def), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let def = GraphDefinition {
            assets: vec![AssetNode::new("a").with_dep(AssetDep::new("missing"))],
            checks: vec![],
        };
        assert!(matches!(
            AssetGraph::build(def),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_empty_multi_partitions_rejected() {
        let def = GraphDefinition {
            assets: vec![AssetNode::new("a").with_partitions(PartitionsDefinition::Multi { dimensions: vec![] })],
            checks: vec![],
        };
        assert!(matches!(
            AssetGraph::build(def),
            Err(GraphError::InvalidPartitions { .. })
        ));
    }

    #[test]
    fn test_default_mappings() {
        let statics = PartitionsDefinition::static_keys(["x", "y"]);
        let def = GraphDefinition {
            assets: vec![
                AssetNode::new("daily").with_partitions(daily()),
                AssetNode::new("other_daily")
                    .with_partitions(daily())
                    .with_dep(AssetDep::new("daily")),
                AssetNode::new("plain").with_dep(AssetDep::new("daily")),
                AssetNode::new("static")
                    .with_partitions(statics)
                    .with_dep(AssetDep::new("daily")),
            ],
            checks: vec![],
        };
        let graph = AssetGraph::build(def).unwrap();
        assert_eq!(
            graph.partition_mapping(&key("other_daily"), &key("daily")),
            Ok(PartitionMapping::Identity)
        );
        assert_eq!(
            graph.partition_mapping(&key("plain"), &key("daily")),
            Ok(PartitionMapping::AllPartitions)
        );
        assert!(matches!(
            graph.partition_mapping(&key("static"), &key("daily")),
            Err(GraphError::AmbiguousPartitionMapping { .. })
        ));
    }

    #[test]
    fn test_executable_in_same_run() {
        let def = GraphDefinition {
            assets: vec![
                AssetNode::new("parent"),
                AssetNode::new("child").with_dep(AssetDep::new("parent")),
                AssetNode::new("remote")
                    .with_code_location("elsewhere")
                    .with_dep(AssetDep::new("parent")),
                AssetNode::new("source").non_executable(),
                AssetNode::new("downstream").with_dep(AssetDep::new("source")),
            ],
            checks: vec![CheckNode {
                key: AssetKey::from("parent").check("ok"),
                automation_condition: None,
            }],
        };
        let graph = AssetGraph::build(def).unwrap();
        assert!(graph.executable_in_same_run(&key("child"), &key("parent")));
        assert!(graph.executable_in_same_run(&key("child"), &key("child")));
        assert!(!graph.executable_in_same_run(&key("remote"), &key("parent")));
        assert!(!graph.executable_in_same_run(&key("downstream"), &key("source")));
        assert!(!graph.executable_in_same_run(&key("parent"), &key("child")));
        let check: EntityKey = AssetKey::from("parent").check("ok").into();
        assert!(graph.executable_in_same_run(&check, &key("parent")));
    }

    #[test]
    fn test_definition_from_json() {
        let json = r#"{
            "assets": [
                {"key": "raw/orders"},
                {"key": "orders", "deps": [{"key": "raw/orders"}],
                 "automation_condition": {"type": "missing"}}
            ]
        }"#;
        let graph = AssetGraph::build(GraphDefinition::from_json(json).unwrap()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph.condition_tree(&key("orders")).unwrap(),
            Some(&C::missing())
        );
        assert_eq!(graph.node(&key("orders")).unwrap().code_location, "default");
    }
}
