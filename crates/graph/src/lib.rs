//! Entity graph and the tick-scoped graph view.
//!
//! [`AssetGraph`] is the validated dependency graph of assets and checks.
//! [`AssetGraphView`] pairs it with the event log for a single tick and
//! answers every structural and state query a condition can ask.

#![warn(missing_docs)]

pub mod graph;
pub mod mapping;
pub mod view;

pub use graph::{
    AssetDep, AssetGraph, AssetNode, CheckNode, EntityNode, GraphDefinition, GraphError,
    DEFAULT_CODE_LOCATION,
};
pub use mapping::{MappingSide, PartitionMapping};
pub use view::{AssetGraphView, ViewError};
