//! Evaluation errors.

use tickwise_core::{EntityKey, SubsetError};
use tickwise_graph::{GraphError, ViewError};
use tickwise_storage::StorageError;

/// Errors that fail the evaluation of one entity.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// A graph view query failed
    #[error("view query failed: {0}")]
    View(ViewError),

    /// Incompatible subsets were combined
    #[error(transparent)]
    Subset(#[from] SubsetError),

    /// A cron schedule or timezone could not be parsed
    #[error("invalid cron schedule {schedule:?}: {reason}")]
    InvalidCron {
        /// The offending schedule (or timezone)
        schedule: String,
        /// What is wrong with it
        reason: String,
    },

    /// No 1:1 partition correspondence across an edge the condition needs
    #[error("ambiguous partition mapping from {parent} to {child}")]
    AmbiguousPartitionMapping {
        /// Dependent entity
        child: EntityKey,
        /// Dependency
        parent: EntityKey,
    },
}

impl EvaluationError {
    /// Whether the failure is a transient storage outage.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(
            self,
            EvaluationError::View(ViewError::Storage(StorageError::Unavailable(_)))
        )
    }
}

impl From<ViewError> for EvaluationError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::Subset(e) => EvaluationError::Subset(e),
            ViewError::Graph(GraphError::AmbiguousPartitionMapping { child, parent }) => {
                EvaluationError::AmbiguousPartitionMapping { child, parent }
            }
            other => EvaluationError::View(other),
        }
    }
}
