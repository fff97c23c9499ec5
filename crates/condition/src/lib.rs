//! Tickwise condition evaluation.
//!
//! Evaluates an entity's [`AutomationCondition`](tickwise_core::AutomationCondition)
//! tree against a tick's [`AssetGraphView`](tickwise_graph::AssetGraphView),
//! producing the subset to request and the cursor to persist.

#![warn(missing_docs)]

mod composite;
pub mod context;
pub mod cron;
pub mod error;
pub mod evaluate;
mod operands;
pub mod requested;
pub mod result;

pub use context::{AutomationContext, RootContext, TickScope};
pub use cron::{parse_timezone, CronSchedule};
pub use error::EvaluationError;
pub use evaluate::{evaluate, evaluate_entity};
pub use requested::RequestedSubsets;
pub use result::{AutomationResult, EntityEvaluation};
