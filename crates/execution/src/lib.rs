//! Tick driver: evaluates every automated entity once per tick, commits
//! cursors and hands requests to a sink.

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod result;
pub mod sink;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use dependency::{DependencyResolver, Resolution};
pub use engine::TickEvaluator;
pub use result::{EntityError, TickResult};
pub use sink::{describe, LogSink, RequestSink};
