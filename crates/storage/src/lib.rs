//! Storage abstraction and implementations for Tickwise.
//!
//! Two stores back a tick: the read-only event/run log consulted by
//! conditions, and the cursor store that carries evaluation state from one
//! tick to the next. Both are trait-based; this crate ships in-memory
//! implementations and a JSON-file cursor store.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;

pub use trait_::{CursorStore, EventStore, Result, StorageError};
pub use memory::{EventLogSnapshot, MemoryCursorStore, MemoryEventStore};
pub use json_storage::JsonCursorStore;
