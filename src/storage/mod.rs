//! Storage backends for monitoring history
//!
//! Trait-based persistence boundary for everything the engine writes: uptime
//! samples, tag readings, derived endpoint/tag state, and alerts.
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database, survives restarts
//! - **In-Memory** (fallback): ring buffers, for tests or storage-less runs

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use schema::{Alert, AlertKind, TagReading, UptimeSample};
