//! Storage backends for the fleet inventory, collected data and events
//!
//! This module provides a trait-based abstraction over the persistence
//! layer used by the pullers and the event center.
//!
//! ## Design
//!
//! - **Trait-based**: `Storage` trait allows swapping implementations
//! - **Async**: All operations are async and can be called from any task
//! - **Upserts**: Collected data is keyed so that re-collecting replaces rows
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database
//! - **In-Memory**: No persistence, for testing or throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use fleetwatch::storage::{Storage, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./fleet.db").await?;
//!     let settings = backend.list_settings().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod settings;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::Storage;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
