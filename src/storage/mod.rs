//! Storage backends for durable state
//!
//! This module provides a trait-based abstraction over the three persisted
//! tables: the machine inventory, the metric definitions and the violation log.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database via sqlx
//! - **In-Memory**: No persistence, for tests or `backend = "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use metric_sentinel::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./sentinel.db").await?;
//!     let definitions = backend.load_definitions().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use schema::{AbnormalEvent, MetricDefinition, MonitoredMachine, NewAbnormalEvent};

/// Open the backend selected by `config` (in-memory when none is configured).
pub async fn open_backend(config: Option<&StorageConfig>) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        #[cfg(feature = "storage-sqlite")]
        Some(StorageConfig::Sqlite { path }) => {
            let backend = sqlite::SqliteBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        Some(StorageConfig::Sqlite { .. }) => Err(StorageError::ConnectionFailed(
            "sqlite support is not compiled in (enable the storage-sqlite feature)".to_string(),
        )),
        Some(StorageConfig::None) | None => {
            info!("no persistent storage configured, using in-memory backend");
            Ok(Arc::new(memory::MemoryBackend::new()))
        }
    }
}
