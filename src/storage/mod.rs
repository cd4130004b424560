//! # Bus Storage
//!
//! Durable state behind the registries, the sync log, and the envelope journal.
//!
//! Every backend implements [`BusStore`]. Registry writes go through the store
//! before the in-memory copy is considered committed; the envelope journal keeps
//! non-terminal envelopes so a restarted bus can pick up where it left off.
//!
//! | Backend    | Use                                          |
//! |------------|----------------------------------------------|
//! | `memory`   | tests and single-process deployments         |
//! | `file`     | JSON snapshots plus JSON-lines append logs   |
//! | `postgres` | shared durable storage (feature `postgres`)  |

pub mod file;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{BusError, Result};
use crate::models::{AbandonmentRecord, EventEnvelope, IntegrationRule, Module, SyncLogEntry};

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

#[async_trait]
pub trait BusStore: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    async fn save_module(&self, module: &Module) -> Result<()>;

    async fn load_modules(&self) -> Result<Vec<Module>>;

    async fn save_rule(&self, rule: &IntegrationRule) -> Result<()>;

    async fn load_rules(&self) -> Result<Vec<IntegrationRule>>;

    /// Append one sync log entry. Entries are never rewritten.
    async fn append_sync_entry(&self, entry: &SyncLogEntry) -> Result<()>;

    /// All sync log entries in append order
    async fn load_sync_entries(&self) -> Result<Vec<SyncLogEntry>>;

    async fn append_abandonment(&self, record: &AbandonmentRecord) -> Result<()>;

    async fn load_abandonments(&self) -> Result<Vec<AbandonmentRecord>>;

    /// Record the latest state of an envelope
    async fn journal_envelope(&self, envelope: &EventEnvelope) -> Result<()>;

    /// Latest journaled copy of every envelope not yet in a terminal state
    async fn load_unfinished_envelopes(&self) -> Result<Vec<EventEnvelope>>;
}

/// Build the store selected by configuration
pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn BusStore>> {
    let store: Arc<dyn BusStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => {
            let directory = config.directory.clone().ok_or_else(|| {
                BusError::ConfigurationError(
                    "storage.directory is required for the file backend".to_string(),
                )
            })?;
            Arc::new(FileStore::open(directory).await?)
        }
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                BusError::ConfigurationError(
                    "storage.database_url is required for the postgres backend".to_string(),
                )
            })?;
            Arc::new(PostgresStore::connect(url, config.max_connections).await?)
        }
        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres => {
            return Err(BusError::ConfigurationError(
                "postgres storage requires the 'postgres' feature".to_string(),
            ))
        }
    };

    info!(backend = store.backend_name(), "Bus storage ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config_builds_memory_store() {
        let store = create_store(&StorageConfig::default()).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_file_backend_requires_directory() {
        let config = StorageConfig {
            backend: StorageBackend::File,
            ..StorageConfig::default()
        };
        assert!(matches!(
            create_store(&config).await,
            Err(BusError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_file_backend_opens_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::File,
            directory: Some(dir.path().join("bus")),
            ..StorageConfig::default()
        };
        let store = create_store(&config).await.unwrap();
        assert_eq!(store.backend_name(), "file");
    }
}
