//! Key-value persistence for seen lists.
//!
//! The handler only ever talks to [`SeenStore`]; which backend sits behind it
//! is a startup decision driven by `[store]` in the config file.
//!
//! ## Key layout
//!
//! ```text
//! seen:{user}   → compact JSON array, stored as written
//! ```

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{StoreBackend, StoreConfig};

/// Failure raised by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {key} from {path}")]
    Read {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {key} to {path}")]
    Write {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open store directory {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable string-keyed store holding one opaque value per key.
///
/// Writes are unconditional overwrites. There is no compare-and-swap, so
/// concurrent writers to the same key race and the last one to land wins.
#[async_trait]
pub trait SeenStore: Send + Sync {
    /// Fetch the value stored at `key`, or `None` if it was never written.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Replace whatever is stored at `key` with `value`.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;
}

/// Build the backend selected by `config`.
pub async fn open(config: &StoreConfig) -> anyhow::Result<Arc<dyn SeenStore>> {
    let store: Arc<dyn SeenStore> = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; seen lists will not survive a restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::File => Arc::new(FileStore::open(&config.data_dir).await?),
    };
    Ok(store)
}
