//! Durable key/value store abstraction.
//!
//! The [`Store`] trait decouples checkpointing from where blobs live. Backends:
//! [`MemoryStore`](crate::io::memory_store::MemoryStore) (process-local),
//! [`FileStore`](crate::io::file_store::FileStore) (one file per key) and
//! [`RemoteStore`](crate::io::remote_store::RemoteStore) (object storage).

use anyhow::Result;
use thiserror::Error;

/// Failure of [`Store::get`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No blob under the key, or the blob could not be read.
    #[error("no stored object for key '{key}'")]
    NotFound { key: String },
}

impl StoreError {
    pub fn not_found(key: &str) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }
}

/// Uniform blob storage keyed by opaque strings.
///
/// Implementations are shared across identities (`Arc<dyn Store>`), so all
/// methods take `&self`.
pub trait Store: Send + Sync {
    /// Create or overwrite the blob stored under `key`.
    fn put(&self, key: &str, blob: &[u8]) -> Result<()>;

    /// Read the blob stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] when the key is absent or unreadable.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove the blob stored under `key`. Absent keys are not an error.
    fn delete(&self, key: &str) -> Result<()>;
}
