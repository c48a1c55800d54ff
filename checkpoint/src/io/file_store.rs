//! Local filesystem store: one file per key.
//!
//! Files are named `f{key}.state` under the store directory (the platform temp
//! dir by default). Keys that are not safe as file names, or too long for one,
//! are stored as `h{sha256(key)}.state` instead. The distinct leading letter
//! keeps hashed names from ever colliding with plain ones.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::io::store::{Store, StoreError};

/// Longest key stored under its own name; the file name stays well below the
/// usual 255-byte limit including the temp suffix.
const MAX_PLAIN_KEY_LEN: usize = 200;

/// Store writing each blob to its own file.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `std::env::temp_dir()`.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::in_temp_dir()
    }
}

impl Store for FileStore {
    fn put(&self, key: &str, blob: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        debug!(key, path = %path.display(), bytes = blob.len(), "file store put");
        write_atomic(&path, blob)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(blob) => Ok(blob),
            Err(err) => {
                debug!(key, path = %path.display(), err = %err, "file store miss");
                Err(StoreError::not_found(key))
            }
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        debug!(key, path = %path.display(), "file store delete");
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }
}

fn file_name(key: &str) -> String {
    let plain = !key.is_empty()
        && key.len() <= MAX_PLAIN_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if plain {
        return format!("f{key}.state");
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("h{}.state", hex::encode(hasher.finalize()))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("state.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}
