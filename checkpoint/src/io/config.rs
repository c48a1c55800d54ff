//! Checkpoint configuration stored as TOML (`checkpoint.toml` by default).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::file_store::FileStore;
use crate::io::memory_store::MemoryStore;
use crate::io::remote_store::{HttpObjectClient, RemoteStore};
use crate::io::store::Store;

/// Checkpoint configuration (TOML).
///
/// Missing fields default to a file store in the platform temp dir.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CheckpointConfig {
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    pub runner: RunnerLimits,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    #[default]
    File,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    /// Directory for the file backend. Defaults to the platform temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the S3-compatible endpoint (path-style addressing).
    pub endpoint: String,
    pub bucket: String,
    /// Expire stored objects after this many days. Unset keeps them forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_in_days: Option<u32>,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Environment variable holding a bearer token, if the endpoint needs one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            expire_in_days: None,
            timeout_secs: 30,
            token_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RunnerLimits {
    /// Stop `run_to_completion` after this many steps per invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == Backend::Remote {
            if self.remote.endpoint.trim().is_empty() {
                return Err(anyhow!("remote.endpoint must be set for the remote backend"));
            }
            if self.remote.bucket.trim().is_empty() {
                return Err(anyhow!("remote.bucket must be set for the remote backend"));
            }
            if self.remote.timeout_secs == 0 {
                return Err(anyhow!("remote.timeout_secs must be > 0"));
            }
        }
        if self.remote.expire_in_days == Some(0) {
            return Err(anyhow!("remote.expire_in_days must be > 0 when set"));
        }
        if self.runner.max_steps == Some(0) {
            return Err(anyhow!("runner.max_steps must be > 0 when set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CheckpointConfig::default()`.
pub fn load_config(path: &Path) -> Result<CheckpointConfig> {
    if !path.exists() {
        let cfg = CheckpointConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CheckpointConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CheckpointConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Build the configured store backend.
pub fn open_store(cfg: &CheckpointConfig) -> Result<Arc<dyn Store>> {
    cfg.validate()?;
    let store: Arc<dyn Store> = match cfg.store.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::File => match &cfg.store.dir {
            Some(dir) => Arc::new(FileStore::new(dir)),
            None => Arc::new(FileStore::in_temp_dir()),
        },
        Backend::Remote => {
            let remote = &cfg.remote;
            let mut client = HttpObjectClient::new(
                &remote.endpoint,
                Duration::from_secs(remote.timeout_secs),
            )?;
            if let Some(var) = &remote.token_env {
                let token = std::env::var(var)
                    .with_context(|| format!("read remote token from ${var}"))?;
                client = client.with_bearer_token(token);
            }
            let mut store = RemoteStore::new(Box::new(client), remote.bucket.clone());
            if let Some(days) = remote.expire_in_days {
                store = store.with_expiry_days(days);
            }
            Arc::new(store)
        }
    };
    Ok(store)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
