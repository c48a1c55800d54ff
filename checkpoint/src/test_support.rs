//! Test-only collaborators for stores and object storage.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::io::memory_store::MemoryStore;
use crate::io::remote_store::ObjectClient;
use crate::io::store::{Store, StoreError};

#[derive(Default)]
struct ObjectState {
    buckets: HashSet<String>,
    expiry: HashMap<String, u32>,
    objects: HashMap<(String, String), Vec<u8>>,
    create_calls: usize,
}

/// In-memory object storage with switchable failures.
///
/// Clones share state, so a test can keep one handle while the store owns
/// another.
#[derive(Clone, Default)]
pub struct ScriptedObjectClient {
    state: Arc<Mutex<ObjectState>>,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    fail_provisioning: Arc<AtomicBool>,
}

impl ScriptedObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `put_object` and `delete_object` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `get_object` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make bucket checks and creation fail.
    pub fn fail_provisioning(&self, fail: bool) {
        self.fail_provisioning.store(fail, Ordering::SeqCst);
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.with_state(|state| state.buckets.contains(bucket))
    }

    pub fn expiry_days(&self, bucket: &str) -> Option<u32> {
        self.with_state(|state| state.expiry.get(bucket).copied())
    }

    pub fn create_calls(&self) -> usize {
        self.with_state(|state| state.create_calls)
    }

    pub fn object_count(&self) -> usize {
        self.with_state(|state| state.objects.len())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ObjectState) -> R) -> R {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn check_bucket(state: &ObjectState, bucket: &str) -> Result<()> {
        if state.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(anyhow!("no such bucket '{bucket}'"))
        }
    }
}

impl ObjectClient for ScriptedObjectClient {
    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        if self.fail_provisioning.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted provisioning failure"));
        }
        Ok(self.has_bucket(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> Result<()> {
        if self.fail_provisioning.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted provisioning failure"));
        }
        self.with_state(|state| {
            state.create_calls += 1;
            state.buckets.insert(bucket.to_string());
        });
        Ok(())
    }

    fn put_bucket_expiry(&self, bucket: &str, days: u32) -> Result<()> {
        self.with_state(|state| {
            Self::check_bucket(state, bucket)?;
            state.expiry.insert(bucket.to_string(), days);
            Ok(())
        })
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted write failure"));
        }
        self.with_state(|state| {
            Self::check_bucket(state, bucket)?;
            state
                .objects
                .insert((bucket.to_string(), key.to_string()), body.to_vec());
            Ok(())
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted read failure"));
        }
        self.with_state(|state| {
            Self::check_bucket(state, bucket)?;
            state
                .objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| anyhow!("no such key '{key}'"))
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted delete failure"));
        }
        self.with_state(|state| {
            Self::check_bucket(state, bucket)?;
            state.objects.remove(&(bucket.to_string(), key.to_string()));
            Ok(())
        })
    }
}

/// Memory-backed store that counts calls per operation.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Store for CountingStore {
    fn put(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, blob)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }
}
