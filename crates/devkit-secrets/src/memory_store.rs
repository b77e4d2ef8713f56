use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::secret_store::{validate_secret_key, SecretStore, CHANGE_CHANNEL_CAPACITY};
use crate::types::SecretChange;

/// In-process [`SecretStore`] with hooks for simulating other writers and
/// backend faults.
#[derive(Debug)]
pub struct MemorySecretStore {
    entries: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<SecretChange>,
    fail_next_get: AtomicBool,
    fail_next_set: AtomicBool,
    fail_next_delete: AtomicBool,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySecretStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
            fail_next_get: AtomicBool::new(false),
            fail_next_set: AtomicBool::new(false),
            fail_next_delete: AtomicBool::new(false),
            get_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Seeds an entry without notifying subscribers, as if it had been written
    /// before this process started.
    pub fn with_entry(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.into(), value.into());
        }
        self
    }

    /// Writes `value` the way another process sharing the store would, then
    /// announces it as an external change.
    pub fn simulate_external_set(&self, key: &str, value: &str) -> Result<()> {
        self.entries_mut()?.insert(key.to_string(), value.to_string());
        let _ = self.changes.send(SecretChange::external(key));
        Ok(())
    }

    pub fn simulate_external_delete(&self, key: &str) -> Result<()> {
        self.entries_mut()?.remove(key);
        let _ = self.changes.send(SecretChange::external(key));
        Ok(())
    }

    /// Makes the next `get` fail with a transient backend error.
    pub fn fail_next_get(&self) {
        self.fail_next_get.store(true, Ordering::SeqCst);
    }

    /// Makes the next `set` fail without modifying any entry.
    pub fn fail_next_set(&self) {
        self.fail_next_set.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Synchronous read for assertions.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn entries_mut(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory secret store lock is poisoned"))
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        validate_secret_key(key)?;
        if self.fail_next_get.swap(false, Ordering::SeqCst) {
            bail!("memory secret store read failed (injected)");
        }
        Ok(self.entries_mut()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        validate_secret_key(key)?;
        if self.fail_next_set.swap(false, Ordering::SeqCst) {
            bail!("memory secret store write failed (injected)");
        }
        self.entries_mut()?.insert(key.to_string(), value.to_string());
        let _ = self.changes.send(SecretChange::local(key));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        validate_secret_key(key)?;
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            bail!("memory secret store delete failed (injected)");
        }
        self.entries_mut()?.remove(key);
        let _ = self.changes.send(SecretChange::local(key));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SecretChange> {
        self.changes.subscribe()
    }
}
