//! File-backed secret store shared by every process on the machine.
//!
//! Entries live in one JSON document written atomically; values are sealed with
//! the keyed envelope unless encryption is disabled. The store keeps the last
//! observed plaintext snapshot so filesystem events can be turned into
//! per-key [`SecretChange`] notifications.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use devkit_core::write_private_text_atomic;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::encryption::{decrypt_secret_value, encrypt_secret_value};
use crate::file_watch::{watch_store_file, FileWatchHandle};
use crate::secret_store::{validate_secret_key, SecretStore, CHANGE_CHANNEL_CAPACITY};
use crate::types::{SecretChange, SecretStoreEncryptionMode};

const SECRET_STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct SecretStoreFile {
    schema_version: u32,
    encryption: SecretStoreEncryptionMode,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `FileSecretStoreOptions` used to open a [`FileSecretStore`].
pub struct FileSecretStoreOptions {
    pub path: PathBuf,
    pub encryption: SecretStoreEncryptionMode,
    pub key: Option<String>,
}

impl FileSecretStoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encryption: SecretStoreEncryptionMode::Keyed,
            key: None,
        }
    }
}

/// [`SecretStore`] persisted to a single JSON file.
pub struct FileSecretStore {
    shared: Arc<FileStoreShared>,
    watcher: Mutex<Option<FileWatchHandle>>,
}

pub(crate) struct FileStoreShared {
    path: PathBuf,
    encryption: SecretStoreEncryptionMode,
    key: Option<String>,
    snapshot: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<SecretChange>,
}

impl std::fmt::Debug for FileSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSecretStore")
            .field("path", &self.shared.path)
            .field("encryption", &self.shared.encryption)
            .field("has_key", &self.shared.key.is_some())
            .finish()
    }
}

impl FileSecretStore {
    /// Opens the store, reading (and validating) any existing file.
    pub fn open(options: FileSecretStoreOptions) -> Result<Self> {
        if options.path.as_os_str().is_empty() {
            bail!("secret store path must not be empty");
        }
        let key = options
            .key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let shared = FileStoreShared {
            path: options.path,
            encryption: options.encryption,
            key,
            snapshot: Mutex::new(BTreeMap::new()),
            changes,
        };
        let initial = shared.load_entries()?;
        *shared.snapshot()? = initial;
        tracing::debug!(
            secret_store = %shared.path.display(),
            encryption = shared.encryption.as_str(),
            has_key = shared.key.is_some(),
            "opened file secret store"
        );
        Ok(Self {
            shared: Arc::new(shared),
            watcher: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Starts reporting writes made by other processes as external changes.
    /// Calling it again is a no-op.
    pub fn start_watching(&self) -> Result<()> {
        let mut watcher = self
            .watcher
            .lock()
            .map_err(|_| anyhow!("secret store watcher lock is poisoned"))?;
        if watcher.is_none() {
            *watcher = Some(watch_store_file(Arc::clone(&self.shared))?);
        }
        Ok(())
    }

    /// Re-reads the file and announces every key whose value differs from the
    /// last observed state. Returns the changed keys.
    pub fn refresh_from_disk(&self) -> Result<Vec<String>> {
        self.shared.refresh_from_disk()
    }
}

impl FileStoreShared {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.snapshot
            .lock()
            .map_err(|_| anyhow!("secret store snapshot lock is poisoned"))
    }

    fn load_entries(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read secret store {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let parsed = serde_json::from_str::<SecretStoreFile>(&raw)
            .with_context(|| format!("failed to parse secret store {}", self.path.display()))?;
        if parsed.schema_version != SECRET_STORE_SCHEMA_VERSION {
            bail!(
                "unsupported secret store schema_version {} in {} (expected {})",
                parsed.schema_version,
                self.path.display(),
                SECRET_STORE_SCHEMA_VERSION
            );
        }

        let mut entries = BTreeMap::new();
        for (name, encoded) in parsed.entries {
            let value = decrypt_secret_value(&encoded, parsed.encryption, self.key.as_deref())
                .with_context(|| {
                    format!("secret store entry '{name}' is invalid or corrupted")
                })?;
            entries.insert(name, value);
        }
        Ok(entries)
    }

    fn save_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let mut encoded_entries = BTreeMap::new();
        for (name, value) in entries {
            let encoded = encrypt_secret_value(value, self.encryption, self.key.as_deref())
                .with_context(|| format!("failed to encode secret store entry '{name}'"))?;
            encoded_entries.insert(name.clone(), encoded);
        }
        let payload = SecretStoreFile {
            schema_version: SECRET_STORE_SCHEMA_VERSION,
            encryption: self.encryption,
            entries: encoded_entries,
        };
        let mut encoded =
            serde_json::to_string_pretty(&payload).context("failed to encode secret store")?;
        encoded.push('\n');
        tracing::debug!(
            secret_store = %self.path.display(),
            encryption = self.encryption.as_str(),
            entries = entries.len(),
            "saving secret store"
        );
        write_private_text_atomic(&self.path, &encoded)
    }

    /// Applies a single-key mutation on top of the current file contents so
    /// entries written by other processes are preserved.
    fn mutate(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut snapshot = self.snapshot()?;
        let mut entries = self.load_entries()?;
        let externally_changed: Vec<String> = changed_keys(&snapshot, &entries)
            .into_iter()
            .filter(|changed| changed != key)
            .collect();

        match value {
            Some(value) => {
                entries.insert(key.to_string(), value.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
        self.save_entries(&entries)?;
        *snapshot = entries;
        drop(snapshot);

        for changed in externally_changed {
            let _ = self.changes.send(SecretChange::external(changed));
        }
        let _ = self.changes.send(SecretChange::local(key));
        Ok(())
    }

    pub(crate) fn refresh_from_disk(&self) -> Result<Vec<String>> {
        let mut snapshot = self.snapshot()?;
        let entries = self.load_entries()?;
        let changed = changed_keys(&snapshot, &entries);
        *snapshot = entries;
        drop(snapshot);

        for key in &changed {
            let _ = self.changes.send(SecretChange::external(key.clone()));
        }
        Ok(changed)
    }
}

fn changed_keys(before: &BTreeMap<String, String>, after: &BTreeMap<String, String>) -> Vec<String> {
    let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    names
        .into_iter()
        .filter(|name| before.get(*name) != after.get(*name))
        .cloned()
        .collect()
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_secret_key(key)?;
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Ok(shared.load_entries()?.remove(&key)))
            .await
            .context("secret store read task failed")?
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_secret_key(key)?;
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || shared.mutate(&key, Some(&value)))
            .await
            .context("secret store write task failed")?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_secret_key(key)?;
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || shared.mutate(&key, None))
            .await
            .context("secret store delete task failed")?
    }

    fn subscribe(&self) -> broadcast::Receiver<SecretChange> {
        self.shared.changes.subscribe()
    }
}
