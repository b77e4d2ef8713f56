use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::SecretChange;

pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Trait contract for encrypted key-value persistence.
///
/// Every mutation, local or external, is announced on the channel returned by
/// [`SecretStore::subscribe`]. The store does not tell a subscriber whether it
/// caused the change itself, so handlers must be idempotent.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<SecretChange>;
}

pub(crate) fn validate_secret_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        bail!("secret key must not be empty");
    }
    Ok(())
}
