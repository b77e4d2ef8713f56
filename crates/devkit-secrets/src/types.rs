use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `SecretStoreEncryptionMode` values.
pub enum SecretStoreEncryptionMode {
    None,
    #[default]
    Keyed,
}

impl SecretStoreEncryptionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretStoreEncryptionMode::None => "none",
            SecretStoreEncryptionMode::Keyed => "keyed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Who caused a [`SecretChange`].
pub enum ChangeOrigin {
    /// A write issued through this store instance.
    Local,
    /// A write observed from another process, window, or store instance.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Notification that the value stored under `key` may have changed.
pub struct SecretChange {
    pub key: String,
    pub origin: ChangeOrigin,
}

impl SecretChange {
    pub fn local(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin: ChangeOrigin::Local,
        }
    }

    pub fn external(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin: ChangeOrigin::External,
        }
    }
}
