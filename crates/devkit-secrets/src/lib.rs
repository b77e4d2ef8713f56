//! Encrypted key-value secret persistence with change notification.
//!
//! The [`SecretStore`] trait is the seam the session manager persists through.
//! [`MemorySecretStore`] backs tests and single-process embedding;
//! [`FileSecretStore`] keeps entries in an AES-GCM protected JSON file shared
//! by every process on the machine and reports out-of-process edits through a
//! filesystem watcher.

mod encryption;
mod file_store;
mod file_watch;
mod memory_store;
mod secret_store;
mod types;

pub use encryption::{decrypt_secret_value, encrypt_secret_value};
pub use file_store::*;
pub use memory_store::*;
pub use secret_store::*;
pub use types::*;
