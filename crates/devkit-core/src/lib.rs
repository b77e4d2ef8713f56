//! Foundational low-level utilities shared across devkit crates.
//!
//! Provides the atomic file-write helper used by the secret store and the
//! unix-time helpers used for credential expiry checks.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_private_text_atomic;
pub use time_utils::{current_unix_timestamp, is_expired_unix, remaining_lifetime_secs};
