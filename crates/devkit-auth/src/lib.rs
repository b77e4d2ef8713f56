//! Authentication session lifecycle for a single organization-scoped credential.
//!
//! [`SessionManager`] provisions a session by delegating identity, resolving an
//! organization with the user, validating the pair against the directory and
//! persisting it atomically. It keeps every observer consistent through
//! [`SessionChangeEvent`]s, including when another process rewrites the shared
//! secret store.

mod collaborators;
mod config;
mod credential;
mod delegates;
mod errors;
mod events;
mod manager;
mod projection;
mod resolver;
pub mod scripted;
mod session;
mod session_store;
#[cfg(test)]
mod tests;

pub use collaborators::*;
pub use config::*;
pub use credential::*;
pub use delegates::*;
pub use errors::*;
pub use events::*;
pub use manager::*;
pub use projection::*;
pub use resolver::*;
pub use session::*;
pub use session_store::*;
