use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::Session;

/// In-memory slot holding the current session. Readers never block; only the
/// session manager replaces the value.
#[derive(Default)]
pub struct SessionStore {
    current: ArcSwapOption<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Session> {
        self.current.load_full().map(Arc::unwrap_or_clone)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.load().is_some()
    }

    /// Swaps in `next` and returns the value it replaced.
    pub(crate) fn replace(&self, next: Option<Session>) -> Option<Session> {
        self.current
            .swap(next.map(Arc::new))
            .map(Arc::unwrap_or_clone)
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("current", &self.current())
            .finish()
    }
}
