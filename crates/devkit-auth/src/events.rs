use crate::Session;

/// Describes a change to the current session. Each list holds at most one
/// entry; an event with both lists empty reports that nothing was signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionChangeEvent {
    pub added: Vec<Session>,
    pub removed: Vec<Session>,
}

impl SessionChangeEvent {
    pub fn transition(previous: Option<Session>, next: Option<Session>) -> Self {
        Self {
            added: next.into_iter().collect(),
            removed: previous.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Whether a session exists after this change.
    pub fn has_session(&self) -> bool {
        !self.added.is_empty()
    }
}
