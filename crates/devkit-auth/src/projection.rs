use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::SessionManager;

/// Boolean "signed in" view derived from session change events, for UI
/// surfaces that only care whether a session exists.
#[derive(Debug)]
pub struct SignedInProjection {
    receiver: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl SignedInProjection {
    pub fn spawn(manager: &SessionManager) -> Self {
        let mut events = manager.subscribe();
        let (sender, receiver) = watch::channel(!manager.get_sessions().is_empty());
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        sender.send_replace(event.has_session());
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { receiver, task }
    }

    pub fn is_signed_in(&self) -> bool {
        *self.receiver.borrow()
    }

    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.receiver.clone()
    }
}

impl Drop for SignedInProjection {
    fn drop(&mut self) {
        self.task.abort();
    }
}
