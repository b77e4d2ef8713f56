use std::sync::{Arc, Mutex};

use devkit_core::{current_unix_timestamp, remaining_lifetime_secs};
use devkit_secrets::{SecretChange, SecretStore};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::with_timeout;
use crate::{
    BearerCredential, DelegatedCredential, DirectoryError, DirectoryService, IdentityDelegate,
    OrganizationRecord, OrganizationResolver, Prompt, Session, SessionChangeEvent, SessionError,
    SessionManagerConfig, SessionStore, ValidatedPrincipal,
};

pub const OPEN_PORTAL_ACTION: &str = "Open Azure DevOps Portal";

/// External services a [`SessionManager`] depends on.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub secrets: Arc<dyn SecretStore>,
    pub delegate: Arc<dyn IdentityDelegate>,
    pub directory: Arc<dyn DirectoryService>,
    pub prompt: Arc<dyn Prompt>,
}

/// Owns the current session and every transition of it.
///
/// Mutating operations and reconciliation are serialized, so an observer never
/// sees a half-applied transition. Reads through [`SessionManager::get_sessions`]
/// never wait on that serialization.
pub struct SessionManager {
    config: SessionManagerConfig,
    secrets: Arc<dyn SecretStore>,
    delegate: Arc<dyn IdentityDelegate>,
    directory: Arc<dyn DirectoryService>,
    prompt: Arc<dyn Prompt>,
    resolver: OrganizationResolver,
    store: SessionStore,
    delegated: Mutex<Option<DelegatedCredential>>,
    operation_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionChangeEvent>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, collaborators: SessionCollaborators) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity());
        let resolver = OrganizationResolver::new(
            collaborators.directory.clone(),
            collaborators.prompt.clone(),
            config.network_timeout(),
        );
        Self {
            config,
            secrets: collaborators.secrets,
            delegate: collaborators.delegate,
            directory: collaborators.directory,
            prompt: collaborators.prompt,
            resolver,
            store: SessionStore::new(),
            delegated: Mutex::new(None),
            operation_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionChangeEvent> {
        self.events.subscribe()
    }

    /// Zero or one sessions, read from memory.
    pub fn get_sessions(&self) -> Vec<Session> {
        self.store.current().into_iter().collect()
    }

    /// Loads the persisted session into memory. Emits no event.
    pub async fn initialize(&self) -> Result<Option<Session>, SessionError> {
        let _guard = self.operation_lock.lock().await;
        let raw = self.read_persisted().await?;
        let session = raw.as_deref().and_then(Session::from_persisted);
        self.store.replace(session.clone());
        info!(
            signed_in = session.is_some(),
            organization_id = session.as_ref().map(Session::organization_id),
            "session manager initialized"
        );
        Ok(session)
    }

    /// Delegates for a fresh credential, then resolves and validates an
    /// organization before persisting the new session.
    pub async fn create_session(&self) -> Result<Session, SessionError> {
        let _guard = self.operation_lock.lock().await;
        let delegated = self.delegate_credential().await?;
        self.provision(delegated).await
    }

    /// Re-runs organization resolution, reusing the current credential when it
    /// has not expired. Delegates again otherwise.
    pub async fn switch_organization(&self) -> Result<Session, SessionError> {
        let _guard = self.operation_lock.lock().await;
        let delegated = match self.reusable_credential() {
            Some(delegated) => {
                debug!("reusing current credential for organization switch");
                delegated
            }
            None => self.delegate_credential().await?,
        };
        self.provision(delegated).await
    }

    /// Deletes the persisted session. With nothing signed in the store is left
    /// untouched and an empty event is emitted.
    pub async fn remove_session(&self) -> Result<Option<Session>, SessionError> {
        let _guard = self.operation_lock.lock().await;
        if !self.store.is_signed_in() {
            debug!("remove requested without a session");
            self.publish(SessionChangeEvent::default());
            return Ok(None);
        }

        self.secrets
            .delete(&self.config.secret_key)
            .await
            .map_err(|error| SessionError::PersistenceFailed(format!("{error:#}")))?;
        let previous = self.store.replace(None);
        self.forget_delegated();
        info!(
            organization_id = previous.as_ref().map(Session::organization_id),
            "session removed"
        );
        self.publish(SessionChangeEvent::transition(previous.clone(), None));
        Ok(previous)
    }

    /// Aligns memory with the persisted value. Returns the emitted event, or
    /// `None` when nothing changed or the store could not be read.
    pub async fn reconcile(&self) -> Option<SessionChangeEvent> {
        let _guard = self.operation_lock.lock().await;
        let raw = match self.read_persisted().await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "keeping current session after failed secret read");
                return None;
            }
        };
        let persisted = raw.as_deref().and_then(Session::from_persisted);
        if persisted == self.store.current() {
            debug!("persisted session matches memory");
            return None;
        }

        let previous = self.store.replace(persisted.clone());
        self.forget_delegated();
        let event = SessionChangeEvent::transition(previous, persisted);
        info!(
            added = event.added.len(),
            removed = event.removed.len(),
            "session changed outside this process"
        );
        self.publish(event.clone());
        Some(event)
    }

    /// Reconciles whenever the secret store reports a change to the session
    /// key. The task ends when the manager is dropped or the store closes.
    pub fn watch_secret_changes(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.secrets.subscribe();
        let manager = Arc::downgrade(self);
        let key = self.config.secret_key.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(SecretChange { key: changed, .. }) if changed != key => continue,
                    Ok(change) => debug!(origin = ?change.origin, "session secret changed"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "secret change notifications lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reconcile().await;
            }
        })
    }

    async fn read_persisted(&self) -> Result<Option<String>, SessionError> {
        let raw = self
            .secrets
            .get(&self.config.secret_key)
            .await
            .map_err(|error| SessionError::PersistenceFailed(format!("{error:#}")))?;
        debug!(present = raw.is_some(), "read persisted session");
        Ok(raw)
    }

    async fn delegate_credential(&self) -> Result<DelegatedCredential, SessionError> {
        let acquire = self.delegate.acquire(&self.config.scope_hint);
        let outcome = if self.delegate.is_interactive() {
            acquire.await
        } else {
            with_timeout("identity delegation", self.config.delegate_timeout(), acquire).await?
        };
        let delegated = outcome.map_err(|error| SessionError::DelegationFailed(error.message))?;
        debug!(
            delegate = self.delegate.delegate_name(),
            lifetime_secs =
                remaining_lifetime_secs(delegated.expires_unix, current_unix_timestamp()),
            "acquired bearer credential"
        );
        Ok(delegated)
    }

    fn reusable_credential(&self) -> Option<DelegatedCredential> {
        let current = self.store.current()?;
        let cached = self
            .delegated
            .lock()
            .ok()
            .and_then(|cached| cached.clone());
        match cached {
            Some(cached) if cached.bearer == *current.credential() => {
                (!cached.is_expired(current_unix_timestamp())).then_some(cached)
            }
            // Stored credentials carry no expiry. Reuse them only when the
            // alternative is prompting the user.
            _ if self.delegate.is_interactive() => {
                Some(DelegatedCredential::new(current.credential().clone()))
            }
            _ => None,
        }
    }

    async fn provision(&self, delegated: DelegatedCredential) -> Result<Session, SessionError> {
        let organization = self.resolver.resolve(&delegated.bearer).await?;
        let principal = self.validate(&delegated.bearer, &organization).await?;
        let session = Session::validated(
            delegated.bearer.clone(),
            organization.id.clone(),
            principal.principal_id,
        );

        let encoded = session
            .to_record()
            .encode()
            .map_err(|error| SessionError::PersistenceFailed(error.to_string()))?;
        self.secrets
            .set(&self.config.secret_key, &encoded)
            .await
            .map_err(|error| SessionError::PersistenceFailed(format!("{error:#}")))?;

        let previous = self.store.replace(Some(session.clone()));
        self.remember_delegated(delegated);
        info!(
            organization_id = session.organization_id(),
            replaced = previous.is_some(),
            "session established"
        );
        self.publish(SessionChangeEvent::transition(previous, Some(session.clone())));
        Ok(session)
    }

    async fn validate(
        &self,
        credential: &BearerCredential,
        organization: &OrganizationRecord,
    ) -> Result<ValidatedPrincipal, SessionError> {
        let outcome = with_timeout(
            "organization validation",
            self.config.network_timeout(),
            self.directory.validate(credential, &organization.id),
        )
        .await;
        let error = match outcome {
            Ok(Ok(principal)) if !principal.principal_id.trim().is_empty() => {
                return Ok(principal);
            }
            Ok(Ok(_)) => DirectoryError::new("directory returned no principal for the organization"),
            Ok(Err(error)) => error,
            Err(timeout) => DirectoryError::new(timeout.to_string()),
        };
        warn!(
            organization_id = %organization.id,
            status = error.status,
            error = %error.message,
            "organization validation failed"
        );

        let message = format!(
            "Failed to connect to organization \"{}\". Please check if it exists and you have access to it.",
            organization.display_name
        );
        if self
            .prompt
            .show_error(&message, &[OPEN_PORTAL_ACTION])
            .await
            .as_deref()
            == Some(OPEN_PORTAL_ACTION)
        {
            self.prompt.open_external(&self.config.portal_url).await;
        }
        Err(SessionError::ValidationFailed {
            organization: organization.display_name.clone(),
            status: error.status,
            message: error.message,
        })
    }

    fn remember_delegated(&self, delegated: DelegatedCredential) {
        if let Ok(mut slot) = self.delegated.lock() {
            *slot = Some(delegated);
        }
    }

    fn forget_delegated(&self) {
        if let Ok(mut slot) = self.delegated.lock() {
            *slot = None;
        }
    }

    fn publish(&self, event: SessionChangeEvent) {
        let receivers = self.events.send(event).unwrap_or(0);
        debug!(receivers, "published session change");
    }
}
