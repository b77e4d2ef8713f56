//! Deterministic collaborators that replay scripted answers and record every call.
//!
//! Used by the session manager tests and by downstream crates that need a
//! manager without network access or a terminal.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    BearerCredential, DelegateError, DelegatedCredential, DirectoryError, DirectoryService,
    IdentityDelegate, OrganizationListing, PrincipalProfile, Prompt, PromptOption,
    TextInputSpec, ValidatedPrincipal,
};

const DEFAULT_PRINCIPAL_ID: &str = "principal-1";
const DEFAULT_PROFILE_ALIAS: &str = "alias-1";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Identity delegate returning queued outcomes, then a fallback.
#[derive(Debug)]
pub struct ScriptedDelegate {
    queued: Mutex<VecDeque<Result<DelegatedCredential, DelegateError>>>,
    fallback: Option<Result<DelegatedCredential, DelegateError>>,
    delay: Duration,
    interactive: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedDelegate {
    fn with_fallback(fallback: Option<Result<DelegatedCredential, DelegateError>>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            interactive: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always yields `token`. Blank tokens yield a delegation failure.
    pub fn returning(token: &str) -> Self {
        let outcome = BearerCredential::new(token)
            .map(DelegatedCredential::new)
            .ok_or_else(|| DelegateError::new("scripted token is blank"));
        Self::with_fallback(Some(outcome))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_fallback(Some(Err(DelegateError::new(message))))
    }

    /// Yields each outcome once, in order, then fails.
    pub fn sequence(outcomes: Vec<Result<DelegatedCredential, DelegateError>>) -> Self {
        let delegate = Self::with_fallback(None);
        lock(&delegate.queued).extend(outcomes);
        delegate
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reports itself as waiting on the user.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `acquire` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityDelegate for ScriptedDelegate {
    fn delegate_name(&self) -> &'static str {
        "scripted"
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    async fn acquire(&self, _scope_hint: &str) -> Result<DelegatedCredential, DelegateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = lock(&self.queued)
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Err(DelegateError::new("scripted delegate has no more outcomes")));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Directory serving a fixed listing, with per-organization validation results.
#[derive(Debug)]
pub struct ScriptedDirectory {
    alias: String,
    listing: OrganizationListing,
    listing_failure: Option<DirectoryError>,
    profile_failure: Option<DirectoryError>,
    principals: BTreeMap<String, Result<String, DirectoryError>>,
    validate_delay: Duration,
    profile_calls: AtomicUsize,
    list_calls: AtomicUsize,
    validations: Mutex<Vec<(String, String)>>,
}

impl ScriptedDirectory {
    pub fn new(listing: OrganizationListing) -> Self {
        Self {
            alias: DEFAULT_PROFILE_ALIAS.to_string(),
            listing,
            listing_failure: None,
            profile_failure: None,
            principals: BTreeMap::new(),
            validate_delay: Duration::ZERO,
            profile_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            validations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_principal(mut self, organization_id: &str, principal_id: &str) -> Self {
        self.principals
            .insert(organization_id.to_string(), Ok(principal_id.to_string()));
        self
    }

    pub fn rejecting(mut self, organization_id: &str, error: DirectoryError) -> Self {
        self.principals
            .insert(organization_id.to_string(), Err(error));
        self
    }

    pub fn failing_listing(mut self, error: DirectoryError) -> Self {
        self.listing_failure = Some(error);
        self
    }

    pub fn failing_profile(mut self, error: DirectoryError) -> Self {
        self.profile_failure = Some(error);
        self
    }

    pub fn with_validate_delay(mut self, delay: Duration) -> Self {
        self.validate_delay = delay;
        self
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// `(token, organization_id)` pairs passed to `validate`, in call order.
    pub fn validations(&self) -> Vec<(String, String)> {
        lock(&self.validations).clone()
    }
}

#[async_trait]
impl DirectoryService for ScriptedDirectory {
    async fn get_profile(
        &self,
        _credential: &BearerCredential,
    ) -> Result<PrincipalProfile, DirectoryError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.profile_failure {
            return Err(error.clone());
        }
        Ok(PrincipalProfile {
            alias: self.alias.clone(),
            display_name: None,
        })
    }

    async fn list_organizations(
        &self,
        _credential: &BearerCredential,
        _principal_alias: &str,
    ) -> Result<OrganizationListing, DirectoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.listing_failure {
            return Err(error.clone());
        }
        Ok(self.listing.clone())
    }

    async fn validate(
        &self,
        credential: &BearerCredential,
        organization_id: &str,
    ) -> Result<ValidatedPrincipal, DirectoryError> {
        lock(&self.validations).push((
            credential.expose().to_string(),
            organization_id.to_string(),
        ));
        if !self.validate_delay.is_zero() {
            tokio::time::sleep(self.validate_delay).await;
        }
        match self.principals.get(organization_id) {
            Some(Ok(principal_id)) => Ok(ValidatedPrincipal {
                principal_id: principal_id.clone(),
            }),
            Some(Err(error)) => Err(error.clone()),
            None => Ok(ValidatedPrincipal {
                principal_id: DEFAULT_PRINCIPAL_ID.to_string(),
            }),
        }
    }
}

/// Prompt replaying queued answers. An exhausted queue answers `None`, as if
/// the user dismissed the prompt.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    choices: Mutex<VecDeque<Option<String>>>,
    inputs: Mutex<VecDeque<Option<String>>>,
    error_actions: Mutex<VecDeque<Option<String>>>,
    choose_requests: Mutex<Vec<Vec<PromptOption>>>,
    input_requests: Mutex<Vec<TextInputSpec>>,
    errors_shown: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    input_delay: Duration,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choosing(self, label: &str) -> Self {
        lock(&self.choices).push_back(Some(label.to_string()));
        self
    }

    pub fn declining(self) -> Self {
        lock(&self.choices).push_back(None);
        self
    }

    pub fn entering(self, text: &str) -> Self {
        lock(&self.inputs).push_back(Some(text.to_string()));
        self
    }

    /// Delays every text answer, like a user taking time to type.
    pub fn with_input_delay(mut self, delay: Duration) -> Self {
        self.input_delay = delay;
        self
    }

    pub fn answering_error_with(self, action: &str) -> Self {
        lock(&self.error_actions).push_back(Some(action.to_string()));
        self
    }

    pub fn choose_requests(&self) -> Vec<Vec<PromptOption>> {
        lock(&self.choose_requests).clone()
    }

    pub fn input_requests(&self) -> Vec<TextInputSpec> {
        lock(&self.input_requests).clone()
    }

    pub fn errors_shown(&self) -> Vec<String> {
        lock(&self.errors_shown).clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl Prompt for ScriptedPrompt {
    async fn choose(&self, _placeholder: &str, options: &[PromptOption]) -> Option<String> {
        lock(&self.choose_requests).push(options.to_vec());
        lock(&self.choices).pop_front().flatten()
    }

    async fn input_text(&self, spec: &TextInputSpec) -> Option<String> {
        lock(&self.input_requests).push(spec.clone());
        if !self.input_delay.is_zero() {
            tokio::time::sleep(self.input_delay).await;
        }
        lock(&self.inputs).pop_front().flatten()
    }

    async fn show_error(&self, message: &str, actions: &[&str]) -> Option<String> {
        lock(&self.errors_shown).push(message.to_string());
        lock(&self.error_actions)
            .pop_front()
            .flatten()
            .filter(|action| actions.contains(&action.as_str()))
    }

    async fn open_external(&self, url: &str) {
        lock(&self.opened).push(url.to_string());
    }
}
