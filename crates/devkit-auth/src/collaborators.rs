use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BearerCredential, DelegateError, DelegatedCredential, DirectoryError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    /// Stable identifier persisted with the session and used to scope
    /// directory calls.
    pub id: String,
    pub display_name: String,
}

impl OrganizationRecord {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Organizations visible to a principal, split by relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizationListing {
    pub owned: Vec<OrganizationRecord>,
    pub member: Vec<OrganizationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalProfile {
    /// Alias the directory uses to look up organization relationships.
    pub alias: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPrincipal {
    pub principal_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One selectable entry in [`Prompt::choose`]. `group_separator` marks the
/// first entry of a labelled group.
pub struct PromptOption {
    pub label: String,
    pub group_separator: Option<String>,
}

impl PromptOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            group_separator: None,
        }
    }

    pub fn starting_group(mut self, group: impl Into<String>) -> Self {
        self.group_separator = Some(group.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextInputSpec {
    pub prompt: String,
    pub placeholder: Option<String>,
    /// Input is masked and never echoed.
    pub password: bool,
}

/// Produces a bearer credential, possibly after interactive consent.
#[async_trait]
pub trait IdentityDelegate: Send + Sync {
    fn delegate_name(&self) -> &'static str;

    /// True when `acquire` waits on the user. Interactive delegation is not
    /// timed out, and a stored credential is reused instead of asking again.
    fn is_interactive(&self) -> bool {
        false
    }

    async fn acquire(&self, scope_hint: &str) -> Result<DelegatedCredential, DelegateError>;
}

/// Read-only lookups against the organization directory. All calls are
/// authenticated with the supplied credential.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn get_profile(
        &self,
        credential: &BearerCredential,
    ) -> Result<PrincipalProfile, DirectoryError>;

    async fn list_organizations(
        &self,
        credential: &BearerCredential,
        principal_alias: &str,
    ) -> Result<OrganizationListing, DirectoryError>;

    /// Confirms the credential can act inside `organization_id` and returns
    /// the principal it acts as there.
    async fn validate(
        &self,
        credential: &BearerCredential,
        organization_id: &str,
    ) -> Result<ValidatedPrincipal, DirectoryError>;
}

/// User interaction surface. `None` from any method means the user dismissed
/// the prompt.
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn choose(&self, placeholder: &str, options: &[PromptOption]) -> Option<String>;

    async fn input_text(&self, spec: &TextInputSpec) -> Option<String>;

    /// Shows an error with optional follow-up actions and returns the chosen action.
    async fn show_error(&self, message: &str, actions: &[&str]) -> Option<String>;

    async fn open_external(&self, url: &str);
}
