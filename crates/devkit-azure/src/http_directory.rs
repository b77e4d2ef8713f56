use std::time::Duration;

use async_trait::async_trait;
use devkit_auth::{
    BearerCredential, DirectoryError, DirectoryService, OrganizationListing, OrganizationRecord,
    PrincipalProfile, ValidatedPrincipal,
};
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_PROFILE_API_BASE: &str = "https://app.vssps.visualstudio.com";
pub const ORGANIZATION_PLACEHOLDER: &str = "{organization}";
pub const DEFAULT_ORGANIZATION_API_BASE_TEMPLATE: &str = "https://dev.azure.com/{organization}";
const DEFAULT_ACCOUNTS_API_VERSION: &str = "7.1";
const DEFAULT_PROFILE_API_VERSION: &str = "7.1-preview.1";
const DEFAULT_DIRECTORY_TIMEOUT_MS: u64 = 15_000;
const MAX_ERROR_BODY_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpDirectoryConfig {
    /// Host serving profile and account endpoints.
    pub profile_api_base: String,
    /// Per-organization base URL; `{organization}` is replaced with the organization id.
    pub organization_api_base_template: String,
    pub accounts_api_version: String,
    pub profile_api_version: String,
    pub timeout_ms: u64,
}

impl Default for HttpDirectoryConfig {
    fn default() -> Self {
        Self {
            profile_api_base: DEFAULT_PROFILE_API_BASE.to_string(),
            organization_api_base_template: DEFAULT_ORGANIZATION_API_BASE_TEMPLATE.to_string(),
            accounts_api_version: DEFAULT_ACCOUNTS_API_VERSION.to_string(),
            profile_api_version: DEFAULT_PROFILE_API_VERSION.to_string(),
            timeout_ms: DEFAULT_DIRECTORY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
/// [`DirectoryService`] backed by the Azure DevOps REST API.
pub struct HttpDirectoryService {
    config: HttpDirectoryConfig,
    client: Client,
}

impl HttpDirectoryService {
    pub fn new(config: HttpDirectoryConfig) -> Result<Self, DirectoryError> {
        if config.profile_api_base.trim().is_empty() {
            return Err(DirectoryError::new("profile_api_base must not be empty"));
        }
        if !config
            .organization_api_base_template
            .contains(ORGANIZATION_PLACEHOLDER)
        {
            return Err(DirectoryError::new(format!(
                "organization_api_base_template must contain {ORGANIZATION_PLACEHOLDER}"
            )));
        }

        let client = Client::builder().build().map_err(|error| {
            DirectoryError::new(format!("failed to initialize http client: {error}"))
        })?;

        let mut normalized = config;
        normalized.profile_api_base = normalized
            .profile_api_base
            .trim()
            .trim_end_matches('/')
            .to_string();
        normalized.organization_api_base_template = normalized
            .organization_api_base_template
            .trim()
            .trim_end_matches('/')
            .to_string();
        normalized.timeout_ms = normalized.timeout_ms.max(1);

        Ok(Self {
            config: normalized,
            client,
        })
    }

    fn profile_url(&self, path: &str) -> String {
        format!("{}{}", self.config.profile_api_base, path)
    }

    fn organization_url(
        &self,
        organization_id: &str,
        path: &str,
    ) -> Result<String, DirectoryError> {
        let organization_id = organization_id.trim();
        if !is_account_name(organization_id) {
            return Err(DirectoryError::new(format!(
                "organization id {organization_id:?} is not a valid account name"
            )));
        }
        let base = self
            .config
            .organization_api_base_template
            .replace(ORGANIZATION_PLACEHOLDER, organization_id);
        Ok(format!("{base}{path}"))
    }

    async fn get_json(
        &self,
        operation: &str,
        credential: &BearerCredential,
        url: String,
        query: &[(&str, &str)],
    ) -> Result<Value, DirectoryError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(credential.expose())
            .header(ACCEPT, "application/json")
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await
            .map_err(|error| map_request_error(operation, error))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            DirectoryError::with_status(
                status.as_u16(),
                format!("operation={operation} failed to read response body: {error}"),
            )
        })?;
        debug!(operation, status = status.as_u16(), "directory request completed");
        if !status.is_success() {
            return Err(map_http_status_error(operation, status, &body));
        }
        serde_json::from_str(&body).map_err(|error| {
            DirectoryError::new(format!(
                "operation={operation} invalid json response: {error}"
            ))
        })
    }

    async fn list_accounts(
        &self,
        credential: &BearerCredential,
        relation: &str,
        principal_alias: &str,
    ) -> Result<Vec<OrganizationRecord>, DirectoryError> {
        let payload = self
            .get_json(
                "list_accounts",
                credential,
                self.profile_url("/_apis/accounts"),
                &[
                    (relation, principal_alias),
                    ("api-version", self.config.accounts_api_version.as_str()),
                ],
            )
            .await?;
        Ok(extract_accounts(&payload))
    }
}

#[async_trait]
impl DirectoryService for HttpDirectoryService {
    async fn get_profile(
        &self,
        credential: &BearerCredential,
    ) -> Result<PrincipalProfile, DirectoryError> {
        let payload = self
            .get_json(
                "get_profile",
                credential,
                self.profile_url("/_apis/profile/profiles/me"),
                &[("api-version", self.config.profile_api_version.as_str())],
            )
            .await?;
        let alias = core_attribute(&payload, "PublicAlias")
            .or_else(|| non_empty_str(&payload, "publicAlias"))
            .or_else(|| non_empty_str(&payload, "id"))
            .ok_or_else(|| DirectoryError::new("operation=get_profile missing public alias"))?;
        Ok(PrincipalProfile {
            alias,
            display_name: core_attribute(&payload, "DisplayName")
                .or_else(|| non_empty_str(&payload, "displayName")),
        })
    }

    async fn list_organizations(
        &self,
        credential: &BearerCredential,
        principal_alias: &str,
    ) -> Result<OrganizationListing, DirectoryError> {
        let (owned, member) = tokio::try_join!(
            self.list_accounts(credential, "ownerId", principal_alias),
            self.list_accounts(credential, "memberId", principal_alias),
        )?;
        Ok(OrganizationListing { owned, member })
    }

    async fn validate(
        &self,
        credential: &BearerCredential,
        organization_id: &str,
    ) -> Result<ValidatedPrincipal, DirectoryError> {
        let payload = self
            .get_json(
                "validate",
                credential,
                self.organization_url(organization_id, "/_apis/connectionData")?,
                &[],
            )
            .await?;
        let principal_id = payload
            .get("authenticatedUser")
            .and_then(|user| non_empty_str(user, "id"))
            .ok_or_else(|| {
                DirectoryError::new("operation=validate missing authenticated user")
            })?;
        Ok(ValidatedPrincipal { principal_id })
    }
}

/// Account names are single URL path segments of ASCII letters, digits,
/// hyphens and underscores.
fn is_account_name(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn non_empty_str(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn core_attribute(profile: &Value, name: &str) -> Option<String> {
    profile
        .get("coreAttributes")
        .and_then(|attributes| attributes.get(name))
        .and_then(|attribute| non_empty_str(attribute, "value"))
}

fn extract_accounts(payload: &Value) -> Vec<OrganizationRecord> {
    payload
        .get("value")
        .and_then(Value::as_array)
        .map(|accounts| {
            accounts
                .iter()
                .filter_map(|account| non_empty_str(account, "accountName"))
                .map(|name| OrganizationRecord::new(name.clone(), name))
                .collect()
        })
        .unwrap_or_default()
}

fn map_request_error(operation: &str, error: reqwest::Error) -> DirectoryError {
    if error.is_timeout() {
        return DirectoryError::new(format!("operation={operation} request timed out"));
    }
    DirectoryError::new(format!("operation={operation} request failed: {error}"))
}

fn map_http_status_error(operation: &str, status: StatusCode, body: &str) -> DirectoryError {
    DirectoryError::with_status(
        status.as_u16(),
        format!("operation={operation} body={}", truncate_error_body(body)),
    )
}

fn truncate_error_body(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let truncated = trimmed
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect::<String>();
    format!("{truncated}...")
}
