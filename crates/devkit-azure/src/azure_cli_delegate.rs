use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use devkit_auth::{BearerCredential, DelegateError, DelegatedCredential, IdentityDelegate};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::cli_executable::resolve_executable;

pub const DEFAULT_AZURE_CLI_EXECUTABLE: &str = "az";
const DEFAULT_AZURE_CLI_TIMEOUT_MS: u64 = 60_000;
const SCOPE_SUFFIX: &str = "/.default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCliDelegateConfig {
    pub executable: String,
    /// Resource the token is requested for. Derived from the scope hint when unset.
    pub resource: Option<String>,
    pub extra_args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for AzureCliDelegateConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_AZURE_CLI_EXECUTABLE.to_string(),
            resource: None,
            extra_args: Vec::new(),
            timeout_ms: DEFAULT_AZURE_CLI_TIMEOUT_MS,
        }
    }
}

/// Federated delegate that borrows the signed-in Azure CLI identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCliDelegate {
    config: AzureCliDelegateConfig,
}

impl AzureCliDelegate {
    pub fn new(config: AzureCliDelegateConfig) -> Result<Self, DelegateError> {
        if config.executable.trim().is_empty() {
            return Err(DelegateError::new("azure cli executable is empty"));
        }
        if config.timeout_ms == 0 {
            return Err(DelegateError::new(
                "azure cli timeout must be greater than 0ms",
            ));
        }
        Ok(Self { config })
    }

    fn resource_for(&self, scope_hint: &str) -> String {
        match self.config.resource.as_deref().map(str::trim) {
            Some(resource) if !resource.is_empty() => resource.to_string(),
            _ => resource_from_scope(scope_hint),
        }
    }
}

async fn spawn_with_text_file_busy_retry(
    command: &mut Command,
    executable: &str,
) -> Result<tokio::process::Child, DelegateError> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    for attempt in 0..=MAX_TEXT_FILE_BUSY_RETRIES {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(error) => {
                if error.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES
                {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    continue;
                }
                return Err(DelegateError::new(format!(
                    "failed to spawn azure cli '{executable}': {error}"
                )));
            }
        }
    }

    Err(DelegateError::new(format!(
        "failed to spawn azure cli '{executable}': unknown error"
    )))
}

#[async_trait]
impl IdentityDelegate for AzureCliDelegate {
    fn delegate_name(&self) -> &'static str {
        "azure-cli"
    }

    async fn acquire(&self, scope_hint: &str) -> Result<DelegatedCredential, DelegateError> {
        let executable = resolve_executable(&self.config.executable).ok_or_else(|| {
            DelegateError::new(format!(
                "azure cli '{}' was not found; install it and run `az login`",
                self.config.executable.trim()
            ))
        })?;
        let resource = self.resource_for(scope_hint);

        let mut command = Command::new(&executable);
        command.kill_on_drop(true);
        command.args(["account", "get-access-token", "--resource"]);
        command.arg(&resource);
        command.args(["--output", "json"]);
        command.args(&self.config.extra_args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        let child = spawn_with_text_file_busy_retry(&mut command, &self.config.executable).await?;

        let output = tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            DelegateError::new(format!(
                "azure cli timed out after {}ms",
                self.config.timeout_ms
            ))
        })?
        .map_err(|error| DelegateError::new(format!("azure cli process failed: {error}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|value| value.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let summary = summarize_process_failure(&stderr, &stdout);
            return Err(DelegateError::new(format!(
                "azure cli failed with status {status}: {summary}"
            )));
        }

        let credential = parse_access_token(&stdout)?;
        debug!(
            resource = %resource,
            expires_unix = credential.expires_unix,
            "azure cli issued access token"
        );
        Ok(credential)
    }
}

fn resource_from_scope(scope_hint: &str) -> String {
    let trimmed = scope_hint.trim();
    trimmed
        .strip_suffix(SCOPE_SUFFIX)
        .unwrap_or(trimmed)
        .to_string()
}

fn parse_access_token(stdout: &str) -> Result<DelegatedCredential, DelegateError> {
    let value: Value = serde_json::from_str(stdout.trim()).map_err(|error| {
        DelegateError::new(format!("azure cli returned invalid json: {error}"))
    })?;
    let bearer = value
        .get("accessToken")
        .and_then(Value::as_str)
        .and_then(BearerCredential::new)
        .ok_or_else(|| DelegateError::new("azure cli returned an empty access token"))?;

    let credential = DelegatedCredential::new(bearer);
    Ok(match extract_expiry(&value) {
        Some(expires_unix) => credential.expiring_at(expires_unix),
        None => credential,
    })
}

/// Prefers the numeric `expires_on`; older CLI releases only emit the local
/// time string `expiresOn`.
fn extract_expiry(value: &Value) -> Option<u64> {
    if let Some(raw) = value.get("expires_on") {
        let parsed = raw
            .as_u64()
            .or_else(|| raw.as_str().and_then(|text| text.trim().parse().ok()));
        if parsed.is_some() {
            return parsed;
        }
    }
    let text = value.get("expiresOn").and_then(Value::as_str)?;
    let naive = NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    u64::try_from(local.timestamp()).ok()
}

fn summarize_process_failure(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return truncate_for_log(stderr);
    }

    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return truncate_for_log(stdout);
    }

    "no error output".to_string()
}

fn truncate_for_log(text: &str) -> String {
    const MAX_CHARS: usize = 240;
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    text.chars().take(MAX_CHARS).collect::<String>() + "..."
}
