use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use devkit_auth::{
    BearerCredential, IdentityDelegate, PersonalTokenDelegate, Prompt, SessionCollaborators,
    SessionManager, SessionManagerConfig,
};
use devkit_azure::{
    is_executable_available, AzureCliDelegate, AzureCliDelegateConfig, HttpDirectoryConfig,
    HttpDirectoryService,
};
use devkit_secrets::{FileSecretStore, FileSecretStoreOptions};
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli_args::{Cli, CliAuthMode};

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub(crate) fn session_manager_config(cli: &Cli) -> SessionManagerConfig {
    SessionManagerConfig {
        portal_url: cli.portal_url.trim().to_string(),
        network_timeout_ms: cli.network_timeout_ms,
        delegate_timeout_ms: cli.delegate_timeout_ms,
        ..SessionManagerConfig::default()
    }
}

pub(crate) fn open_secret_store(cli: &Cli) -> Result<Arc<FileSecretStore>> {
    let store = FileSecretStore::open(FileSecretStoreOptions {
        path: cli.secret_store.clone(),
        encryption: cli.secret_store_encryption.into(),
        key: cli.secret_store_key.clone(),
    })
    .with_context(|| {
        format!(
            "failed to open secret store {}",
            cli.secret_store.display()
        )
    })?;
    Ok(Arc::new(store))
}

pub(crate) fn build_identity_delegate(
    cli: &Cli,
    prompt: Arc<dyn Prompt>,
) -> Result<Arc<dyn IdentityDelegate>> {
    match cli.auth_mode {
        CliAuthMode::Pat => {
            let delegate = PersonalTokenDelegate::new(prompt);
            Ok(match cli.token.as_deref().and_then(BearerCredential::new) {
                Some(token) => Arc::new(delegate.with_token(token)),
                None => Arc::new(delegate),
            })
        }
        CliAuthMode::AzureCli => {
            if !is_executable_available(&cli.azure_cli) {
                warn!(
                    executable = %cli.azure_cli,
                    "azure cli not found; pass --auth-mode pat to sign in with a personal access token"
                );
            }
            let delegate = AzureCliDelegate::new(AzureCliDelegateConfig {
                executable: cli.azure_cli.clone(),
                timeout_ms: cli.delegate_timeout_ms,
                ..AzureCliDelegateConfig::default()
            })
            .map_err(|error| anyhow!("invalid azure cli configuration: {error}"))?;
            Ok(Arc::new(delegate))
        }
    }
}

pub(crate) fn build_session_manager(
    cli: &Cli,
    secrets: Arc<FileSecretStore>,
    prompt: Arc<dyn Prompt>,
) -> Result<Arc<SessionManager>> {
    let directory = HttpDirectoryService::new(HttpDirectoryConfig {
        timeout_ms: cli.network_timeout_ms,
        ..HttpDirectoryConfig::default()
    })
    .map_err(|error| anyhow!("invalid directory configuration: {error}"))?;
    let delegate = build_identity_delegate(cli, prompt.clone())?;
    Ok(Arc::new(SessionManager::new(
        session_manager_config(cli),
        SessionCollaborators {
            secrets,
            delegate,
            directory: Arc::new(directory),
            prompt,
        },
    )))
}
