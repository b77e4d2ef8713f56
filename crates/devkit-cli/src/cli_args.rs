use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use devkit_secrets::SecretStoreEncryptionMode;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliAuthMode {
    /// Personal access token, typed in or passed with --token.
    Pat,
    /// Access token borrowed from the signed-in Azure CLI.
    AzureCli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliSecretStoreEncryptionMode {
    None,
    Keyed,
}

impl From<CliSecretStoreEncryptionMode> for SecretStoreEncryptionMode {
    fn from(value: CliSecretStoreEncryptionMode) -> Self {
        match value {
            CliSecretStoreEncryptionMode::None => SecretStoreEncryptionMode::None,
            CliSecretStoreEncryptionMode::Keyed => SecretStoreEncryptionMode::Keyed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum CliCommand {
    /// Sign in and choose an organization.
    Login,
    /// Sign out and delete the stored session.
    Logout,
    /// Choose a different organization for the current sign-in.
    SwitchOrg,
    /// Show the current session.
    Status {
        #[arg(long, help = "Print status as JSON")]
        json: bool,
    },
    /// Print session changes, including those made by other processes, until Ctrl-C.
    Watch,
}

#[derive(Debug, Parser)]
#[command(
    name = "devkit",
    about = "Azure DevOps session manager for local developer tooling",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    #[arg(
        long = "secret-store",
        env = "DEVKIT_SECRET_STORE",
        default_value = ".devkit/secrets.json",
        help = "Secret store file shared by every devkit process"
    )]
    pub secret_store: PathBuf,

    #[arg(
        long = "secret-store-key",
        env = "DEVKIT_SECRET_STORE_KEY",
        hide_env_values = true,
        help = "Encryption key for secret store entries; a machine-derived key is used when unset"
    )]
    pub secret_store_key: Option<String>,

    #[arg(
        long = "secret-store-encryption",
        env = "DEVKIT_SECRET_STORE_ENCRYPTION",
        value_enum,
        default_value_t = CliSecretStoreEncryptionMode::Keyed,
        help = "Secret store encryption mode: none or keyed"
    )]
    pub secret_store_encryption: CliSecretStoreEncryptionMode,

    #[arg(
        long = "auth-mode",
        env = "DEVKIT_AUTH_MODE",
        value_enum,
        default_value_t = CliAuthMode::AzureCli,
        help = "How the bearer credential is obtained"
    )]
    pub auth_mode: CliAuthMode,

    #[arg(
        long,
        env = "DEVKIT_TOKEN",
        hide_env_values = true,
        help = "Personal access token used by --auth-mode pat instead of prompting"
    )]
    pub token: Option<String>,

    #[arg(
        long = "azure-cli",
        env = "DEVKIT_AZURE_CLI",
        default_value = "az",
        help = "Azure CLI executable used by --auth-mode azure-cli"
    )]
    pub azure_cli: String,

    #[arg(
        long = "network-timeout-ms",
        env = "DEVKIT_NETWORK_TIMEOUT_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Timeout for each directory request"
    )]
    pub network_timeout_ms: u64,

    #[arg(
        long = "delegate-timeout-ms",
        env = "DEVKIT_DELEGATE_TIMEOUT_MS",
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        help = "Timeout for obtaining a credential"
    )]
    pub delegate_timeout_ms: u64,

    #[arg(
        long = "portal-url",
        env = "DEVKIT_PORTAL_URL",
        default_value = "https://dev.azure.com",
        help = "Page opened when an organization cannot be reached"
    )]
    pub portal_url: String,
}
