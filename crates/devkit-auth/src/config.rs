use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SESSION_SECRET_KEY: &str = "AzureDevOpsOAuth";
/// Resource scope the federated identity provider issues tokens for.
pub const DEFAULT_SCOPE_HINT: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";
pub const DEFAULT_PORTAL_URL: &str = "https://dev.azure.com";
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_DELEGATE_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Public struct `SessionManagerConfig` used to construct a [`crate::SessionManager`].
pub struct SessionManagerConfig {
    /// Secret store key the session record is persisted under.
    pub secret_key: String,
    pub scope_hint: String,
    /// Opened when the user accepts the remediation offered after a failed
    /// organization validation.
    pub portal_url: String,
    pub network_timeout_ms: u64,
    /// Delegation may wait on interactive consent, so it gets its own budget.
    pub delegate_timeout_ms: u64,
    pub event_capacity: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SESSION_SECRET_KEY.to_string(),
            scope_hint: DEFAULT_SCOPE_HINT.to_string(),
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            delegate_timeout_ms: DEFAULT_DELEGATE_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionManagerConfig {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms.max(1))
    }

    pub fn delegate_timeout(&self) -> Duration {
        Duration::from_millis(self.delegate_timeout_ms.max(1))
    }

    pub(crate) fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionManagerConfig;

    #[test]
    fn unit_partial_config_falls_back_to_defaults() {
        let config: SessionManagerConfig =
            serde_json::from_str("{\"network_timeout_ms\": 250}").expect("config");
        assert_eq!(config.network_timeout_ms, 250);
        assert_eq!(config.secret_key, "AzureDevOpsOAuth");
        assert_eq!(config.portal_url, "https://dev.azure.com");
    }

    #[test]
    fn regression_zero_values_are_clamped() {
        let config = SessionManagerConfig {
            network_timeout_ms: 0,
            delegate_timeout_ms: 0,
            event_capacity: 0,
            ..SessionManagerConfig::default()
        };
        assert_eq!(config.network_timeout().as_millis(), 1);
        assert_eq!(config.delegate_timeout().as_millis(), 1);
        assert_eq!(config.event_capacity(), 1);
    }
}
