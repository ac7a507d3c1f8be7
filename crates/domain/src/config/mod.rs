mod agent;
mod backup;
mod ca;
mod ha;
mod mfa;
mod plane;
mod security;
mod server;
mod store;

pub use agent::*;
pub use backup::*;
pub use ca::*;
pub use ha::*;
pub use mfa::*;
pub use plane::*;
pub use security::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Center config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the central control-plane service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CenterConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub plane: AgentPlaneConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub ha: HaConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub mfa: MfaConfig,
    #[serde(default)]
    pub ca: CaConfig,
}

impl CenterConfig {
    /// Check the resolved configuration and report problems. Errors prevent
    /// startup; warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.security.signing_key_env.is_empty() {
            issues.push(ConfigIssue::error(
                "security.signing_key_env must name an environment variable",
            ));
        }
        if self.security.encryption_key_env.is_empty() {
            issues.push(ConfigIssue::error(
                "security.encryption_key_env must name an environment variable",
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            issues.push(ConfigIssue::error("store.path must be set"));
        }
        if self.plane.tls.cert_path.as_os_str().is_empty() {
            issues.push(ConfigIssue::warning(
                "plane.tls.cert_path unset; a plane certificate will be provisioned \
                 under the CA directory",
            ));
        }
        if self.ha.enabled && self.ha.lease_secs <= self.ha.renew_secs {
            issues.push(ConfigIssue::error(
                "ha.lease_secs must be greater than ha.renew_secs",
            ));
        }
        if self.backup.retain == 0 {
            issues.push(ConfigIssue::warning(
                "backup.retain is 0 — every snapshot will be pruned immediately",
            ));
        }
        if self.mfa.challenge_max_attempts == 0 {
            issues.push(ConfigIssue::error(
                "mfa.challenge_max_attempts must be at least 1",
            ));
        }
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_center_config_passes_validation() {
        let config = CenterConfig::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn ha_lease_shorter_than_renew_is_an_error() {
        let mut config = CenterConfig::default();
        config.ha.enabled = true;
        config.ha.lease_secs = 5;
        config.ha.renew_secs = 10;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn minimal_toml_round_trip() {
        let toml = r#"
            [server]
            port = 8443

            [store]
            path = "/var/lib/mfasrv/state.db"

            [agent]
            center_url = "https://center.example:9443"
            failover_mode = "cached_only"
        "#;
        let center: CenterConfig = toml::from_str(toml).unwrap();
        assert_eq!(center.server.port, 8443);

        let agent: AgentFileConfig = toml::from_str(toml).unwrap();
        assert_eq!(agent.agent.center_url, "https://center.example:9443");
    }
}
