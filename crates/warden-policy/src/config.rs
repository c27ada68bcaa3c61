//! Policy engine configuration.
//!
//! Configuration is grouped into sections for enforcement defaults, the
//! expression engine, the risk engine and the reload service. Every section
//! has sensible defaults, so an empty TOML document is a valid configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [enforcement]
//! url_default_decision = "deny"
//! method_default_decision = "allow"
//!
//! [risk]
//! trusted_networks = ["10.0.0.0/8"]
//! sensitive_roles = ["ROLE_ADMIN"]
//!
//! [reload]
//! debounce = "250ms"
//! ```

use std::path::Path;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::enforcement::DefaultDecision;

/// Root configuration for the policy engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyEngineConfig {
    /// Enforcement-layer defaults.
    pub enforcement: EnforcementConfig,

    /// Expression engine limits.
    pub expression: ExpressionConfig,

    /// Risk engine tuning.
    pub risk: RiskConfig,

    /// Reload service timing.
    pub reload: ReloadConfig,
}

/// Enforcement-layer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnforcementConfig {
    /// Decision when no URL target matches a request.
    pub url_default_decision: DefaultDecision,

    /// Decision when no policy is registered for an invocation signature.
    pub method_default_decision: DefaultDecision,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            url_default_decision: DefaultDecision::Deny,
            method_default_decision: DefaultDecision::Allow,
        }
    }
}

/// Expression engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpressionConfig {
    /// Maximum nesting of permission-carried condition expressions.
    pub max_permission_depth: usize,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            max_permission_depth: 4,
        }
    }
}

/// Risk engine configuration.
///
/// Contributions are expressed in score points; the engine clamps the sum
/// to `0..=100`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Contribution of a factor that lacks the data it needs.
    pub unknown_contribution: u32,

    /// Networks considered trusted, in CIDR notation.
    pub trusted_networks: Vec<String>,

    /// Contribution when the remote address is outside every trusted network.
    pub untrusted_network_contribution: u32,

    /// First business hour (inclusive, UTC).
    pub business_hours_start: u8,

    /// Last business hour (exclusive, UTC).
    pub business_hours_end: u8,

    /// Contribution for requests outside business hours.
    pub off_hours_contribution: u32,

    /// Authorities that mark a subject as sensitive.
    pub sensitive_roles: Vec<String>,

    /// Contribution when the subject holds a sensitive authority.
    pub sensitive_role_contribution: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            unknown_contribution: 20,
            trusted_networks: vec![
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
                "127.0.0.0/8".to_string(),
                "::1/128".to_string(),
            ],
            untrusted_network_contribution: 40,
            business_hours_start: 8,
            business_hours_end: 18,
            off_hours_contribution: 25,
            sensitive_roles: vec!["ROLE_ADMIN".to_string()],
            sensitive_role_contribution: 15,
        }
    }
}

/// Reload service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Quiet period after the last change notification before reloading.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Periodic reload interval. Zero disables periodic reloads.
    #[serde(with = "humantime_serde")]
    pub periodic_refresh: Duration,

    /// Capacity of the change notification channel.
    pub channel_capacity: usize,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            periodic_refresh: Duration::ZERO,
            channel_capacity: 64,
        }
    }
}

impl ReloadConfig {
    /// Create a configuration for testing with fast timeouts.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(10),
            periodic_refresh: Duration::ZERO,
            channel_capacity: 16,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The configuration document could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl PolicyEngineConfig {
    /// Parse a configuration from a TOML document and validate it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` on malformed TOML and
    /// `ConfigError::InvalidValue` if validation fails.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `max_permission_depth` is zero
    /// - A trusted network is not valid CIDR notation
    /// - Business hours are out of range or empty
    /// - A risk contribution exceeds 100
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expression.max_permission_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "expression.max_permission_depth must be > 0".to_string(),
            ));
        }

        for cidr in &self.risk.trusted_networks {
            if cidr.parse::<IpNetwork>().is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "risk.trusted_networks: '{}' is not valid CIDR notation",
                    cidr
                )));
            }
        }

        let start = self.risk.business_hours_start;
        let end = self.risk.business_hours_end;
        if end > 24 || start >= end {
            return Err(ConfigError::InvalidValue(format!(
                "risk business hours must satisfy start < end <= 24 (got {}..{})",
                start, end
            )));
        }

        let contributions = [
            ("unknown_contribution", self.risk.unknown_contribution),
            (
                "untrusted_network_contribution",
                self.risk.untrusted_network_contribution,
            ),
            ("off_hours_contribution", self.risk.off_hours_contribution),
            (
                "sensitive_role_contribution",
                self.risk.sensitive_role_contribution,
            ),
        ];
        for (name, value) in contributions {
            if value > 100 {
                return Err(ConfigError::InvalidValue(format!(
                    "risk.{} must be <= 100 (got {})",
                    name, value
                )));
            }
        }

        if self.reload.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "reload.channel_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PolicyEngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.enforcement.url_default_decision,
            DefaultDecision::Deny
        );
        assert_eq!(
            config.enforcement.method_default_decision,
            DefaultDecision::Allow
        );
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = PolicyEngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.expression.max_permission_depth, 4);
        assert_eq!(config.reload.debounce, Duration::from_millis(100));
    }

    #[test]
    fn test_parse_sections() {
        let config = PolicyEngineConfig::from_toml_str(
            r#"
            [enforcement]
            url_default_decision = "allow"

            [risk]
            trusted_networks = ["192.168.1.0/24"]
            unknown_contribution = 30

            [reload]
            debounce = "250ms"
            periodic_refresh = "5m"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.enforcement.url_default_decision,
            DefaultDecision::Allow
        );
        assert_eq!(config.risk.trusted_networks, vec!["192.168.1.0/24"]);
        assert_eq!(config.risk.unknown_contribution, 30);
        assert_eq!(config.reload.debounce, Duration::from_millis(250));
        assert_eq!(config.reload.periodic_refresh, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        let mut config = PolicyEngineConfig::default();
        config.risk.trusted_networks = vec!["not-a-network".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_invalid_business_hours_rejected() {
        let mut config = PolicyEngineConfig::default();
        config.risk.business_hours_start = 18;
        config.risk.business_hours_end = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_depth_rejected() {
        let mut config = PolicyEngineConfig::default();
        config.expression.max_permission_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_contribution_over_100_rejected() {
        let mut config = PolicyEngineConfig::default();
        config.risk.off_hours_contribution = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let result = PolicyEngineConfig::from_toml_str("[risk\nfoo = ");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
