use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;

use crate::services::RemovalPolicy;

/// Configuration file name, without extension.
pub const CONFIG_FILE: &str = "affiliation";

/// Environment variable prefix, e.g. `AFFILIATION__STORE__URL`.
pub const ENV_PREFIX: &str = "AFFILIATION";

#[derive(Debug, Clone, Deserialize)]
pub struct AffiliationConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub affiliations: AffiliationsConfig,
    #[serde(default)]
    pub identities: IdentitiesConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

/// `affiliations.allow_remove` - the `AllowAffiliationRemove` switch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AffiliationsConfig {
    #[serde(default)]
    pub allow_remove: bool,
}

/// `identities.allow_remove` - the `AllowIdentityRemove` switch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentitiesConfig {
    #[serde(default)]
    pub allow_remove: bool,
}

fn default_service_name() -> String {
    "affiliation-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

impl AffiliationConfig {
    /// Load from `affiliation.{toml,yaml,json}` and `AFFILIATION__*` variables.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(CONFIG_FILE, ENV_PREFIX)
    }

    pub fn load_from(file_name: &str, prefix: &str) -> Result<Self, AppError> {
        let config: Self = core_config::load(file_name, prefix)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.store.backend == StoreBackend::Postgres
            && self.store.url.as_deref().map_or(true, str::is_empty)
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AFFILIATION__STORE__URL is required for the postgres backend"
            )));
        }

        if self.store.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AFFILIATION__STORE__MAX_CONNECTIONS must be greater than 0"
            )));
        }

        if self.store.min_connections > self.store.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AFFILIATION__STORE__MIN_CONNECTIONS ({}) exceeds MAX_CONNECTIONS ({})",
                self.store.min_connections,
                self.store.max_connections
            )));
        }

        Ok(())
    }

    /// Removal switches as configured at startup.
    pub fn removal_policy(&self) -> RemovalPolicy {
        RemovalPolicy::new(self.affiliations.allow_remove, self.identities.allow_remove)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        let config = AffiliationConfig::load_from("does-not-exist", "AFFTEST_EMPTY").unwrap();
        assert_eq!(config.service_name, "affiliation-service");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.removal_policy(), RemovalPolicy::default());
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        std::env::set_var("AFFTEST__STORE__BACKEND", "postgres");
        std::env::set_var("AFFTEST__STORE__URL", "postgres://localhost/affiliations");
        std::env::set_var("AFFTEST__STORE__MAX_CONNECTIONS", "4");
        std::env::set_var("AFFTEST__AFFILIATIONS__ALLOW_REMOVE", "true");

        let config = AffiliationConfig::load_from("does-not-exist", "AFFTEST");

        std::env::remove_var("AFFTEST__STORE__BACKEND");
        std::env::remove_var("AFFTEST__STORE__URL");
        std::env::remove_var("AFFTEST__STORE__MAX_CONNECTIONS");
        std::env::remove_var("AFFTEST__AFFILIATIONS__ALLOW_REMOVE");

        let config = config.unwrap();
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.store.max_connections, 4);
        assert_eq!(config.removal_policy(), RemovalPolicy::new(true, false));
    }

    #[test]
    fn test_postgres_requires_url() {
        let mut config = AffiliationConfig::load_from("does-not-exist", "AFFTEST_NONE").unwrap();
        config.store.backend = StoreBackend::Postgres;
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));

        config.store.url = Some("postgres://localhost/affiliations".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connection_bounds() {
        let mut config = AffiliationConfig::load_from("does-not-exist", "AFFTEST_NONE").unwrap();
        config.store.min_connections = 20;
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }
}
