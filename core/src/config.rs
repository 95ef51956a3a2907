use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RegistryError, Result};

/// Environment variable naming an alternate ECR token service endpoint.
pub const TOKEN_ENDPOINT_ENV: &str = "ECR_ENDPOINT";

/// Environment variables holding static registry credentials.
pub const USERNAME_ENV: &str = "REGISTRY_USERNAME";
pub const PASSWORD_ENV: &str = "REGISTRY_PASSWORD";

/// Comma-separated hosts reached over plain HTTP.
pub const INSECURE_REGISTRIES_ENV: &str = "SOCI_REGISTRY_INSECURE";

/// Override for the graph copy concurrency limit.
pub const MAX_CONCURRENCY_ENV: &str = "SOCI_REGISTRY_MAX_CONCURRENCY";

/// Registry client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Hosts reached over plain HTTP (e.g., "localhost:5000")
    pub insecure_registries: Vec<String>,

    /// Upper bound on concurrent object transfers within one operation
    pub max_concurrency: usize,

    /// Alternate token service address; default discovery when unset
    pub token_endpoint: Option<String>,

    /// How long bearer tokens for metadata requests are reused
    pub token_cache_ttl_secs: u64,

    /// Static credentials for registries without a managed provider
    pub credentials: Option<StaticCredentials>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            insecure_registries: Vec::new(),
            max_concurrency: 3,
            token_endpoint: None,
            token_cache_ttl_secs: 60,
            credentials: None,
        }
    }
}

/// Username and password for Basic authentication
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RegistryConfig {
    /// Default configuration overlaid with environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_yaml::from_str(&data)?;
        config.with_env_overrides()
    }

    /// Apply environment variables on top of this configuration.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(endpoint) = lookup(TOKEN_ENDPOINT_ENV).filter(|v| !v.is_empty()) {
            self.token_endpoint = Some(endpoint);
        }

        if let (Some(username), Some(password)) = (lookup(USERNAME_ENV), lookup(PASSWORD_ENV)) {
            self.credentials = Some(StaticCredentials { username, password });
        }

        if let Some(hosts) = lookup(INSECURE_REGISTRIES_ENV) {
            self.insecure_registries = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = lookup(MAX_CONCURRENCY_ENV) {
            self.max_concurrency = value.parse().map_err(|_| {
                RegistryError::ConfigError(format!(
                    "{} must be a positive integer, got '{}'",
                    MAX_CONCURRENCY_ENV, value
                ))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(RegistryError::ConfigError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `host` should be reached over plain HTTP.
    pub fn is_insecure(&self, host: &str) -> bool {
        self.insecure_registries.iter().any(|h| h == host)
    }
}
