//! Managed-registry endpoint classification.
//!
//! Registries whose hostname matches a known managed-provider shape get
//! credentials injected automatically. The built-in entry covers Amazon ECR
//! private registries (`<account>.dkr.ecr.<region>.amazonaws.com`); further
//! providers can be registered on a [`ProviderRegistry`].

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::RegistryConfig;

use crate::credentials::{CredentialProvider, EcrTokenProvider};

/// Hostname shape of an ECR private registry.
pub const ECR_HOST_PATTERN: &str = r"^\d{12}\.dkr\.ecr\.[a-z0-9-]+\.amazonaws\.com$";

static ECR_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(ECR_HOST_PATTERN).expect("ECR hostname pattern must compile"));

/// Whether `url` points at a managed registry that needs injected credentials.
pub fn is_managed_endpoint(url: &str) -> bool {
    ECR_HOST.is_match(&registry_host(url))
}

/// Lowercased hostname of a registry URL, without scheme, port or path.
pub fn registry_host(url: &str) -> String {
    let without_scheme = url
        .trim()
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_else(|| url.trim());
    let authority = without_scheme.split('/').next().unwrap_or_default();
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    host.to_ascii_lowercase()
}

/// Ordered `(hostname pattern, credential provider)` pairs.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<(Regex, Arc<dyn CredentialProvider>)>,
}

impl ProviderRegistry {
    /// Registry without any managed providers; every endpoint is left as-is.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in ECR provider.
    ///
    /// Compiles the built-in pattern eagerly so a broken pattern aborts at
    /// startup instead of on first use.
    pub fn with_defaults(config: &RegistryConfig) -> Self {
        let mut registry = Self::empty();
        registry.providers.push((
            Lazy::force(&ECR_HOST).clone(),
            Arc::new(EcrTokenProvider::from_config(config)),
        ));
        registry
    }

    /// Add a provider for hostnames matching `pattern`.
    pub fn register(&mut self, pattern: &str, provider: Arc<dyn CredentialProvider>) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|e| {
            RegistryError::ConfigError(format!("Invalid endpoint pattern '{}': {}", pattern, e))
        })?;
        self.providers.push((regex, provider));
        Ok(())
    }

    /// First provider whose pattern matches the host of `url`.
    pub fn provider_for(&self, url: &str) -> Option<Arc<dyn CredentialProvider>> {
        let host = registry_host(url);
        self.providers
            .iter()
            .find(|(pattern, _)| pattern.is_match(&host))
            .map(|(_, provider)| Arc::clone(provider))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
