//! Credential injection for managed registries.
//!
//! A [`CredentialProvider`] yields short-lived authorization tokens; [`authorize`]
//! turns the first one into Basic credentials on a [`RegistryEndpoint`].

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::error::DisplayErrorContext;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::RegistryConfig;

use crate::endpoint::{BasicCredentials, RegistryEndpoint, CLIENT_USER_AGENT};

/// Source of registry authorization tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Request authorization tokens, each an opaque `base64(username:password)`.
    async fn authorization_tokens(&self) -> Result<Vec<String>>;
}

/// Amazon ECR `GetAuthorizationToken` provider.
#[derive(Debug, Clone, Default)]
pub struct EcrTokenProvider {
    /// Alternate ECR API endpoint; SDK discovery when unset
    endpoint: Option<String>,
}

impl EcrTokenProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.token_endpoint.clone())
    }

    async fn client(&self) -> aws_sdk_ecr::Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(ref endpoint) = self.endpoint {
            loader = loader.endpoint_url(endpoint.as_str());
        }
        aws_sdk_ecr::Client::new(&loader.load().await)
    }
}

#[async_trait]
impl CredentialProvider for EcrTokenProvider {
    fn name(&self) -> &str {
        "ecr"
    }

    async fn authorization_tokens(&self) -> Result<Vec<String>> {
        tracing::debug!(
            endpoint = self.endpoint.as_deref().unwrap_or("default"),
            "Requesting ECR authorization token"
        );

        let output = self
            .client()
            .await
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| RegistryError::AuthError {
                registry: self.name().to_string(),
                message: format!("GetAuthorizationToken failed: {}", DisplayErrorContext(&e)),
            })?;

        Ok(output
            .authorization_data()
            .iter()
            .map(|data| data.authorization_token().unwrap_or_default().to_string())
            .collect())
    }
}

/// Obtain a token from `provider` and install it on `endpoint`.
///
/// Installs Basic credentials and [`CLIENT_USER_AGENT`]. Fails with
/// `AuthError` when the provider errors, returns no entries, or returns an
/// empty or undecodable token.
pub async fn authorize(
    endpoint: &mut RegistryEndpoint,
    provider: &dyn CredentialProvider,
) -> Result<()> {
    let registry = endpoint.host().to_string();
    let auth_error = |message: String| RegistryError::AuthError {
        registry: registry.clone(),
        message,
    };

    tracing::info!(registry = %registry, provider = provider.name(), "Authorizing managed registry");

    let tokens = provider.authorization_tokens().await.map_err(|e| match e {
        RegistryError::AuthError { message, .. } => auth_error(message),
        other => auth_error(other.to_string()),
    })?;

    let token = tokens.into_iter().next().ok_or_else(|| {
        auth_error("Couldn't authorize: empty authorization data returned".to_string())
    })?;
    if token.is_empty() {
        return Err(auth_error(
            "Couldn't authorize: empty authorization token returned".to_string(),
        ));
    }

    let credentials = BasicCredentials::from_token(&token).ok_or_else(|| {
        auth_error("Couldn't authorize: malformed authorization token returned".to_string())
    })?;

    endpoint.install_credentials(credentials, CLIENT_USER_AGENT);
    Ok(())
}
