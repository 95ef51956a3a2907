//! Registry endpoint handle and its transport configuration.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::RegistryConfig;

/// Client identification sent to managed registries.
pub const CLIENT_USER_AGENT: &str = concat!(
    "SOCI Index Builder (soci-registry/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Basic-scheme credentials for one registry.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    username: String,
    password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Decode an opaque `base64(username:password)` authorization token.
    pub fn from_token(token: &str) -> Option<Self> {
        let decoded = STANDARD.decode(token.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        if username.is_empty() {
            return None;
        }
        Some(Self::new(username, password))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Value of the `Authorization` header, `Basic <token>`.
    pub fn header_value(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Handle bound to one remote registry host.
///
/// Only mutable while the client is being constructed; the client keeps it
/// behind an `Arc` afterwards, so every network call observes the final
/// credentials.
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    /// Registry host with optional port (e.g., "public.ecr.aws", "localhost:5000")
    host: String,
    /// Reach the registry over plain HTTP
    insecure: bool,
    /// Credentials sent with every request
    credentials: Option<BasicCredentials>,
    /// Client identification, library default when unset
    user_agent: Option<&'static str>,
    /// Reuse window for bearer tokens
    token_cache_ttl: Duration,
}

impl RegistryEndpoint {
    /// Parse a `hostname[:port]` registry URL, optionally prefixed by a scheme.
    pub fn parse(url: &str, config: &RegistryConfig) -> Result<Self> {
        let construction_error = |message: String| RegistryError::ConstructionError {
            registry: url.to_string(),
            message,
        };

        let trimmed = url.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("https".to_string(), trimmed),
        };
        if scheme != "http" && scheme != "https" {
            return Err(construction_error(format!(
                "unsupported scheme '{}'",
                scheme
            )));
        }

        let parsed = reqwest::Url::parse(&format!("{}://{}", scheme, rest))
            .map_err(|e| construction_error(e.to_string()))?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| construction_error("missing registry host".to_string()))?;
        if parsed.path() != "/" || parsed.query().is_some() || !parsed.username().is_empty() {
            return Err(construction_error(
                "registry URL must be hostname[:port] without path, query or userinfo"
                    .to_string(),
            ));
        }

        let host = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let insecure = scheme == "http" || config.is_insecure(&host);

        Ok(Self {
            insecure,
            credentials: config
                .credentials
                .as_ref()
                .map(|c| BasicCredentials::new(&c.username, &c.password)),
            user_agent: None,
            token_cache_ttl: Duration::from_secs(config.token_cache_ttl_secs),
            host,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn scheme(&self) -> &'static str {
        if self.insecure {
            "http"
        } else {
            "https"
        }
    }

    pub fn credentials(&self) -> Option<&BasicCredentials> {
        self.credentials.as_ref()
    }

    pub fn user_agent(&self) -> Option<&'static str> {
        self.user_agent
    }

    pub fn token_cache_ttl(&self) -> Duration {
        self.token_cache_ttl
    }

    /// `Authorization` header value for Basic credentials, if any.
    pub fn authorization_header(&self) -> Option<String> {
        self.credentials.as_ref().map(BasicCredentials::header_value)
    }

    /// Install credentials and client identification.
    pub(crate) fn install_credentials(
        &mut self,
        credentials: BasicCredentials,
        user_agent: &'static str,
    ) {
        self.credentials = Some(credentials);
        self.user_agent = Some(user_agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soci_registry_core::StaticCredentials;

    #[test]
    fn test_parse_plain_host() {
        let endpoint = RegistryEndpoint::parse("public.ecr.aws", &RegistryConfig::default()).unwrap();
        assert_eq!(endpoint.host(), "public.ecr.aws");
        assert_eq!(endpoint.scheme(), "https");
        assert!(endpoint.credentials().is_none());
        assert!(endpoint.user_agent().is_none());
        assert_eq!(endpoint.token_cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_host_with_port_and_scheme() {
        let endpoint =
            RegistryEndpoint::parse("http://localhost:5000", &RegistryConfig::default()).unwrap();
        assert_eq!(endpoint.host(), "localhost:5000");
        assert!(endpoint.is_insecure());
        assert_eq!(endpoint.scheme(), "http");
    }

    #[test]
    fn test_parse_insecure_from_config() {
        let config = RegistryConfig {
            insecure_registries: vec!["localhost:5000".to_string()],
            ..Default::default()
        };
        let endpoint = RegistryEndpoint::parse("localhost:5000", &config).unwrap();
        assert!(endpoint.is_insecure());
    }

    #[test]
    fn test_parse_trailing_slash_allowed() {
        let endpoint = RegistryEndpoint::parse("docker.io/", &RegistryConfig::default()).unwrap();
        assert_eq!(endpoint.host(), "docker.io");
    }

    #[test]
    fn test_parse_rejects_invalid_urls() {
        let config = RegistryConfig::default();
        for url in ["", "bad host", "ftp://example.com", "example.com/v2/repo", "https://"] {
            let err = RegistryEndpoint::parse(url, &config).unwrap_err();
            assert!(
                matches!(err, RegistryError::ConstructionError { .. }),
                "expected construction error for {:?}",
                url
            );
        }
    }

    #[test]
    fn test_static_credentials_from_config() {
        let config = RegistryConfig {
            credentials: Some(StaticCredentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
            ..Default::default()
        };
        let endpoint = RegistryEndpoint::parse("ghcr.io", &config).unwrap();
        assert_eq!(endpoint.credentials().unwrap().username(), "user");
        assert_eq!(
            endpoint.authorization_header().unwrap(),
            format!("Basic {}", STANDARD.encode("user:pass"))
        );
    }

    #[test]
    fn test_token_round_trip() {
        let token = STANDARD.encode("AWS:secret-password");
        let credentials = BasicCredentials::from_token(&token).unwrap();
        assert_eq!(credentials.username(), "AWS");
        assert_eq!(credentials.password(), "secret-password");
        assert_eq!(credentials.header_value(), format!("Basic {}", token));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(BasicCredentials::from_token("not base64!").is_none());
        assert!(BasicCredentials::from_token(&STANDARD.encode("no-colon")).is_none());
        assert!(BasicCredentials::from_token(&STANDARD.encode(":password")).is_none());
    }

    #[test]
    fn test_install_credentials() {
        let mut endpoint = RegistryEndpoint::parse(
            "123456789012.dkr.ecr.us-east-1.amazonaws.com",
            &RegistryConfig::default(),
        )
        .unwrap();
        endpoint.install_credentials(BasicCredentials::new("AWS", "pw"), CLIENT_USER_AGENT);
        assert_eq!(endpoint.user_agent(), Some(CLIENT_USER_AGENT));
        assert_eq!(endpoint.credentials().unwrap().password(), "pw");
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let debug = format!("{:?}", BasicCredentials::new("AWS", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
