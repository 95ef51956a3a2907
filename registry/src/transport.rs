//! Registry transport: the HTTP calls a graph copy needs.
//!
//! [`OciTransport`] speaks the distribution API over one `reqwest` client:
//! bearer token negotiation, manifest and blob reads, blob upload sessions
//! and manifest uploads. The client carries the endpoint's identification,
//! so every request, token requests included, sends the same `User-Agent`.
//! Blob bodies are streamed in both directions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{StreamExt, TryStreamExt};
use oci_distribution::errors::OciErrorCode;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE,
};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::{media_type, sha256_digest, ArtifactDescriptor, Reference};

use crate::endpoint::RegistryEndpoint;
use crate::manifest::detect_media_type;
use crate::store::BlobStream;

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// Largest manifest body accepted from a registry.
pub const MAX_MANIFEST_BYTES: u64 = 4 * 1024 * 1024;

/// Registry calls used by resolve, pull and push.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Describe the manifest at `reference`. `NotFoundError` when absent.
    async fn head_manifest(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> Result<ArtifactDescriptor>;

    /// Download the raw manifest body at `reference`.
    async fn get_manifest(&self, repository: &str, reference: &Reference) -> Result<Vec<u8>>;

    /// Whether a blob with `digest` exists in `repository`.
    async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool>;

    /// Open a download of a blob. The body is not verified here.
    async fn get_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
    ) -> Result<BlobStream>;

    async fn put_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
        content: BlobStream,
    ) -> Result<()>;

    /// Upload a manifest under a tag or its digest.
    async fn put_manifest(
        &self,
        repository: &str,
        reference: &Reference,
        media_type: &str,
        content: Vec<u8>,
    ) -> Result<()>;
}

/// Registry error envelope: `{"errors":[{"code":..,"message":..}]}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Build a `TransportError` from an HTTP status and response body.
///
/// The message reads `response status code <n>: <code>: <message>` when the
/// body carries an error envelope.
pub(crate) fn status_error(status: u16, body: &[u8]) -> RegistryError {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
    match envelope.errors.into_iter().next() {
        Some(first) => RegistryError::TransportError {
            status: Some(status),
            message: format!(
                "response status code {}: {}: {}",
                status,
                first.code.to_ascii_lowercase(),
                first.message
            ),
            code: Some(first.code),
        },
        None => RegistryError::TransportError {
            status: Some(status),
            code: None,
            message: format!(
                "response status code {}: {}",
                status,
                String::from_utf8_lossy(body).trim()
            ),
        },
    }
}

/// Typed form of a registry error code such as `MANIFEST_UNKNOWN`.
fn error_code(code: &str) -> Option<OciErrorCode> {
    serde_json::from_value(serde_json::Value::String(code.to_ascii_uppercase())).ok()
}

/// Whether an error body reports an unknown manifest, blob or repository.
fn names_unknown_object(body: &[u8]) -> bool {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
    envelope.errors.iter().any(|e| {
        matches!(
            error_code(&e.code),
            Some(OciErrorCode::ManifestUnknown | OciErrorCode::BlobUnknown | OciErrorCode::NameUnknown)
        )
    })
}

/// Turn a failed read response into `NotFoundError` or `TransportError`.
async fn read_error(
    response: reqwest::Response,
    repository: &str,
    reference: &str,
) -> RegistryError {
    let status = response.status();
    let body = response.bytes().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND || names_unknown_object(&body) {
        return RegistryError::NotFoundError {
            repository: repository.to_string(),
            reference: reference.to_string(),
        };
    }
    status_error(status.as_u16(), &body)
}

fn transport_error(err: reqwest::Error) -> RegistryError {
    RegistryError::TransportError {
        status: err.status().map(|s| s.as_u16()),
        code: None,
        message: err.to_string(),
    }
}

fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Read a response body of at most `limit` bytes.
async fn read_limited(response: reqwest::Response, limit: u64) -> Result<Vec<u8>> {
    let too_large = || RegistryError::transport(format!("response body exceeds {} bytes", limit));
    if response.content_length().is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.try_next().await.map_err(transport_error)? {
        if body.len() as u64 + chunk.len() as u64 > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

static CHALLENGE_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z]+)\s*=\s*"([^"]*)""#).expect("challenge parameter pattern must compile")
});

/// `WWW-Authenticate: Bearer realm="...",service="..."` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

impl BearerChallenge {
    /// Parse a Bearer challenge; other schemes (such as Basic) yield `None`.
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        for param in CHALLENGE_PARAM.captures_iter(params) {
            let value = param[2].to_string();
            match param[1].to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                _ => {}
            }
        }
        Some(Self {
            realm: realm.filter(|r| !r.is_empty())?,
            service,
        })
    }
}

/// Token endpoint response. Registries send `token`, `access_token` or both.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    bearer: Option<String>,
    fetched_at: Instant,
}

/// Transport for one [`RegistryEndpoint`].
///
/// Bearer tokens are cached per scope (repository and operation) for the
/// endpoint's token TTL.
pub struct OciTransport {
    endpoint: Arc<RegistryEndpoint>,
    http: reqwest::Client,
    /// scope → token
    tokens: DashMap<String, CachedToken>,
}

impl OciTransport {
    pub fn new(endpoint: Arc<RegistryEndpoint>) -> Result<Self> {
        Self::with_builder(endpoint, reqwest::Client::builder())
    }

    /// Build the transport from a caller-configured `reqwest` builder. The
    /// endpoint's client identification is applied on top.
    pub fn with_builder(
        endpoint: Arc<RegistryEndpoint>,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self> {
        let builder = match endpoint.user_agent() {
            Some(user_agent) => builder.user_agent(user_agent),
            None => builder,
        };
        let http = builder.build().map_err(|e| RegistryError::ConstructionError {
            registry: endpoint.host().to_string(),
            message: format!("Failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            endpoint,
            http,
            tokens: DashMap::new(),
        })
    }

    /// Host serving the `/v2/` API.
    fn api_host(&self) -> &str {
        match self.endpoint.host() {
            "docker.io" | "index.docker.io" => "registry-1.docker.io",
            host => host,
        }
    }

    fn base_url(&self) -> String {
        format!("{}://{}", self.endpoint.scheme(), self.api_host())
    }

    fn url(&self, repository: &str, kind: &str, reference: &str) -> String {
        format!("{}/v2/{}/{}/{}", self.base_url(), repository, kind, reference)
    }

    fn auth_error(&self, message: impl Into<String>) -> RegistryError {
        RegistryError::AuthError {
            registry: self.endpoint.host().to_string(),
            message: message.into(),
        }
    }

    /// Bearer token for `repository`, negotiated through the registry's
    /// `/v2/` challenge. `None` when the registry does not issue tokens.
    async fn authenticate(&self, repository: &str, push: bool) -> Result<Option<String>> {
        let scope = format!(
            "repository:{}:{}",
            repository,
            if push { "pull,push" } else { "pull" }
        );
        if let Some(cached) = self.tokens.get(&scope) {
            if cached.fetched_at.elapsed() < self.endpoint.token_cache_ttl() {
                return Ok(cached.bearer.clone());
            }
        }

        let response = self
            .http
            .get(format!("{}/v2/", self.base_url()))
            .send()
            .await
            .map_err(transport_error)?;
        let challenge =
            header_str(&response, WWW_AUTHENTICATE.as_str()).and_then(BearerChallenge::parse);
        let bearer = match challenge {
            Some(challenge) => Some(self.fetch_token(&challenge, &scope).await?),
            None => None,
        };

        tracing::debug!(
            registry = %self.endpoint.host(),
            scope = %scope,
            bearer = bearer.is_some(),
            "Authenticated with registry"
        );
        self.tokens.insert(
            scope,
            CachedToken {
                bearer: bearer.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(bearer)
    }

    async fn fetch_token(&self, challenge: &BearerChallenge, scope: &str) -> Result<String> {
        let mut request = self.http.get(&challenge.realm).query(&[("scope", scope)]);
        if let Some(service) = &challenge.service {
            request = request.query(&[("service", service)]);
        }
        if let Some(basic) = self.endpoint.authorization_header() {
            request = request.header(AUTHORIZATION, basic);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.auth_error(format!("token request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(self.auth_error(format!(
                "token request failed: {}",
                status_error(status.as_u16(), &body)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.auth_error(format!("malformed token response: {}", e)))?;
        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| self.auth_error("token response carried no token"))
    }

    /// Start a request carrying the endpoint's credentials.
    async fn request(
        &self,
        method: Method,
        url: &str,
        repository: &str,
        push: bool,
    ) -> Result<reqwest::RequestBuilder> {
        let bearer = self.authenticate(repository, push).await?;
        let mut request = self.http.request(method, url);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        } else if let Some(basic) = self.endpoint.authorization_header() {
            request = request.header(AUTHORIZATION, basic);
        }
        Ok(request)
    }

    /// Absolute URL for an upload session `Location`, which may be relative.
    fn upload_url(&self, location: &str) -> Result<Url> {
        Url::parse(&format!("{}/", self.base_url()))
            .and_then(|base| base.join(location))
            .map_err(|e| {
                RegistryError::transport(format!("invalid upload location '{}': {}", location, e))
            })
    }

    /// Resolve by downloading the manifest when `HEAD` omits headers.
    async fn describe_by_body(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> Result<ArtifactDescriptor> {
        let content = self.get_manifest(repository, reference).await?;
        let media_type = detect_media_type(&content)?;
        Ok(ArtifactDescriptor::new(
            media_type,
            sha256_digest(&content),
            content.len() as u64,
        ))
    }
}

#[async_trait]
impl RegistryTransport for OciTransport {
    async fn head_manifest(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> Result<ArtifactDescriptor> {
        let url = self.url(repository, "manifests", reference.as_str());
        let response = self
            .request(Method::HEAD, &url, repository, false)
            .await?
            .header(ACCEPT, media_type::MANIFEST_MEDIA_TYPES.join(", "))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFoundError {
                repository: repository.to_string(),
                reference: reference.to_string(),
            });
        }
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &[]));
        }

        let content_type = header_str(&response, CONTENT_TYPE.as_str())
            .map(|m| media_type::strip_parameters(m).to_string());
        let digest = header_str(&response, DOCKER_CONTENT_DIGEST).map(str::to_string);
        let size = header_str(&response, CONTENT_LENGTH.as_str()).and_then(|s| s.parse::<u64>().ok());

        match (content_type, digest, size) {
            (Some(content_type), Some(digest), Some(size)) if media_type::is_manifest(&content_type) => {
                if reference.is_digest() && digest != reference.as_str() {
                    return Err(RegistryError::DigestMismatch {
                        expected: reference.to_string(),
                        actual: digest,
                    });
                }
                Ok(ArtifactDescriptor::new(content_type, digest, size))
            }
            _ => {
                tracing::debug!(
                    repository,
                    reference = %reference,
                    "Manifest HEAD incomplete, describing from body"
                );
                self.describe_by_body(repository, reference).await
            }
        }
    }

    async fn get_manifest(&self, repository: &str, reference: &Reference) -> Result<Vec<u8>> {
        let url = self.url(repository, "manifests", reference.as_str());
        let response = self
            .request(Method::GET, &url, repository, false)
            .await?
            .header(ACCEPT, media_type::MANIFEST_MEDIA_TYPES.join(", "))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(read_error(response, repository, reference.as_str()).await);
        }
        read_limited(response, MAX_MANIFEST_BYTES).await
    }

    async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool> {
        let url = self.url(repository, "blobs", digest);
        let response = self
            .request(Method::HEAD, &url, repository, false)
            .await?
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error(status.as_u16(), &[])),
        }
    }

    async fn get_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
    ) -> Result<BlobStream> {
        let url = self.url(repository, "blobs", &descriptor.digest);
        let response = self
            .request(Method::GET, &url, repository, false)
            .await?
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(read_error(response, repository, &descriptor.digest).await);
        }
        Ok(response.bytes_stream().map_err(transport_error).boxed())
    }

    async fn put_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
        content: BlobStream,
    ) -> Result<()> {
        let start = format!("{}/v2/{}/blobs/uploads/", self.base_url(), repository);
        let response = self
            .request(Method::POST, &start, repository, true)
            .await?
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }
        let location = header_str(&response, LOCATION.as_str())
            .ok_or_else(|| RegistryError::transport("upload session started without a Location"))?;
        let mut url = self.upload_url(location)?;
        url.query_pairs_mut().append_pair("digest", &descriptor.digest);

        tracing::debug!(
            repository,
            digest = %descriptor.digest,
            size = descriptor.size,
            "Uploading blob"
        );
        let response = self
            .request(Method::PUT, url.as_str(), repository, true)
            .await?
            .header(CONTENT_LENGTH, descriptor.size)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(content))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &body))
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &Reference,
        media_type: &str,
        content: Vec<u8>,
    ) -> Result<()> {
        let url = self.url(repository, "manifests", reference.as_str());
        let response = self
            .request(Method::PUT, &url, repository, true)
            .await?
            .header(CONTENT_TYPE, media_type)
            .body(content)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await.map_err(transport_error)?;
        Err(status_error(status.as_u16(), &body))
    }
}

/// Snapshot of the calls a [`CountingTransport`] forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub manifest_heads: usize,
    pub manifest_fetches: usize,
    pub blob_heads: usize,
    pub blob_fetches: usize,
    pub blob_uploads: usize,
    pub manifest_uploads: usize,
}

impl RequestCounts {
    /// Content downloads (manifests and blobs).
    pub fn fetches(&self) -> usize {
        self.manifest_fetches + self.blob_fetches
    }

    /// Content uploads (manifests and blobs).
    pub fn uploads(&self) -> usize {
        self.blob_uploads + self.manifest_uploads
    }
}

#[derive(Debug, Default)]
struct Counters {
    manifest_heads: AtomicUsize,
    manifest_fetches: AtomicUsize,
    blob_heads: AtomicUsize,
    blob_fetches: AtomicUsize,
    blob_uploads: AtomicUsize,
    manifest_uploads: AtomicUsize,
}

/// Transport wrapper that counts forwarded calls.
pub struct CountingTransport<T> {
    inner: T,
    counters: Counters,
}

impl<T: RegistryTransport> CountingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            counters: Counters::default(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn counts(&self) -> RequestCounts {
        let c = &self.counters;
        RequestCounts {
            manifest_heads: c.manifest_heads.load(Ordering::SeqCst),
            manifest_fetches: c.manifest_fetches.load(Ordering::SeqCst),
            blob_heads: c.blob_heads.load(Ordering::SeqCst),
            blob_fetches: c.blob_fetches.load(Ordering::SeqCst),
            blob_uploads: c.blob_uploads.load(Ordering::SeqCst),
            manifest_uploads: c.manifest_uploads.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl<T: RegistryTransport> RegistryTransport for CountingTransport<T> {
    async fn head_manifest(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> Result<ArtifactDescriptor> {
        self.counters.manifest_heads.fetch_add(1, Ordering::SeqCst);
        self.inner.head_manifest(repository, reference).await
    }

    async fn get_manifest(&self, repository: &str, reference: &Reference) -> Result<Vec<u8>> {
        self.counters.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.get_manifest(repository, reference).await
    }

    async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool> {
        self.counters.blob_heads.fetch_add(1, Ordering::SeqCst);
        self.inner.blob_exists(repository, digest).await
    }

    async fn get_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
    ) -> Result<BlobStream> {
        self.counters.blob_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.get_blob(repository, descriptor).await
    }

    async fn put_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
        content: BlobStream,
    ) -> Result<()> {
        self.counters.blob_uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.put_blob(repository, descriptor, content).await
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &Reference,
        media_type: &str,
        content: Vec<u8>,
    ) -> Result<()> {
        self.counters.manifest_uploads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .put_manifest(repository, reference, media_type, content)
            .await
    }
}
