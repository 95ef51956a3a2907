//! Test doubles: an in-process registry and a scripted HTTP server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::{media_type, ArtifactDescriptor, Reference};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::manifest;
use crate::repository::ECR_UNSUPPORTED_MANIFEST_MESSAGE;
use crate::store::{read_to_vec, single_chunk, BlobStream};
use crate::transport::{status_error, RegistryTransport};

type Key = (String, String);

/// Registry that keeps everything in memory and enforces referential integrity:
/// a manifest is refused while any object it references is missing.
#[derive(Default)]
pub(crate) struct FakeRegistry {
    manifests: Mutex<HashMap<Key, (String, Vec<u8>)>>,
    tags: Mutex<HashMap<Key, String>>,
    blobs: Mutex<HashMap<Key, Vec<u8>>>,
    reject_artifacts: AtomicBool,
    reject_manifests: AtomicBool,
    stall_blobs: AtomicBool,
}

impl FakeRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer artifact manifest uploads the way ECR does.
    pub(crate) fn reject_artifact_manifests(self) -> Self {
        self.reject_artifacts.store(true, Ordering::SeqCst);
        self
    }

    /// Answer every manifest upload with 405 `UNSUPPORTED`.
    pub(crate) fn reject_all_manifests(self) -> Self {
        self.reject_manifests.store(true, Ordering::SeqCst);
        self
    }

    /// Never complete blob downloads.
    pub(crate) fn stall_blob_downloads(self) -> Self {
        self.stall_blobs.store(true, Ordering::SeqCst);
        self
    }

    fn key(repository: &str, name: &str) -> Key {
        (repository.to_string(), name.to_string())
    }

    fn not_found(repository: &str, reference: &str) -> RegistryError {
        RegistryError::NotFoundError {
            repository: repository.to_string(),
            reference: reference.to_string(),
        }
    }

    fn digest_for(&self, repository: &str, reference: &Reference) -> Option<String> {
        match reference {
            Reference::Digest(digest) => Some(digest.clone()),
            Reference::Tag(tag) => self
                .tags
                .lock()
                .unwrap()
                .get(&Self::key(repository, tag))
                .cloned(),
        }
    }

    fn has_object(&self, repository: &str, descriptor: &ArtifactDescriptor) -> bool {
        let key = Self::key(repository, &descriptor.digest);
        if descriptor.is_manifest() {
            self.manifests.lock().unwrap().contains_key(&key)
        } else {
            self.blobs.lock().unwrap().contains_key(&key)
        }
    }

    /// Store content directly, bypassing the transport.
    pub(crate) fn seed_blob(&self, repository: &str, content: &[u8]) -> String {
        let descriptor = ArtifactDescriptor::from_content("application/octet-stream", content);
        self.blobs
            .lock()
            .unwrap()
            .insert(Self::key(repository, &descriptor.digest), content.to_vec());
        descriptor.digest
    }

    pub(crate) fn seed_manifest(
        &self,
        repository: &str,
        tag: Option<&str>,
        media_type: &str,
        content: &[u8],
    ) -> ArtifactDescriptor {
        let descriptor = ArtifactDescriptor::from_content(media_type, content);
        self.manifests.lock().unwrap().insert(
            Self::key(repository, &descriptor.digest),
            (media_type.to_string(), content.to_vec()),
        );
        if let Some(tag) = tag {
            self.tags
                .lock()
                .unwrap()
                .insert(Self::key(repository, tag), descriptor.digest.clone());
        }
        descriptor
    }

    pub(crate) fn has_manifest(&self, repository: &str, digest: &str) -> bool {
        self.manifests
            .lock()
            .unwrap()
            .contains_key(&Self::key(repository, digest))
    }

    pub(crate) fn tagged(&self, repository: &str, tag: &str) -> Option<String> {
        self.tags
            .lock()
            .unwrap()
            .get(&Self::key(repository, tag))
            .cloned()
    }
}

#[async_trait]
impl RegistryTransport for FakeRegistry {
    async fn head_manifest(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> Result<ArtifactDescriptor> {
        let digest = self
            .digest_for(repository, reference)
            .ok_or_else(|| Self::not_found(repository, reference.as_str()))?;
        let manifests = self.manifests.lock().unwrap();
        let (media_type, content) = manifests
            .get(&Self::key(repository, &digest))
            .ok_or_else(|| Self::not_found(repository, reference.as_str()))?;
        Ok(ArtifactDescriptor::new(
            media_type.clone(),
            digest,
            content.len() as u64,
        ))
    }

    async fn get_manifest(&self, repository: &str, reference: &Reference) -> Result<Vec<u8>> {
        let digest = self
            .digest_for(repository, reference)
            .ok_or_else(|| Self::not_found(repository, reference.as_str()))?;
        self.manifests
            .lock()
            .unwrap()
            .get(&Self::key(repository, &digest))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| Self::not_found(repository, reference.as_str()))
    }

    async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .contains_key(&Self::key(repository, digest)))
    }

    async fn get_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
    ) -> Result<BlobStream> {
        if self.stall_blobs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.blobs
            .lock()
            .unwrap()
            .get(&Self::key(repository, &descriptor.digest))
            .cloned()
            .map(single_chunk)
            .ok_or_else(|| Self::not_found(repository, &descriptor.digest))
    }

    async fn put_blob(
        &self,
        repository: &str,
        descriptor: &ArtifactDescriptor,
        content: BlobStream,
    ) -> Result<()> {
        let content = read_to_vec(descriptor, content).await?;
        self.blobs
            .lock()
            .unwrap()
            .insert(Self::key(repository, &descriptor.digest), content);
        Ok(())
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &Reference,
        media_type: &str,
        content: Vec<u8>,
    ) -> Result<()> {
        let rejected = self.reject_manifests.load(Ordering::SeqCst)
            || (self.reject_artifacts.load(Ordering::SeqCst)
                && media_type == media_type::OCI_ARTIFACT_MANIFEST);
        if rejected {
            let body = serde_json::json!({
                "errors": [{"code": "UNSUPPORTED", "message": ECR_UNSUPPORTED_MANIFEST_MESSAGE}]
            });
            return Err(status_error(405, body.to_string().as_bytes()));
        }

        let descriptor = ArtifactDescriptor::from_content(media_type, &content);
        if let Reference::Digest(digest) = reference {
            if *digest != descriptor.digest {
                return Err(status_error(
                    400,
                    br#"{"errors":[{"code":"DIGEST_INVALID","message":"digest mismatch"}]}"#,
                ));
            }
        }
        for child in manifest::successors(&descriptor, &content)? {
            if !self.has_object(repository, &child) {
                return Err(status_error(
                    400,
                    br#"{"errors":[{"code":"MANIFEST_BLOB_UNKNOWN","message":"blob unknown to registry"}]}"#,
                ));
            }
        }

        self.manifests.lock().unwrap().insert(
            Self::key(repository, &descriptor.digest),
            (media_type.to_string(), content),
        );
        if let Reference::Tag(tag) = reference {
            self.tags
                .lock()
                .unwrap()
                .insert(Self::key(repository, tag), descriptor.digest);
        }
        Ok(())
    }
}

/// One request received by a [`StubServer`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    /// Request target: path plus query
    pub path: String,
    /// Lowercased header names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Path without the query string.
    pub(crate) fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }
}

/// Canned HTTP response.
#[derive(Debug, Clone)]
pub(crate) struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl StubResponse {
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub(crate) fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize; a response to `HEAD` keeps its headers but drops the body.
    fn encode(&self, head: bool) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} Stub\r\n", self.status);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        let has_length = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-length"));
        if !has_length {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        if !head {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> StubResponse + Send + Sync>;

/// HTTP/1.1 server on a loopback port answering from a handler and
/// recording every request.
pub(crate) struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub(crate) async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = handler.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, handler, recorded).await;
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    socket: TcpStream,
    handler: Handler,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(socket);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let mut parts = line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut headers = HashMap::new();
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).await? == 0 {
                return Ok(());
            }
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let chunked = headers
            .get("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        let body = if chunked {
            read_chunked(&mut reader).await?
        } else {
            let length = headers
                .get("content-length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            let mut body = vec![0; length];
            reader.read_exact(&mut body).await?;
            body
        };

        let request = RecordedRequest {
            method,
            path,
            headers,
            body,
        };
        let response = handler(&request);
        let head = request.method == "HEAD";
        recorded.lock().unwrap().push(request);

        let socket = reader.get_mut();
        socket.write_all(&response.encode(head)).await?;
        socket.flush().await?;
    }
}

async fn read_chunked(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size = String::new();
        reader.read_line(&mut size).await?;
        let size = size.trim().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size, 16).unwrap_or(0);
        if size == 0 {
            // trailer section ends with an empty line
            loop {
                let mut trailer = String::new();
                if reader.read_line(&mut trailer).await? == 0 || trailer.trim().is_empty() {
                    return Ok(body);
                }
            }
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
}
