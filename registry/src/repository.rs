//! Remote repository as a content store.

use std::sync::Arc;

use async_trait::async_trait;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::{ArtifactDescriptor, Reference};

use crate::manifest;
use crate::store::{read_to_vec, single_chunk, verify_stream, BlobStream, ContentStore};
use crate::transport::RegistryTransport;

/// Rejection text ECR returns for manifest media types it cannot store.
pub const ECR_UNSUPPORTED_MANIFEST_MESSAGE: &str =
    "Invalid parameter at 'ImageManifest' failed to satisfy constraint: 'Invalid JSON syntax'";

/// Reclassify a manifest upload failure caused by missing OCI artifact support.
///
/// Only artifact manifests (see [`manifest::is_artifact`]) are reclassified;
/// image manifests keep their transport error. Checked in order: HTTP 405
/// with error code `UNSUPPORTED`, HTTP 415, and finally the ECR rejection
/// text.
pub fn classify_manifest_rejection(
    repository: &str,
    descriptor: &ArtifactDescriptor,
    content: &[u8],
    err: RegistryError,
) -> RegistryError {
    if manifest::is_artifact(descriptor, content) {
        reject_unsupported_artifact(repository, err)
    } else {
        err
    }
}

fn reject_unsupported_artifact(repository: &str, err: RegistryError) -> RegistryError {
    let unsupported = match &err {
        RegistryError::TransportError {
            status: Some(405),
            code: Some(code),
            ..
        } if code.eq_ignore_ascii_case("UNSUPPORTED") => true,
        RegistryError::TransportError {
            status: Some(415), ..
        } => true,
        RegistryError::TransportError { message, .. } => {
            message.contains(ECR_UNSUPPORTED_MANIFEST_MESSAGE)
        }
        _ => false,
    };

    if unsupported {
        RegistryError::UnsupportedArtifactError {
            repository: repository.to_string(),
            message: err.to_string(),
        }
    } else {
        err
    }
}

/// One repository of a remote registry, addressed through a transport.
///
/// Blobs stream straight through the transport; manifests are read whole.
#[derive(Clone)]
pub struct RemoteRepository {
    transport: Arc<dyn RegistryTransport>,
    repository: String,
}

impl RemoteRepository {
    pub fn new(transport: Arc<dyn RegistryTransport>, repository: impl Into<String>) -> Self {
        Self {
            transport,
            repository: repository.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.repository
    }

    async fn put_manifest(
        &self,
        descriptor: &ArtifactDescriptor,
        reference: Reference,
        content: Vec<u8>,
    ) -> Result<()> {
        let artifact = manifest::is_artifact(descriptor, &content);
        self.transport
            .put_manifest(&self.repository, &reference, &descriptor.media_type, content)
            .await
            .map_err(|e| match artifact {
                true => reject_unsupported_artifact(&self.repository, e),
                false => e,
            })
    }
}

#[async_trait]
impl ContentStore for RemoteRepository {
    async fn exists(&self, descriptor: &ArtifactDescriptor) -> Result<bool> {
        if !descriptor.is_manifest() {
            return self
                .transport
                .blob_exists(&self.repository, &descriptor.digest)
                .await;
        }
        let reference = Reference::Digest(descriptor.digest.clone());
        match self.transport.head_manifest(&self.repository, &reference).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch_stream(&self, descriptor: &ArtifactDescriptor) -> Result<BlobStream> {
        if descriptor.is_manifest() {
            let reference = Reference::Digest(descriptor.digest.clone());
            let content = self.transport.get_manifest(&self.repository, &reference).await?;
            Ok(single_chunk(content))
        } else {
            self.transport.get_blob(&self.repository, descriptor).await
        }
    }

    async fn push_stream(
        &self,
        descriptor: &ArtifactDescriptor,
        content: BlobStream,
    ) -> Result<()> {
        if descriptor.is_manifest() {
            let content = read_to_vec(descriptor, content).await?;
            let reference = Reference::Digest(descriptor.digest.clone());
            self.put_manifest(descriptor, reference, content).await
        } else {
            self.transport
                .put_blob(&self.repository, descriptor, verify_stream(descriptor, content))
                .await
        }
    }

    async fn tag(&self, descriptor: &ArtifactDescriptor, reference: &str) -> Result<()> {
        let reference = Reference::parse(reference)?;
        if reference.is_digest() {
            return Ok(());
        }
        let content = self.fetch(descriptor).await?;
        self.put_manifest(descriptor, reference, content).await
    }

    async fn resolve(&self, reference: &str) -> Result<ArtifactDescriptor> {
        let reference = Reference::parse(reference)?;
        self.transport.head_manifest(&self.repository, &reference).await
    }
}
