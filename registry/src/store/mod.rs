//! Content-addressable stores that graph copies read from and write to.
//!
//! - [`OciLayoutStore`]: OCI image layout directory on disk
//! - [`MemoryStore`]: in-process map, for planning and tests
//! - [`crate::RemoteRepository`]: the registry side of a copy
//!
//! Blob content moves between stores as a [`BlobStream`]; only manifests are
//! read into memory.

mod layout;
mod memory;

pub use layout::OciLayoutStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use soci_registry_core::error::Result;
use soci_registry_core::{ArtifactDescriptor, ContentVerifier};

/// Annotation carrying the tag of a root manifest in an OCI layout index.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Upper bound on the buffer reserved up front when reading a whole object.
const MAX_PREALLOCATION: u64 = 1024 * 1024;

/// Chunks of one object's content.
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

/// Stream yielding `content` as a single chunk.
pub fn single_chunk(content: impl Into<Bytes>) -> BlobStream {
    stream::once(futures::future::ready(Ok(content.into()))).boxed()
}

/// Read a whole object, checking it against `descriptor`.
///
/// The declared size only bounds the initial allocation; a stream that
/// overruns it fails before it is buffered further.
pub async fn read_to_vec(
    descriptor: &ArtifactDescriptor,
    mut content: BlobStream,
) -> Result<Vec<u8>> {
    let mut verifier = ContentVerifier::new(descriptor);
    let mut buffer = Vec::with_capacity(descriptor.size.min(MAX_PREALLOCATION) as usize);
    while let Some(chunk) = content.try_next().await? {
        verifier.update(&chunk)?;
        buffer.extend_from_slice(&chunk);
    }
    verifier.finish()?;
    Ok(buffer)
}

type VerifyState = Option<(BlobStream, ContentVerifier)>;

async fn next_verified(state: VerifyState) -> Result<Option<(Bytes, VerifyState)>> {
    let Some((mut content, mut verifier)) = state else {
        return Ok(None);
    };
    match content.try_next().await? {
        Some(chunk) => {
            verifier.update(&chunk)?;
            Ok(Some((chunk, Some((content, verifier)))))
        }
        None => {
            verifier.finish()?;
            Ok(None)
        }
    }
}

/// Pass `content` through, failing the stream on a size or digest mismatch.
pub fn verify_stream(descriptor: &ArtifactDescriptor, content: BlobStream) -> BlobStream {
    let state = Some((content, ContentVerifier::new(descriptor)));
    stream::try_unfold(state, next_verified).boxed()
}

/// A store of immutable objects keyed by digest, plus named roots.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether the object described by `descriptor` is present.
    async fn exists(&self, descriptor: &ArtifactDescriptor) -> Result<bool>;

    /// Open a stream over an object's content.
    async fn fetch_stream(&self, descriptor: &ArtifactDescriptor) -> Result<BlobStream>;

    /// Write an object from a stream. Content that does not match the
    /// descriptor's digest and size is rejected with `DigestMismatch` and
    /// nothing is stored.
    async fn push_stream(&self, descriptor: &ArtifactDescriptor, content: BlobStream)
        -> Result<()>;

    /// Record `descriptor` as a root under `reference` (a tag or its own digest).
    async fn tag(&self, descriptor: &ArtifactDescriptor, reference: &str) -> Result<()>;

    /// Look up a root by tag or digest.
    async fn resolve(&self, reference: &str) -> Result<ArtifactDescriptor>;

    /// Read and verify the full content of an object. Meant for manifests
    /// and configs.
    async fn fetch(&self, descriptor: &ArtifactDescriptor) -> Result<Vec<u8>> {
        let content = self.fetch_stream(descriptor).await?;
        read_to_vec(descriptor, content).await
    }

    async fn push(&self, descriptor: &ArtifactDescriptor, content: Vec<u8>) -> Result<()> {
        self.push_stream(descriptor, single_chunk(content)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soci_registry_core::RegistryError;

    fn chunks(parts: &[&'static [u8]]) -> BlobStream {
        let parts: Vec<Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect();
        stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn test_read_to_vec_joins_chunks() {
        let desc = ArtifactDescriptor::from_content("application/octet-stream", b"hello world");
        let content = read_to_vec(&desc, chunks(&[b"hello", b" ", b"world"]))
            .await
            .unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn test_read_to_vec_ignores_absurd_declared_size() {
        let mut desc = ArtifactDescriptor::from_content("application/octet-stream", b"tiny");
        desc.size = u64::MAX;
        let err = read_to_vec(&desc, chunks(&[b"tiny"])).await.unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_verify_stream_fails_on_tampered_content() {
        let desc = ArtifactDescriptor::from_content("application/octet-stream", b"expected");
        let items: Vec<Result<Bytes>> = verify_stream(&desc, chunks(&[b"tampered"]))
            .collect()
            .await;
        assert!(matches!(
            items.last(),
            Some(Err(RegistryError::DigestMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_verify_stream_passes_valid_content() {
        let desc = ArtifactDescriptor::from_content("application/octet-stream", b"abcdef");
        let collected: Vec<Bytes> = verify_stream(&desc, chunks(&[b"abc", b"def"]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(collected.concat(), b"abcdef");
    }
}
