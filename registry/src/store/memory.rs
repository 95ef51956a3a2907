//! In-memory content store.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::ArtifactDescriptor;

use super::{read_to_vec, single_chunk, BlobStream, ContentStore};

/// Content store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// digest → (descriptor, content)
    objects: DashMap<String, (ArtifactDescriptor, Bytes)>,
    /// tag or digest → root descriptor
    roots: DashMap<String, ArtifactDescriptor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn exists(&self, descriptor: &ArtifactDescriptor) -> Result<bool> {
        Ok(self.objects.contains_key(&descriptor.digest))
    }

    async fn fetch_stream(&self, descriptor: &ArtifactDescriptor) -> Result<BlobStream> {
        self.objects
            .get(&descriptor.digest)
            .map(|entry| single_chunk(entry.1.clone()))
            .ok_or_else(|| RegistryError::NotFoundError {
                repository: "memory".to_string(),
                reference: descriptor.digest.clone(),
            })
    }

    async fn push_stream(
        &self,
        descriptor: &ArtifactDescriptor,
        content: BlobStream,
    ) -> Result<()> {
        let content = read_to_vec(descriptor, content).await?;
        self.objects
            .entry(descriptor.digest.clone())
            .or_insert_with(|| (descriptor.clone(), Bytes::from(content)));
        Ok(())
    }

    async fn tag(&self, descriptor: &ArtifactDescriptor, reference: &str) -> Result<()> {
        if !self.objects.contains_key(&descriptor.digest) {
            return Err(RegistryError::StoreError(format!(
                "Cannot tag {} as {}: object not in store",
                descriptor.digest, reference
            )));
        }
        self.roots.insert(reference.to_string(), descriptor.clone());
        Ok(())
    }

    async fn resolve(&self, reference: &str) -> Result<ArtifactDescriptor> {
        if let Some(root) = self.roots.get(reference) {
            return Ok(root.clone());
        }
        self.objects
            .get(reference)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| RegistryError::NotFoundError {
                repository: "memory".to_string(),
                reference: reference.to_string(),
            })
    }
}
