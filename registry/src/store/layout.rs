//! OCI image layout store.
//!
//! Objects live under `blobs/<algorithm>/<hex>`; named roots are recorded in
//! `index.json` with the `org.opencontainers.image.ref.name` annotation.
//! Blobs and the index are written to a temporary file and renamed into
//! place, so a present file is always complete.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use soci_registry_core::descriptor::validate_digest;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::{media_type, ArtifactDescriptor, ContentVerifier, Reference};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;

use super::{BlobStream, ContentStore, REF_NAME_ANNOTATION};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";

/// `index.json` of an OCI image layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<ArtifactDescriptor>,
}

impl Default for LayoutIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_INDEX.to_string()),
            manifests: Vec::new(),
        }
    }
}

fn ref_name(descriptor: &ArtifactDescriptor) -> Option<&str> {
    descriptor
        .annotations
        .as_ref()
        .and_then(|a| a.get(REF_NAME_ANNOTATION))
        .map(String::as_str)
}

/// Copy of an index entry without its ref-name annotation.
fn without_ref_name(entry: &ArtifactDescriptor) -> ArtifactDescriptor {
    let mut descriptor = entry.clone();
    if let Some(annotations) = descriptor.annotations.as_mut() {
        annotations.remove(REF_NAME_ANNOTATION);
        if annotations.is_empty() {
            descriptor.annotations = None;
        }
    }
    descriptor
}

/// Content store over an OCI image layout directory.
pub struct OciLayoutStore {
    /// Layout root directory
    root: PathBuf,
    /// In-memory copy of `index.json`
    index: RwLock<LayoutIndex>,
    /// Suffix source for temporary file names
    next_temp: AtomicU64,
}

impl OciLayoutStore {
    /// Open an OCI layout at `root`, creating it if it doesn't exist.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join("blobs")).map_err(|e| {
            RegistryError::StoreError(format!(
                "Failed to create layout directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let layout_path = root.join(OCI_LAYOUT_FILE);
        if !layout_path.exists() {
            std::fs::write(&layout_path, OCI_LAYOUT_CONTENT).map_err(|e| {
                RegistryError::StoreError(format!(
                    "Failed to write {}: {}",
                    layout_path.display(),
                    e
                ))
            })?;
        }

        let index = Self::load_index(root)?;
        tracing::debug!(
            root = %root.display(),
            roots = index.manifests.len(),
            "Opened OCI layout"
        );

        Ok(Self {
            root: root.to_path_buf(),
            index: RwLock::new(index),
            next_temp: AtomicU64::new(0),
        })
    }

    /// Layout root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All root descriptors recorded in `index.json`, annotations included.
    pub async fn roots(&self) -> Vec<ArtifactDescriptor> {
        self.index.read().await.manifests.clone()
    }

    fn load_index(root: &Path) -> Result<LayoutIndex> {
        let index_path = root.join(INDEX_FILE);
        if !index_path.exists() {
            return Ok(LayoutIndex::default());
        }

        let data = std::fs::read(&index_path).map_err(|e| {
            RegistryError::StoreError(format!(
                "Failed to read layout index {}: {}",
                index_path.display(),
                e
            ))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            RegistryError::StoreError(format!("Failed to parse layout index: {}", e))
        })
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        validate_digest(digest)?;
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidReference(digest.to_string()))?;
        Ok(self.root.join("blobs").join(algorithm).join(hex))
    }

    /// Temporary sibling of `path`, with its directory created.
    async fn temp_path(&self, path: &Path) -> Result<PathBuf> {
        let parent = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(parent.join(format!(
            ".{}.{}.tmp",
            file_name,
            self.next_temp.fetch_add(1, Ordering::Relaxed)
        )))
    }

    /// Move a finished temporary file into place.
    async fn commit(temp: &Path, path: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::rename(temp, path).await {
            let _ = tokio::fs::remove_file(temp).await;
            return Err(RegistryError::StoreError(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }

    /// Write `data` to `path` through a temporary sibling file.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp = self.temp_path(path).await?;
        if let Err(e) = tokio::fs::write(&temp, data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(RegistryError::StoreError(format!(
                "Failed to write {}: {}",
                temp.display(),
                e
            )));
        }
        Self::commit(&temp, path).await
    }

    /// Copy `content` into `temp`, verifying it against `descriptor`.
    async fn write_verified(
        temp: &Path,
        descriptor: &ArtifactDescriptor,
        mut content: BlobStream,
    ) -> Result<()> {
        let mut file = tokio::fs::File::create(temp).await.map_err(|e| {
            RegistryError::StoreError(format!("Failed to create {}: {}", temp.display(), e))
        })?;
        let mut verifier = ContentVerifier::new(descriptor);
        while let Some(chunk) = content.try_next().await? {
            verifier.update(&chunk)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        verifier.finish()
    }

    async fn save_index(&self, index: &LayoutIndex) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        self.write_atomic(&self.root.join(INDEX_FILE), &data).await
    }
}

#[async_trait]
impl ContentStore for OciLayoutStore {
    async fn exists(&self, descriptor: &ArtifactDescriptor) -> Result<bool> {
        let path = self.blob_path(&descriptor.digest)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn fetch_stream(&self, descriptor: &ArtifactDescriptor) -> Result<BlobStream> {
        let path = self.blob_path(&descriptor.digest)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(ReaderStream::new(file).map_err(RegistryError::from).boxed()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RegistryError::NotFoundError {
                    repository: self.root.display().to_string(),
                    reference: descriptor.digest.clone(),
                })
            }
            Err(e) => Err(RegistryError::StoreError(format!(
                "Failed to read blob {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn push_stream(
        &self,
        descriptor: &ArtifactDescriptor,
        content: BlobStream,
    ) -> Result<()> {
        let path = self.blob_path(&descriptor.digest)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        let temp = self.temp_path(&path).await?;
        if let Err(e) = Self::write_verified(&temp, descriptor, content).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        Self::commit(&temp, &path).await
    }

    async fn tag(&self, descriptor: &ArtifactDescriptor, reference: &str) -> Result<()> {
        if !self.exists(descriptor).await? {
            return Err(RegistryError::StoreError(format!(
                "Cannot tag {} as {}: object not in layout",
                descriptor.digest, reference
            )));
        }

        let mut index = self.index.write().await;
        let entry = without_ref_name(descriptor);
        match Reference::parse(reference)? {
            Reference::Digest(_) => {
                if index
                    .manifests
                    .iter()
                    .any(|m| m.digest == entry.digest && ref_name(m).is_none())
                {
                    return Ok(());
                }
                index.manifests.push(entry);
            }
            Reference::Tag(tag) => {
                index.manifests.retain(|m| ref_name(m) != Some(tag.as_str()));
                let mut tagged = entry;
                tagged
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(REF_NAME_ANNOTATION.to_string(), tag);
                index.manifests.push(tagged);
            }
        }
        self.save_index(&index).await
    }

    async fn resolve(&self, reference: &str) -> Result<ArtifactDescriptor> {
        let index = self.index.read().await;
        index
            .manifests
            .iter()
            .find(|m| ref_name(m) == Some(reference))
            .or_else(|| index.manifests.iter().find(|m| m.digest == reference))
            .map(without_ref_name)
            .ok_or_else(|| RegistryError::NotFoundError {
                repository: self.root.display().to_string(),
                reference: reference.to_string(),
            })
    }
}
