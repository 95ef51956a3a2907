//! Manifest parsing: successors of a graph node and planning summaries.

use serde::{Deserialize, Serialize};
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::media_type;
use soci_registry_core::ArtifactDescriptor;

/// Union of the manifest shapes the client understands.
///
/// Image manifests carry `config` + `layers`, indexes carry `manifests`,
/// artifact manifests carry `blobs`; any of them may carry a `subject`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    artifact_type: Option<String>,
    #[serde(default)]
    config: Option<ArtifactDescriptor>,
    #[serde(default)]
    layers: Vec<ArtifactDescriptor>,
    #[serde(default)]
    manifests: Vec<ArtifactDescriptor>,
    #[serde(default)]
    blobs: Vec<ArtifactDescriptor>,
    #[serde(default)]
    subject: Option<ArtifactDescriptor>,
}

fn parse_raw(content: &[u8]) -> Result<RawManifest> {
    serde_json::from_slice(content)
        .map_err(|e| RegistryError::SerializationError(format!("Invalid manifest: {}", e)))
}

/// Objects directly referenced by the node `descriptor` with `content`.
///
/// Non-manifest nodes (configs, layers) have no successors.
pub fn successors(
    descriptor: &ArtifactDescriptor,
    content: &[u8],
) -> Result<Vec<ArtifactDescriptor>> {
    if !descriptor.is_manifest() {
        return Ok(Vec::new());
    }

    let raw = parse_raw(content)?;
    let mut nodes = Vec::new();
    if let Some(subject) = raw.subject {
        nodes.push(subject);
    }

    match media_type::strip_parameters(&descriptor.media_type) {
        media_type::OCI_INDEX | media_type::DOCKER_MANIFEST_LIST => nodes.extend(raw.manifests),
        media_type::OCI_ARTIFACT_MANIFEST => nodes.extend(raw.blobs),
        _ => {
            nodes.extend(raw.config);
            nodes.extend(raw.layers);
        }
    }
    Ok(nodes)
}

/// Infer a manifest's media type from its body.
///
/// Uses the embedded `mediaType` when present, otherwise the shape of the
/// document (a `manifests` array means an index).
pub fn detect_media_type(content: &[u8]) -> Result<String> {
    let raw = parse_raw(content)?;
    if let Some(media_type) = raw.media_type.filter(|m| !m.is_empty()) {
        return Ok(media_type);
    }
    let detected = if !raw.manifests.is_empty() {
        media_type::OCI_INDEX
    } else if !raw.blobs.is_empty() || (raw.artifact_type.is_some() && raw.config.is_none()) {
        media_type::OCI_ARTIFACT_MANIFEST
    } else {
        media_type::OCI_MANIFEST
    };
    Ok(detected.to_string())
}

/// Whether a manifest is an OCI artifact rather than a plain image.
///
/// Artifact manifests always are; OCI manifests and indexes are when they
/// declare an `artifactType`, point at a `subject`, or carry a config that is
/// not an image config. Docker manifests never are.
pub fn is_artifact(descriptor: &ArtifactDescriptor, content: &[u8]) -> bool {
    let declared = media_type::strip_parameters(&descriptor.media_type);
    if media_type::is_docker(declared) || !descriptor.is_manifest() {
        return false;
    }
    if declared == media_type::OCI_ARTIFACT_MANIFEST {
        return true;
    }

    let Ok(raw) = parse_raw(content) else {
        return false;
    };
    raw.artifact_type.is_some()
        || raw.subject.is_some()
        || raw
            .config
            .is_some_and(|config| !media_type::is_config(&config.media_type))
}

/// What a manifest references, for callers planning a push or conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    /// The manifest itself
    pub descriptor: ArtifactDescriptor,
    /// Image config, for single-platform manifests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ArtifactDescriptor>,
    /// Layers or artifact blobs
    pub layers: Vec<ArtifactDescriptor>,
    /// Child manifests, for indexes and manifest lists
    pub manifests: Vec<ArtifactDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<ArtifactDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

impl ManifestSummary {
    pub fn is_index(&self) -> bool {
        media_type::is_index(&self.descriptor.media_type)
    }
}

/// Summarize the manifest `content` described by `descriptor`.
pub fn parse_manifest(descriptor: ArtifactDescriptor, content: &[u8]) -> Result<ManifestSummary> {
    if !descriptor.is_manifest() {
        return Err(RegistryError::SerializationError(format!(
            "{} is not a manifest media type",
            descriptor.media_type
        )));
    }
    let raw = parse_raw(content)?;
    let mut layers = raw.layers;
    layers.extend(raw.blobs);

    Ok(ManifestSummary {
        descriptor,
        config: raw.config,
        layers,
        manifests: raw.manifests,
        subject: raw.subject,
        artifact_type: raw.artifact_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn desc(media_type: &str, content: &[u8]) -> ArtifactDescriptor {
        ArtifactDescriptor::from_content(media_type, content)
    }

    fn image_manifest() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_type::DOCKER_MANIFEST,
            "config": {
                "mediaType": media_type::DOCKER_IMAGE_CONFIG,
                "digest": "sha256:1111111111111111111111111111111111111111111111111111111111111111",
                "size": 10
            },
            "layers": [{
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "digest": "sha256:2222222222222222222222222222222222222222222222222222222222222222",
                "size": 20
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_image_manifest_successors() {
        let content = image_manifest();
        let nodes = successors(&desc(media_type::DOCKER_MANIFEST, &content), &content).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].media_type, media_type::DOCKER_IMAGE_CONFIG);
        assert_eq!(nodes[1].size, 20);
    }

    #[test]
    fn test_index_successors_include_subject() {
        let content = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_INDEX,
            "manifests": [
                {"mediaType": media_type::OCI_MANIFEST, "digest": "sha256:aa", "size": 1},
                {"mediaType": media_type::OCI_MANIFEST, "digest": "sha256:bb", "size": 2}
            ],
            "subject": {"mediaType": media_type::OCI_MANIFEST, "digest": "sha256:cc", "size": 3}
        }))
        .unwrap();
        let nodes = successors(&desc(media_type::OCI_INDEX, &content), &content).unwrap();
        let digests: Vec<_> = nodes.iter().map(|d| d.digest.as_str()).collect();
        assert_eq!(digests, vec!["sha256:cc", "sha256:aa", "sha256:bb"]);
    }

    #[test]
    fn test_artifact_manifest_successors() {
        let content = serde_json::to_vec(&json!({
            "mediaType": media_type::OCI_ARTIFACT_MANIFEST,
            "artifactType": "application/vnd.amazon.soci.index.v1+json",
            "blobs": [{"mediaType": "application/octet-stream", "digest": "sha256:dd", "size": 4}]
        }))
        .unwrap();
        let nodes =
            successors(&desc(media_type::OCI_ARTIFACT_MANIFEST, &content), &content).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].digest, "sha256:dd");
    }

    #[test]
    fn test_blob_has_no_successors() {
        let nodes = successors(&desc("application/octet-stream", b"{"), b"{").unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_invalid_manifest_body() {
        let err = successors(&desc(media_type::OCI_MANIFEST, b"nope"), b"nope").unwrap_err();
        assert!(matches!(err, RegistryError::SerializationError(_)));
    }

    #[test]
    fn test_detect_media_type() {
        assert_eq!(
            detect_media_type(&image_manifest()).unwrap(),
            media_type::DOCKER_MANIFEST
        );
        let index = br#"{"schemaVersion":2,"manifests":[{"mediaType":"x","digest":"sha256:aa","size":1}]}"#;
        assert_eq!(detect_media_type(index).unwrap(), media_type::OCI_INDEX);
        let manifest = br#"{"schemaVersion":2,"config":{"mediaType":"x","digest":"sha256:aa","size":1},"layers":[]}"#;
        assert_eq!(detect_media_type(manifest).unwrap(), media_type::OCI_MANIFEST);
        let artifact = br#"{"artifactType":"application/example","blobs":[]}"#;
        assert_eq!(
            detect_media_type(artifact).unwrap(),
            media_type::OCI_ARTIFACT_MANIFEST
        );
    }

    #[test]
    fn test_parse_manifest_summary() {
        let content = image_manifest();
        let summary =
            parse_manifest(desc(media_type::DOCKER_MANIFEST, &content), &content).unwrap();
        assert!(!summary.is_index());
        assert_eq!(
            summary.config.unwrap().media_type,
            media_type::DOCKER_IMAGE_CONFIG
        );
        assert_eq!(summary.layers.len(), 1);
        assert!(summary.manifests.is_empty());
    }

    #[test]
    fn test_is_artifact() {
        let docker = image_manifest();
        assert!(!is_artifact(&desc(media_type::DOCKER_MANIFEST, &docker), &docker));

        let image = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_MANIFEST,
            "config": {"mediaType": media_type::OCI_IMAGE_CONFIG, "digest": "sha256:aa", "size": 1},
            "layers": []
        }))
        .unwrap();
        assert!(!is_artifact(&desc(media_type::OCI_MANIFEST, &image), &image));

        let soci = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_MANIFEST,
            "config": {"mediaType": "application/vnd.amazon.soci.index.v1+json", "digest": "sha256:aa", "size": 1},
            "layers": []
        }))
        .unwrap();
        assert!(is_artifact(&desc(media_type::OCI_MANIFEST, &soci), &soci));

        let referrer = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_INDEX,
            "manifests": [],
            "subject": {"mediaType": media_type::OCI_MANIFEST, "digest": "sha256:cc", "size": 3}
        }))
        .unwrap();
        assert!(is_artifact(&desc(media_type::OCI_INDEX, &referrer), &referrer));

        let artifact = br#"{"artifactType":"application/example","blobs":[]}"#;
        assert!(is_artifact(
            &desc(media_type::OCI_ARTIFACT_MANIFEST, artifact),
            artifact
        ));
        assert!(!is_artifact(&desc(media_type::OCI_IMAGE_CONFIG, b"{}"), b"{}"));
    }

    #[test]
    fn test_parse_manifest_rejects_blob() {
        let err = parse_manifest(desc(media_type::OCI_IMAGE_CONFIG, b"{}"), b"{}").unwrap_err();
        assert!(matches!(err, RegistryError::SerializationError(_)));
    }
}
