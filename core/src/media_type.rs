//! Media types recognized by the registry client.
//!
//! These strings must match the registry's `Content-Type` values byte for
//! byte; classification of manifests versus blobs depends on it.

/// Docker v2 manifest list (multi-platform).
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Docker v2 schema 2 image manifest.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index (multi-platform).
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// OCI artifact manifest. Not accepted by every registry.
pub const OCI_ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";

/// Docker image configuration.
pub const DOCKER_IMAGE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";

/// OCI image configuration.
pub const OCI_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Every manifest media type, in the order sent in `Accept` headers.
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_INDEX,
    OCI_MANIFEST,
    DOCKER_MANIFEST_LIST,
    DOCKER_MANIFEST,
    OCI_ARTIFACT_MANIFEST,
];

/// Returns true for media types describing a manifest (addressed under `/manifests/`).
pub fn is_manifest(media_type: &str) -> bool {
    MANIFEST_MEDIA_TYPES.contains(&strip_parameters(media_type))
}

/// Returns true for multi-platform manifests (OCI index or Docker manifest list).
pub fn is_index(media_type: &str) -> bool {
    matches!(strip_parameters(media_type), OCI_INDEX | DOCKER_MANIFEST_LIST)
}

/// Returns true for image config media types.
pub fn is_config(media_type: &str) -> bool {
    matches!(
        strip_parameters(media_type),
        DOCKER_IMAGE_CONFIG | OCI_IMAGE_CONFIG
    )
}

/// Returns true for the legacy Docker distribution media types.
pub fn is_docker(media_type: &str) -> bool {
    strip_parameters(media_type).starts_with("application/vnd.docker.")
}

/// Drop `; charset=...` style parameters from a `Content-Type` value.
pub fn strip_parameters(media_type: &str) -> &str {
    media_type
        .split_once(';')
        .map(|(base, _)| base)
        .unwrap_or(media_type)
        .trim()
}
