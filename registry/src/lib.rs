//! SOCI Registry - OCI registry client.
//!
//! Resolves, pulls and pushes OCI artifact graphs (manifests, indexes,
//! configs, and attached artifacts such as SOCI index manifests) against a
//! remote registry, authenticating transparently against managed registries
//! such as Amazon ECR.

#![allow(clippy::result_large_err)]

pub mod classifier;
pub mod client;
pub mod copy;
pub mod credentials;
pub mod endpoint;
pub mod manifest;
pub mod repository;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types
pub use classifier::{is_managed_endpoint, ProviderRegistry};
pub use client::RegistryClient;
pub use copy::{copy_graph, CopyStats};
pub use credentials::{authorize, CredentialProvider, EcrTokenProvider};
pub use endpoint::{BasicCredentials, RegistryEndpoint, CLIENT_USER_AGENT};
pub use manifest::ManifestSummary;
pub use repository::{classify_manifest_rejection, RemoteRepository};
pub use store::{BlobStream, ContentStore, MemoryStore, OciLayoutStore};
pub use transport::{CountingTransport, OciTransport, RegistryTransport, RequestCounts};

pub use soci_registry_core::{media_type, ArtifactDescriptor, RegistryConfig, RegistryError, Result};

/// SOCI Registry version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
