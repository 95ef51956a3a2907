//! SOCI Registry Core - Shared Types
//!
//! This crate provides the types shared by the registry client and its
//! callers: the error taxonomy, the media-type catalog, content descriptors,
//! repository references, and configuration.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod media_type;
pub mod reference;

// Re-export commonly used types
pub use config::{RegistryConfig, StaticCredentials};
pub use descriptor::{sha256_digest, ArtifactDescriptor, ContentVerifier};
pub use error::{RegistryError, Result};
pub use reference::{Reference, RepositoryReference};

/// SOCI registry core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
