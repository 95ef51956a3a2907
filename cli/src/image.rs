//! Full image reference parsing.
//!
//! Splits `registry/repository[:tag|@digest]` into the registry URL the
//! client connects to and the repository reference inside it.

use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::RepositoryReference;

/// Registry used when the reference names none.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Parsed `registry/repository[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTarget {
    /// Registry host with optional port (e.g., "public.ecr.aws")
    pub registry: String,
    /// Repository and tag or digest inside the registry
    pub target: RepositoryReference,
}

impl ImageTarget {
    /// Parse a full image reference.
    ///
    /// - `redis` → docker.io, `library/redis:latest`
    /// - `public.ecr.aws/lambda/python:3.10` → public.ecr.aws, `lambda/python:3.10`
    /// - `localhost:5000/app@sha256:...` → localhost:5000, `app@sha256:...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let (registry, rest) = match reference.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), reference.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", reference)),
        };
        if rest.is_empty() {
            return Err(RegistryError::InvalidReference(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }

        Ok(Self {
            registry,
            target: RepositoryReference::parse(&rest)?,
        })
    }

    pub fn repository(&self) -> &str {
        &self.target.repository
    }

    /// Tag or digest.
    pub fn reference(&self) -> &str {
        self.target.reference.as_str()
    }
}

impl std::fmt::Display for ImageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.target)
    }
}
