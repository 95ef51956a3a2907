//! Repository reference parsing.
//!
//! A reference addresses one object inside a registry repository, either by
//! a mutable tag or by an immutable digest:
//!
//! - `lambda/python` → tag `latest`
//! - `lambda/python:3.10` → tag `3.10`
//! - `library/redis@sha256:afd1...` → digest

use crate::descriptor::validate_digest;
use crate::error::{RegistryError, Result};

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Maximum tag length accepted by registries.
const MAX_TAG_LEN: usize = 128;

/// Tag or digest part of a repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Mutable tag (e.g., "7", "3.10-x86_64")
    Tag(String),
    /// Immutable content digest (e.g., "sha256:abc...")
    Digest(String),
}

impl Reference {
    /// Parse a bare tag-or-digest string.
    ///
    /// Anything containing a `:` is treated as a digest, since tags cannot
    /// contain colons.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(RegistryError::InvalidReference(
                "Empty tag or digest".to_string(),
            ));
        }

        if reference.contains(':') {
            validate_digest(reference)?;
            return Ok(Reference::Digest(reference.to_string()));
        }

        validate_tag(reference)?;
        Ok(Reference::Tag(reference.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Reference::Tag(tag) => tag,
            Reference::Digest(digest) => digest,
        }
    }

    pub fn is_digest(&self) -> bool {
        matches!(self, Reference::Digest(_))
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(repository, reference)` pair addressing one object in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryReference {
    /// Repository path (e.g., "lambda/python", "docker/library/redis")
    pub repository: String,
    /// Tag or digest
    pub reference: Reference,
}

impl RepositoryReference {
    pub fn new(repository: impl Into<String>, reference: Reference) -> Result<Self> {
        let repository = repository.into();
        validate_repository(&repository)?;
        Ok(Self {
            repository,
            reference,
        })
    }

    /// Parse `repo`, `repo:tag` or `repo@digest`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(RegistryError::InvalidReference(
                "Empty repository reference".to_string(),
            ));
        }

        if let Some((repository, digest)) = input.split_once('@') {
            validate_digest(digest)?;
            return Self::new(repository, Reference::Digest(digest.to_string()));
        }

        // Tag separator is the last colon after the last slash
        let last_segment_start = input.rfind('/').map(|pos| pos + 1).unwrap_or(0);
        match input[last_segment_start..].rfind(':') {
            Some(colon) => {
                let colon = last_segment_start + colon;
                let tag = &input[colon + 1..];
                validate_tag(tag)?;
                Self::new(&input[..colon], Reference::Tag(tag.to_string()))
            }
            None => Self::new(input, Reference::Tag(DEFAULT_TAG.to_string())),
        }
    }
}

impl std::fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reference {
            Reference::Tag(tag) => write!(f, "{}:{}", self.repository, tag),
            Reference::Digest(digest) => write!(f, "{}@{}", self.repository, digest),
        }
    }
}

fn validate_tag(tag: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidReference(format!(
            "Invalid tag '{}'",
            tag
        )))
    }
}

fn validate_repository(repository: &str) -> Result<()> {
    let valid = !repository.is_empty()
        && repository.split('/').all(|component| {
            !component.is_empty()
                && component.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
                })
        });
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidReference(format!(
            "Invalid repository name '{}'",
            repository
        )))
    }
}
