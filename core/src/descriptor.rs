//! Content descriptors and digest helpers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RegistryError, Result};
use crate::media_type;

/// Content-addressable reference to one node in a registry object graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    /// Media type of the referenced content
    pub media_type: String,
    /// Content digest (e.g., "sha256:abc123...")
    pub digest: String,
    /// Content size in bytes
    pub size: u64,
    /// Optional annotations carried alongside the descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ArtifactDescriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            annotations: None,
        }
    }

    /// Describe `content`, computing its sha256 digest.
    pub fn from_content(media_type: impl Into<String>, content: &[u8]) -> Self {
        Self::new(media_type, sha256_digest(content), content.len() as u64)
    }

    pub fn is_manifest(&self) -> bool {
        media_type::is_manifest(&self.media_type)
    }

    /// Hex part of the digest (after `algorithm:`).
    pub fn digest_hex(&self) -> &str {
        self.digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest)
    }

    /// Check that `content` matches this descriptor's size and digest.
    pub fn verify(&self, content: &[u8]) -> Result<()> {
        let mut verifier = ContentVerifier::new(self);
        verifier.update(content)?;
        verifier.finish()
    }
}

/// Incremental size and digest check for content arriving in chunks.
///
/// Fails as soon as more bytes than the descriptor's size arrive, so a
/// stream that overruns its declared size is never consumed to the end.
pub struct ContentVerifier {
    digest: String,
    size: u64,
    seen: u64,
    hasher: Sha256,
}

impl ContentVerifier {
    pub fn new(descriptor: &ArtifactDescriptor) -> Self {
        Self {
            digest: descriptor.digest.clone(),
            size: descriptor.size,
            seen: 0,
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> Result<()> {
        self.seen = self.seen.saturating_add(chunk.len() as u64);
        if self.seen > self.size {
            return Err(self.size_mismatch());
        }
        self.hasher.update(chunk);
        Ok(())
    }

    /// Bytes accepted so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn finish(self) -> Result<()> {
        if self.seen != self.size {
            return Err(self.size_mismatch());
        }
        let actual = format!("sha256:{}", hex::encode(self.hasher.finalize()));
        if actual != self.digest {
            return Err(RegistryError::DigestMismatch {
                expected: self.digest,
                actual,
            });
        }
        Ok(())
    }

    fn size_mismatch(&self) -> RegistryError {
        RegistryError::DigestMismatch {
            expected: format!("{} ({} bytes)", self.digest, self.size),
            actual: format!("{} bytes", self.seen),
        }
    }
}

/// Compute the `sha256:<hex>` digest of `content`.
pub fn sha256_digest(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

/// Validate an `algorithm:hex` digest string.
///
/// Only sha256 is accepted for hashing, so sha256 digests must carry exactly
/// 64 lowercase hex characters.
pub fn validate_digest(digest: &str) -> Result<()> {
    let (algorithm, encoded) = digest.split_once(':').ok_or_else(|| {
        RegistryError::InvalidReference(format!(
            "Invalid digest '{}': expected algorithm:hex",
            digest
        ))
    })?;

    let hex_ok = |len: usize| {
        encoded.len() == len
            && encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    };

    let valid = match algorithm {
        "sha256" => hex_ok(64),
        "sha512" => hex_ok(128),
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidReference(format!(
            "Invalid digest '{}'",
            digest
        )))
    }
}
