//! Image references and content digests.
//!
//! An [`ImageRef`] is the parsed form of the `name[:tag]` string accepted by
//! `pull`. A [`Digest`] is a normalised `sha256:<64 hex>` content address;
//! every blob lookup and comparison goes through the normalised form so that
//! registries answering with bare hex and prefixed digests interoperate.

use crate::constants::{
    DEFAULT_REGISTRY, DEFAULT_TAG, IMAGE_REF_VALID_CHARS, MAX_IMAGE_REF_LEN,
    OFFICIAL_REPOSITORY_NAMESPACE,
};
use crate::error::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::fmt;

// =============================================================================
// Image Reference
// =============================================================================

/// A parsed image reference: registry host, repository path, and tag.
///
/// Parsing rules:
/// - The registry is always [`DEFAULT_REGISTRY`].
/// - A name without `/` is prefixed with `library/` (official images).
/// - The portion after the last `:` is the tag, unless it contains a `/`
///   (then it is part of the name); missing or empty tags default to
///   [`DEFAULT_TAG`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host, e.g. `registry-1.docker.io`.
    pub registry: String,
    /// Repository path, e.g. `library/alpine`. Never empty.
    pub repository: String,
    /// Tag, e.g. `latest`. Never empty.
    pub tag: String,
}

impl ImageRef {
    /// Parses a `name[:tag]` reference.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(Error::InvalidImageReference {
                reference: input.to_string(),
                reason: "empty reference".to_string(),
            });
        }

        if input.len() > MAX_IMAGE_REF_LEN {
            return Err(Error::InvalidImageReference {
                reference: input.to_string(),
                reason: format!("exceeds {} bytes", MAX_IMAGE_REF_LEN),
            });
        }

        if !input.chars().all(|c| IMAGE_REF_VALID_CHARS.contains(c)) {
            return Err(Error::InvalidImageReference {
                reference: input.to_string(),
                reason: "contains invalid characters".to_string(),
            });
        }

        // Tag is everything after the last ':' unless that would swallow part
        // of the path (e.g. a '/' after the colon).
        let (name, tag) = match input.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') && !tag.is_empty() => (name, tag),
            Some((name, tag)) if !tag.contains('/') && tag.is_empty() => (name, DEFAULT_TAG),
            _ => (input, DEFAULT_TAG),
        };

        if name.is_empty() {
            return Err(Error::InvalidImageReference {
                reference: input.to_string(),
                reason: "empty repository".to_string(),
            });
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("{}/{}", OFFICIAL_REPOSITORY_NAMESPACE, name)
        };

        Ok(ImageRef {
            registry: DEFAULT_REGISTRY.to_string(),
            repository,
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

// =============================================================================
// Content Digest
// =============================================================================

/// A normalised content digest of the form `sha256:<64 lowercase hex>`.
///
/// Bare 64-hex inputs are re-prefixed on parse, so
/// `Digest::parse(h) == Digest::parse("sha256:" + h)` for any valid hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Parses and normalises a digest string.
    pub fn parse(input: &str) -> Result<Self> {
        let hex = input.strip_prefix("sha256:").unwrap_or(input);

        if hex.len() != 64 {
            return Err(Error::InvalidDigest {
                digest: input.to_string(),
                reason: format!("expected 64 hex characters, got {}", hex.len()),
            });
        }

        if !hex
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(Error::InvalidDigest {
                digest: input.to_string(),
                reason: "expected lowercase hex".to_string(),
            });
        }

        Ok(Digest(format!("sha256:{}", hex)))
    }

    /// Computes the digest of in-memory content.
    pub fn from_content(content: &[u8]) -> Self {
        Digest(format!("sha256:{}", hex::encode(Sha256::digest(content))))
    }

    /// Wraps an already-finalised lowercase hash.
    pub(crate) fn from_hex(hex: String) -> Self {
        Digest(format!("sha256:{}", hex))
    }

    /// The full `sha256:<hex>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare hex portion, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0["sha256:".len()..]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
