//! Parsing, normalization and expansion of container image references.
//!
//! A reference string names a repository plus, optionally, a tag, a digest,
//! a comma-separated tag list or a `/regex/` tag selector. Parsing
//! normalizes the registry (the Docker Hub host is assumed when absent) and
//! the repository (`library/` is prepended to bare hub names); expansion
//! turns one input string into the concrete per-tag references a rule
//! synchronizes.

mod expand;

use crate::error::RegsyncError;
use getset::Getters;
use oci_spec::image::Digest;
use regex::Regex;
use std::{fmt, str::FromStr};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use expand::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The registry assumed when a reference does not name one.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// The namespace prepended to bare single-segment Docker Hub repositories.
pub const DEFAULT_REPO_NAMESPACE: &str = "library";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A normalized image reference.
///
/// Combines the registry host, the repository path and a selector naming a
/// tag, a digest, both, or nothing at all. A reference without a selector
/// stands for the whole repository and is expanded against the registry's
/// tag list before synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Reference {
    /// The registry where the image is hosted.
    registry: String,

    /// The repository name of the image.
    repository: String,

    /// The selector specifying a tag, a digest, both, or nothing.
    selector: ReferenceSelector,
}

/// The selector part of an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSelector {
    /// No tag or digest; the reference names the whole repository.
    Unset,

    /// Tag variant containing the image tag and an optional digest.
    Tag {
        /// The image tag.
        tag: String,

        /// The optional digest pinned alongside the tag.
        digest: Option<Digest>,
    },

    /// Digest variant containing only a digest.
    Digest(Digest),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reference {
    /// Creates a reference from its parts.
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        selector: ReferenceSelector,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            selector,
        }
    }

    /// Returns `registry/repository`, the form credentials are resolved
    /// against.
    pub fn path(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Returns the digest when the selector pins one.
    pub fn digest(&self) -> Option<&Digest> {
        match &self.selector {
            ReferenceSelector::Tag {
                digest: Some(digest),
                ..
            } => Some(digest),
            ReferenceSelector::Digest(digest) => Some(digest),
            _ => None,
        }
    }

    /// Returns the string used on the registry wire to address this
    /// reference: the digest when one is pinned, otherwise the tag.
    pub fn tag_or_digest(&self) -> Option<String> {
        match &self.selector {
            ReferenceSelector::Unset => None,
            ReferenceSelector::Tag {
                digest: Some(digest),
                ..
            } => Some(digest.to_string()),
            ReferenceSelector::Tag { tag, .. } => Some(tag.clone()),
            ReferenceSelector::Digest(digest) => Some(digest.to_string()),
        }
    }

    /// Returns true when the selector pins a digest.
    pub fn has_digest(&self) -> bool {
        self.digest().is_some()
    }

    /// Returns a copy of this reference with the given selector.
    pub fn with_selector(&self, selector: ReferenceSelector) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            selector,
        }
    }
}

impl ReferenceSelector {
    /// Creates a selector with the specified tag and no digest.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag {
            tag: tag.into(),
            digest: None,
        }
    }

    /// Creates a selector with both a tag and an associated digest.
    pub fn tag_with_digest(tag: impl Into<String>, digest: impl Into<Digest>) -> Self {
        Self::Tag {
            tag: tag.into(),
            digest: Some(digest.into()),
        }
    }

    /// Creates a selector using the specified digest.
    pub fn digest(digest: impl Into<Digest>) -> Self {
        Self::Digest(digest.into())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Reference {
    type Err = RegsyncError;

    /// Parses a string slice into a normalized image reference.
    ///
    /// Supported formats include:
    /// - "registry/repository:tag"
    /// - "registry/repository@digest"
    /// - "registry/repository:tag@digest"
    /// - "registry/repository" (no selector; stands for every tag)
    /// - "repository" and "namespace/repository" (Docker Hub assumed)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Err(RegsyncError::ImageReference(
                "input string is empty".into(),
            ));
        }

        let (pre, digest) = split_digest(s)?;
        let (registry, remainder) = extract_registry_and_path(pre);
        let (repository, tag) = extract_repository_and_tag(remainder, &registry)?;

        validate_registry(&registry)?;
        validate_repository(&repository)?;

        let selector = match (tag, digest) {
            (None, None) => ReferenceSelector::Unset,
            (None, Some(digest)) => ReferenceSelector::Digest(digest),
            (Some(tag), digest) => {
                validate_tag(&tag)?;
                ReferenceSelector::Tag { tag, digest }
            }
        };

        Ok(Reference {
            registry,
            repository,
            selector,
        })
    }
}

impl fmt::Display for Reference {
    /// Formats the reference into its canonical string; parsing the result
    /// yields an equal reference.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.selector {
            ReferenceSelector::Unset => Ok(()),
            ReferenceSelector::Tag {
                tag,
                digest: Some(d),
            } => write!(f, ":{}@{}", tag, d),
            ReferenceSelector::Tag { tag, digest: None } => write!(f, ":{}", tag),
            ReferenceSelector::Digest(d) => write!(f, "@{}", d),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Splits an optional `@digest` suffix off a reference string, validating
/// the digest against the `algo:hex` grammar.
fn split_digest(s: &str) -> Result<(&str, Option<Digest>), RegsyncError> {
    let Some(at_idx) = s.find('@') else {
        return Ok((s, None));
    };

    let digest_str = &s[at_idx + 1..];
    if !digest_str.contains(':') {
        return Err(RegsyncError::ImageReference(format!(
            "invalid digest: {}",
            digest_str
        )));
    }

    let parsed = digest_str
        .parse::<Digest>()
        .map_err(|e| RegsyncError::ImageReference(format!("invalid digest: {}", e)))?;

    Ok((&s[..at_idx], Some(parsed)))
}

/// Extracts the registry and the remaining path from a reference string.
/// The first segment is a registry when it looks like a host (contains a
/// dot or a port, or is `localhost`); otherwise the Docker Hub registry is
/// assumed.
pub(crate) fn extract_registry_and_path(reference: &str) -> (String, &str) {
    let segments: Vec<&str> = reference.splitn(2, '/').collect();
    if segments.len() > 1
        && (segments[0].contains('.') || segments[0].contains(':') || segments[0] == "localhost")
    {
        (segments[0].to_string(), segments[1])
    } else {
        (DEFAULT_REGISTRY.to_string(), reference)
    }
}

/// Extracts the repository and optional tag from the path following the
/// registry. Bare single-segment Docker Hub names get the `library/`
/// namespace; a colon inside the repository part is rejected.
fn extract_repository_and_tag(
    path: &str,
    registry: &str,
) -> Result<(String, Option<String>), RegsyncError> {
    let (repo_part, tag) = match path.rfind(':') {
        Some(idx) => (&path[..idx], Some(path[idx + 1..].to_string())),
        None => (path, None),
    };

    if repo_part.is_empty() {
        return Err(RegsyncError::ImageReference(
            "repository is empty".into(),
        ));
    }

    if repo_part.contains(':') {
        return Err(RegsyncError::ImageReference(format!(
            "repository contains more than one colon: {}",
            path
        )));
    }

    Ok((normalize_repository(repo_part, registry), tag))
}

/// Prepends the `library/` namespace to bare single-segment Docker Hub
/// repository names.
pub(crate) fn normalize_repository(repo_part: &str, registry: &str) -> String {
    if registry == DEFAULT_REGISTRY && !repo_part.contains('/') {
        format!("{}/{}", DEFAULT_REPO_NAMESPACE, repo_part)
    } else {
        repo_part.to_string()
    }
}

/// Validates the given registry string.
pub(crate) fn validate_registry(registry: &str) -> Result<(), RegsyncError> {
    let re = Regex::new(r"^[a-zA-Z0-9.-]+(:[0-9]+)?$").unwrap();
    if re.is_match(registry) {
        Ok(())
    } else {
        Err(RegsyncError::ImageReference(format!(
            "invalid registry: {}",
            registry
        )))
    }
}

/// Validates the repository name.
pub(crate) fn validate_repository(repository: &str) -> Result<(), RegsyncError> {
    let repo_re =
        Regex::new(r"^([a-z0-9]+(?:[._-][a-z0-9]+)*)(/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap();
    if repo_re.is_match(repository) {
        Ok(())
    } else {
        Err(RegsyncError::ImageReference(format!(
            "invalid repository: {}",
            repository
        )))
    }
}

/// Validates the tag string.
pub(crate) fn validate_tag(tag: &str) -> Result<(), RegsyncError> {
    let tag_re = Regex::new(r"^\w[\w.-]{0,127}$").unwrap();
    if tag_re.is_match(tag) {
        Ok(())
    } else {
        Err(RegsyncError::ImageReference(format!(
            "invalid tag: {}",
            tag
        )))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
