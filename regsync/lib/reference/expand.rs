use async_trait::async_trait;
use oci_spec::image::Digest;
use regex::Regex;

use crate::{error::RegsyncError, RegsyncResult};

use super::{
    extract_registry_and_path, normalize_repository, validate_registry, validate_repository,
    validate_tag, Reference, ReferenceSelector,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Enumerates the tags of a repository.
///
/// Rule expansion only consults the lister when a reference names no tag or
/// uses a `/regex/` selector; everything else expands without touching the
/// network.
#[async_trait]
pub trait TagLister: Send + Sync {
    /// Returns the tags of `registry/repository` in registry order.
    async fn list_tags(&self, registry: &str, repository: &str) -> RegsyncResult<Vec<String>>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`TagLister`] over a fixed set of tag (or digest) strings.
///
/// Used to expand a destination reference against the tags its source
/// expanded to.
#[derive(Debug)]
pub struct StaticTagLister {
    tags: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StaticTagLister {
    /// Creates a lister that always returns the given strings.
    pub fn new(tags: Vec<String>) -> Self {
        Self { tags }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl TagLister for StaticTagLister {
    async fn list_tags(&self, _registry: &str, _repository: &str) -> RegsyncResult<Vec<String>> {
        Ok(self.tags.clone())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Expands a reference string into the concrete references it names.
///
/// | Input form | Expansion |
/// |---|---|
/// | `host/ns/repo:tag` | one reference |
/// | `host/ns/repo@algo:hex` | one reference (digest) |
/// | `host/ns/repo:tag@algo:hex` | one reference (digest pinned, tag retained) |
/// | `host/ns/repo` | one reference per listed tag |
/// | `host/ns/repo:a,b,c` | one reference per tag; the first may carry `@digest` |
/// | `host/ns/repo:/regex/` | listed tags matching the regex |
pub async fn expand_references(
    input: &str,
    lister: &dyn TagLister,
) -> RegsyncResult<Vec<Reference>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RegsyncError::ImageReference(
            "input string is empty".into(),
        ));
    }

    let (registry, remainder) = extract_registry_and_path(input);
    validate_registry(&registry)?;

    // the digest, when present, belongs to the repository or to the first
    // tag element; anything after a comma is a further tag
    let (head, digest, trailing_tags) = split_digest_and_trailing_tags(remainder)?;

    let (repo_part, tag_section) = match head.find(':') {
        Some(idx) => (&head[..idx], Some(&head[idx + 1..])),
        None => (head, None),
    };

    if repo_part.is_empty() {
        return Err(RegsyncError::ImageReference(
            "repository is empty".into(),
        ));
    }

    let repository = normalize_repository(repo_part, &registry);
    validate_repository(&repository)?;

    let make = |selector: ReferenceSelector| {
        Reference::new(registry.clone(), repository.clone(), selector)
    };

    match tag_section {
        // no tag at all: a lone digest, or every tag of the repository
        None => {
            if let Some(digest) = digest {
                if !trailing_tags.is_empty() {
                    return Err(RegsyncError::ImageReference(format!(
                        "unexpected tags after digest: {}",
                        input
                    )));
                }
                return Ok(vec![make(ReferenceSelector::Digest(digest))]);
            }

            let tags = lister.list_tags(&registry, &repository).await?;
            Ok(tags
                .into_iter()
                .map(|tag| make(selector_for_listed(&tag)))
                .collect())
        }

        // a `/regex/` selector over the repository's tags
        Some(section) if section.starts_with('/') => {
            if digest.is_some() || !trailing_tags.is_empty() {
                return Err(RegsyncError::ImageReference(format!(
                    "tag regex cannot be combined with a digest or tag list: {}",
                    input
                )));
            }
            if section.len() < 2 || !section.ends_with('/') {
                return Err(RegsyncError::ImageReference(format!(
                    "tag regex must start and end with '/': {}",
                    section
                )));
            }

            let re = Regex::new(&section[1..section.len() - 1]).map_err(|e| {
                RegsyncError::ImageReference(format!("invalid tag regex: {}", e))
            })?;

            let tags = lister.list_tags(&registry, &repository).await?;
            Ok(tags
                .into_iter()
                .filter(|tag| re.is_match(tag))
                .map(|tag| make(ReferenceSelector::tag(tag)))
                .collect())
        }

        // one or more comma-separated tags; the digest sticks to the first
        Some(section) => {
            let mut references = Vec::new();
            let mut elements = section.split(',').map(str::to_string).collect::<Vec<_>>();
            elements.extend(trailing_tags);

            for (index, tag) in elements.iter().enumerate() {
                validate_tag(tag)?;
                let selector = if index == 0 {
                    match &digest {
                        Some(digest) => {
                            ReferenceSelector::tag_with_digest(tag.clone(), digest.clone())
                        }
                        None => ReferenceSelector::tag(tag.clone()),
                    }
                } else {
                    ReferenceSelector::tag(tag.clone())
                };
                references.push(make(selector));
            }

            Ok(references)
        }
    }
}

/// Splits `path[@digest[,tag…]]` into the pre-digest path, the validated
/// digest, and any tags that follow it.
fn split_digest_and_trailing_tags(
    remainder: &str,
) -> Result<(&str, Option<Digest>, Vec<String>), RegsyncError> {
    let Some(at_idx) = remainder.find('@') else {
        return Ok((remainder, None, Vec::new()));
    };

    let after = &remainder[at_idx + 1..];
    let (digest_str, trailing) = match after.find(',') {
        Some(comma_idx) => (
            &after[..comma_idx],
            after[comma_idx + 1..]
                .split(',')
                .map(str::to_string)
                .collect(),
        ),
        None => (after, Vec::new()),
    };

    if !digest_str.contains(':') {
        return Err(RegsyncError::ImageReference(format!(
            "invalid digest: {}",
            digest_str
        )));
    }

    let digest = digest_str
        .parse::<Digest>()
        .map_err(|e| RegsyncError::ImageReference(format!("invalid digest: {}", e)))?;

    Ok((&remainder[..at_idx], Some(digest), trailing))
}

/// Builds the selector for a tag string returned by a lister. Destination
/// expansion reuses the source side's `tag_or_digest` strings, so a listed
/// "tag" may itself be a digest.
fn selector_for_listed(tag: &str) -> ReferenceSelector {
    if tag.contains(':') {
        if let Ok(digest) = tag.parse::<Digest>() {
            return ReferenceSelector::Digest(digest);
        }
    }
    ReferenceSelector::tag(tag)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lister(tags: &[&str]) -> StaticTagLister {
        StaticTagLister::new(tags.iter().map(|t| t.to_string()).collect())
    }

    #[tokio::test]
    async fn test_expand_single_tag() {
        let refs = expand_references("r1.example/a/b:v1", &lister(&[]))
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].to_string(), "r1.example/a/b:v1");
    }

    #[tokio::test]
    async fn test_expand_digest() {
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let refs = expand_references(&format!("r1.example/a/b@{}", digest), &lister(&[]))
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].tag_or_digest().unwrap(), digest);
    }

    #[tokio::test]
    async fn test_expand_no_tag_lists_repository() {
        let refs = expand_references("r1.example/a/b", &lister(&["v1", "v2"]))
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].to_string(), "r1.example/a/b:v1");
        assert_eq!(refs[1].to_string(), "r1.example/a/b:v2");
    }

    #[tokio::test]
    async fn test_expand_comma_separated_tags() {
        let refs = expand_references("r1.example/a/b:a,b,c", &lister(&[]))
            .await
            .unwrap();
        assert_eq!(
            refs.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            vec![
                "r1.example/a/b:a",
                "r1.example/a/b:b",
                "r1.example/a/b:c"
            ]
        );
    }

    #[tokio::test]
    async fn test_expand_comma_separated_with_leading_digest() {
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let refs = expand_references(
            &format!("r1.example/a/b:v1@{},v2", digest),
            &lister(&[]),
        )
        .await
        .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].tag_or_digest().unwrap(), digest);
        assert_eq!(refs[1].to_string(), "r1.example/a/b:v2");
    }

    #[tokio::test]
    async fn test_expand_tag_regex() {
        let refs = expand_references("r1.example/x:/v1\\./", &lister(&["v1.0", "v1.1", "v2.0"]))
            .await
            .unwrap();
        assert_eq!(
            refs.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            vec!["r1.example/x:v1.0", "r1.example/x:v1.1"]
        );
    }

    #[tokio::test]
    async fn test_expand_unterminated_regex_rejected() {
        let err = expand_references("r1.example/x:/v1", &lister(&["v1.0"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("start and end with '/'"));
    }

    #[tokio::test]
    async fn test_expand_empty_source_rejected() {
        let err = expand_references("  ", &lister(&[])).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_expand_listed_digest_strings_become_digest_refs() {
        // destination expansion reuses the source's tag-or-digest strings
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let refs = expand_references("r2.example/a/b", &lister(&[digest]))
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert!(refs[0].has_digest());
    }

    #[tokio::test]
    async fn test_expand_hub_shorthand() {
        let refs = expand_references("alpine:3.12", &lister(&[])).await.unwrap();
        assert_eq!(refs[0].to_string(), "docker.io/library/alpine:3.12");
    }
}
