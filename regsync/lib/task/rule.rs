use std::fmt;

use async_trait::async_trait;

use crate::{
    reference::{expand_references, Reference, ReferenceSelector, StaticTagLister, TagLister},
    RegsyncError, RegsyncResult,
};

use super::{SyncContext, Task, TaskOutput, UrlTask};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Expands one source -> destination rule into url tasks.
///
/// Runnable on creation; failures during expansion (bad references,
/// unreachable tag lists) fail the rule as a whole and are retried with
/// the rest of the failed list.
#[derive(Debug, Clone)]
pub struct RuleTask {
    source: String,
    destination: String,
}

/// Lists tags by opening a source at the registry named by the reference.
struct AdapterTagLister<'a> {
    ctx: &'a SyncContext,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RuleTask {
    /// Creates a rule task for a source -> destination entry.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Expands the rule: resolves both sides to equally long reference
    /// lists and emits one url task per pair.
    pub(super) async fn run(&self, ctx: &SyncContext) -> RegsyncResult<TaskOutput> {
        if self.source.is_empty() {
            return Err(RegsyncError::ImageReference(
                "source url should not be empty".into(),
            ));
        }

        let source_refs = expand_references(&self.source, &AdapterTagLister { ctx }).await?;
        if source_refs.is_empty() {
            return Ok(TaskOutput {
                children: Vec::new(),
                message: format!("source {} has no matching tags", self.source),
            });
        }

        // an empty destination falls back to the default registry with the
        // source repository and tags
        let destination = if self.destination.is_empty() {
            let Some(default_registry) = &ctx.default_registry else {
                return Err(RegsyncError::Config(format!(
                    "empty destination for {} requires a default destination registry",
                    self.source
                )));
            };
            format!("{}/{}", default_registry, source_refs[0].get_repository())
        } else {
            self.destination.clone()
        };

        // a destination without tags reuses the source side's tags/digests
        let source_selectors = source_refs
            .iter()
            .filter_map(Reference::tag_or_digest)
            .collect::<Vec<_>>();
        let destination_refs =
            expand_references(&destination, &StaticTagLister::new(source_selectors)).await?;

        check_reference_pairs(&source_refs, &destination_refs)?;

        let mut children = Vec::with_capacity(source_refs.len());
        for (source_ref, destination_ref) in source_refs.into_iter().zip(destination_refs) {
            let source_credential = ctx.resolver.resolve(&source_ref.path()).await?;
            let destination_credential = ctx.resolver.resolve(&destination_ref.path()).await?;

            children.push(Task::Url(UrlTask::new(
                source_ref,
                destination_ref,
                source_credential,
                destination_credential,
            )));
        }

        Ok(TaskOutput {
            children,
            message: String::new(),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl TagLister for AdapterTagLister<'_> {
    async fn list_tags(&self, registry: &str, repository: &str) -> RegsyncResult<Vec<String>> {
        let path = format!("{}/{}", registry, repository);
        let credential = self.ctx.resolver.resolve(&path).await?;
        let reference = Reference::new(registry, repository, ReferenceSelector::Unset);
        let source = self.ctx.adapter.open_source(&reference, credential).await?;
        source.list_tags().await
    }
}

impl fmt::Display for RuleTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "analyzing image rule for {} -> {}",
            self.source, self.destination
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Validates an expanded source/destination pairing: the counts must
/// match, and when both sides pin a single digest the digests must be
/// equal.
fn check_reference_pairs(
    source_refs: &[Reference],
    destination_refs: &[Reference],
) -> RegsyncResult<()> {
    if source_refs.len() != destination_refs.len() {
        return Err(RegsyncError::ImageReference(format!(
            "the number of tags of source ({}) and destination ({}) is not matched",
            source_refs.len(),
            destination_refs.len()
        )));
    }

    if source_refs.len() == 1
        && source_refs[0].has_digest()
        && destination_refs[0].has_digest()
        && source_refs[0].tag_or_digest() != destination_refs[0].tag_or_digest()
    {
        return Err(RegsyncError::ImageReference(
            "the digest of source and destination must match".into(),
        ));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(s: &str) -> Reference {
        s.parse().unwrap()
    }

    #[test]
    fn test_check_reference_pairs_count_mismatch() {
        let sources = vec![reference("r1.example/a/b:v1"), reference("r1.example/a/b:v2")];
        let destinations = vec![reference("r2.example/a/b:v1")];
        let err = check_reference_pairs(&sources, &destinations).unwrap_err();
        assert!(err.to_string().contains("not matched"));
    }

    #[test]
    fn test_check_reference_pairs_digest_mismatch() {
        let sources = vec![reference(
            "r1.example/a/b@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        )];
        let destinations = vec![reference(
            "r2.example/a/b@sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        )];
        let err = check_reference_pairs(&sources, &destinations).unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn test_check_reference_pairs_matching() {
        let sources = vec![reference("r1.example/a/b:v1")];
        let destinations = vec![reference("r2.example/a/b:v1")];
        assert!(check_reference_pairs(&sources, &destinations).is_ok());
    }
}
