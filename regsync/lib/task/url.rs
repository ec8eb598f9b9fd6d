use std::{fmt, sync::Arc};

use crate::{
    auth::Credential,
    manifest::{destination_manifest_unchanged, interpret_manifest},
    reference::Reference,
    RegsyncResult,
};

use super::{BlobTask, ManifestTask, SyncContext, Task, TaskOutput};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Expands one concrete reference pair into the transfer tree below it.
///
/// Fetches the source manifest, interprets it under the platform filter,
/// skips the pair when the destination is already up to date, and
/// otherwise emits the blob tasks (manifest tasks are held back by their
/// prerequisite counters until the blobs complete).
#[derive(Debug, Clone)]
pub struct UrlTask {
    source: Reference,
    destination: Reference,
    source_credential: Option<Credential>,
    destination_credential: Option<Credential>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UrlTask {
    /// Creates a url task for a resolved reference pair.
    pub fn new(
        source: Reference,
        destination: Reference,
        source_credential: Option<Credential>,
        destination_credential: Option<Credential>,
    ) -> Self {
        Self {
            source,
            destination,
            source_credential,
            destination_credential,
        }
    }

    pub(super) async fn run(&self, ctx: &SyncContext) -> RegsyncResult<TaskOutput> {
        let source = ctx
            .adapter
            .open_source(&self.source, self.source_credential.clone())
            .await?;
        let destination = ctx
            .adapter
            .open_destination(&self.destination, self.destination_credential.clone())
            .await?;

        let (manifest_bytes, media_type) = source.get_manifest().await?;

        let Some(outcome) =
            interpret_manifest(source.as_ref(), &manifest_bytes, &media_type, &ctx.filter).await?
        else {
            return Ok(TaskOutput {
                children: Vec::new(),
                message: "skip synchronization because no manifest fits platform filters"
                    .to_string(),
            });
        };

        if !ctx.force_update {
            let sub_digests = outcome
                .sub_manifests
                .iter()
                .map(|sub| sub.digest.clone())
                .collect::<Vec<_>>();
            if destination_manifest_unchanged(destination.as_ref(), &outcome.bytes, &sub_digests)
                .await?
            {
                ctx.successful_images
                    .add(self.source.to_string(), self.destination.to_string());
                return Ok(TaskOutput {
                    children: Vec::new(),
                    message: "skip synchronization because destination image is unchanged"
                        .to_string(),
                });
            }
        }

        let mut children = Vec::new();

        if outcome.sub_manifests.is_empty() {
            // a single-platform image: the manifest waits for its blobs
            let manifest_task = Arc::new(ManifestTask::new(
                None,
                source,
                destination,
                outcome.bytes,
                outcome.media_type,
                None,
                outcome.blobs.len() as i64,
            ));

            if outcome.blobs.is_empty() {
                children.push(Task::Manifest(manifest_task));
            } else {
                for blob in outcome.blobs {
                    children.push(Task::Blob(BlobTask::new(manifest_task.clone(), blob)));
                }
            }
        } else {
            // a list image: each kept sub-manifest waits for its blobs, the
            // list itself waits for the sub-manifests
            let list_task = Arc::new(ManifestTask::new(
                None,
                source.clone(),
                destination.clone(),
                outcome.bytes,
                outcome.media_type,
                None,
                outcome.sub_manifests.len() as i64,
            ));

            for sub in outcome.sub_manifests {
                let sub_task = Arc::new(ManifestTask::new(
                    Some(list_task.clone()),
                    source.clone(),
                    destination.clone(),
                    sub.bytes,
                    sub.media_type,
                    Some(sub.digest),
                    sub.blobs.len() as i64,
                ));

                if sub.blobs.is_empty() {
                    children.push(Task::Manifest(sub_task));
                } else {
                    for blob in sub.blobs {
                        children.push(Task::Blob(BlobTask::new(sub_task.clone(), blob)));
                    }
                }
            }
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

impl fmt::Display for UrlTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generating sync tasks from {} to {}",
            self.source, self.destination
        )
    }
}
