use std::{fmt, sync::Arc};

use crate::{registry::BlobDescriptor, RegsyncResult};

use super::{ManifestTask, SyncContext, Task, TaskOutput};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Transfers one blob from source to destination.
///
/// The destination is probed first; a blob it already holds is not
/// transferred again, which also makes re-running a completed blob task a
/// no-op. Completion releases the owning manifest task once.
#[derive(Clone)]
pub struct BlobTask {
    /// The manifest this blob belongs to.
    primary: Arc<ManifestTask>,

    descriptor: BlobDescriptor,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BlobTask {
    /// Creates a blob task under a manifest task.
    pub fn new(primary: Arc<ManifestTask>, descriptor: BlobDescriptor) -> Self {
        Self {
            primary,
            descriptor,
        }
    }

    /// The manifest this blob belongs to.
    pub fn primary(&self) -> &Arc<ManifestTask> {
        &self.primary
    }

    pub(super) async fn run(&self, _ctx: &SyncContext) -> RegsyncResult<TaskOutput> {
        let source = self.primary.source();
        let destination = self.primary.destination();

        let mut message = String::new();
        if destination.blob_exists(&self.descriptor).await? {
            message = "ignore exist blob".to_string();
        } else {
            let (stream, size) = source.get_blob(&self.descriptor).await?;

            let mut descriptor = self.descriptor.clone();
            if descriptor.size < 0 {
                descriptor.size = size;
            }

            destination.put_blob(stream, &descriptor).await?;
        }

        if self.primary.release_once() {
            return Ok(TaskOutput {
                children: vec![Task::Manifest(self.primary.clone())],
                message: "start to sync manifest".to_string(),
            });
        }

        Ok(TaskOutput {
            children: Vec::new(),
            message,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for BlobTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync blob {}({}) from {} to {}",
            self.descriptor.digest,
            self.descriptor.size,
            self.primary.source().reference(),
            self.primary.destination().reference()
        )
    }
}
