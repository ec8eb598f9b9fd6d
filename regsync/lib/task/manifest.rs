use std::{fmt, sync::Arc};

use crate::{
    concurrent::Counter,
    registry::{ImageDestination, ImageSource},
    RegsyncResult,
};

use super::{SyncContext, Task, TaskOutput};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Publishes manifest bytes once every child completed.
///
/// The prerequisite counter starts at the number of children (blobs for an
/// image manifest, sub-manifests for a list); each completing child
/// releases it once, and the release that drives it to zero re-schedules
/// the task. A sub-manifest of a list carries an `instance_digest` and is
/// published under that digest instead of the destination tag; completing
/// it releases the list it belongs to.
pub struct ManifestTask {
    /// The list manifest this task belongs to, when it is a sub-manifest.
    primary: Option<Arc<ManifestTask>>,

    source: Arc<dyn ImageSource>,
    destination: Arc<dyn ImageDestination>,

    bytes: Vec<u8>,
    media_type: String,
    instance_digest: Option<String>,

    counter: Counter,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ManifestTask {
    /// Creates a manifest task waiting on `prerequisites` children.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        primary: Option<Arc<ManifestTask>>,
        source: Arc<dyn ImageSource>,
        destination: Arc<dyn ImageDestination>,
        bytes: Vec<u8>,
        media_type: String,
        instance_digest: Option<String>,
        prerequisites: i64,
    ) -> Self {
        Self {
            primary,
            source,
            destination,
            bytes,
            media_type,
            instance_digest,
            counter: Counter::new(prerequisites, prerequisites),
        }
    }

    /// The list manifest this sub-manifest belongs to, when any.
    pub fn primary(&self) -> Option<&Arc<ManifestTask>> {
        self.primary.as_ref()
    }

    /// The source the manifest came from.
    pub fn source(&self) -> &Arc<dyn ImageSource> {
        &self.source
    }

    /// The destination the manifest is published to.
    pub fn destination(&self) -> &Arc<dyn ImageDestination> {
        &self.destination
    }

    /// True when every child has completed.
    pub fn runnable(&self) -> bool {
        self.counter.value().0 == 0
    }

    /// Releases one prerequisite; true when this release made the task
    /// runnable.
    pub fn release_once(&self) -> bool {
        self.counter.decrease().0 == 0
    }

    pub(super) async fn run(&self, ctx: &SyncContext) -> RegsyncResult<TaskOutput> {
        self.destination
            .push_manifest(&self.bytes, &self.media_type, self.instance_digest.as_deref())
            .await?;

        let Some(primary) = &self.primary else {
            // the image is fully synchronized once its top manifest is
            // published
            ctx.successful_images.add(
                self.source.reference().to_string(),
                self.destination.reference().to_string(),
            );
            return Ok(TaskOutput::default());
        };

        if primary.release_once() {
            return Ok(TaskOutput {
                children: vec![Task::Manifest(primary.clone())],
                message: "start to sync manifest list".to_string(),
            });
        }

        Ok(TaskOutput::default())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ManifestTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance_digest {
            Some(digest) => write!(
                f,
                "sync manifest {} from {} to {}",
                digest,
                self.source.reference(),
                self.destination.reference()
            ),
            None => write!(
                f,
                "sync manifest from {} to {}",
                self.source.reference(),
                self.destination.reference()
            ),
        }
    }
}
