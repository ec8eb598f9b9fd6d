//! The task tree the scheduler executes.
//!
//! A synchronization decomposes into four kinds of work items. A *rule*
//! expands a source -> destination entry into concrete reference pairs; a
//! *url* task fetches and interprets one source manifest and builds the
//! transfer tree below it; *blob* tasks are the leaves moving bytes; a
//! *manifest* task publishes manifest bytes once its prerequisite counter
//! says every child (blob or sub-manifest) has completed. Completing a
//! child releases its parent once; the parent re-enters the task list when
//! the release that makes it runnable happens.

mod blob;
mod manifest;
mod rule;
mod url;

use std::{fmt, sync::Arc};

use crate::{
    auth::AuthResolver,
    concurrent::ImageList,
    manifest::PlatformFilter,
    registry::RegistryAdapter,
    RegsyncResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use blob::*;
pub use manifest::*;
pub use rule::*;
pub use url::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared state every task receives at execution.
///
/// Passed explicitly instead of living in globals so tests can assemble an
/// engine around an in-memory registry.
pub struct SyncContext {
    /// Opens sources and destinations at registries.
    pub adapter: Arc<dyn RegistryAdapter>,

    /// Resolves credentials for repository paths.
    pub resolver: Arc<AuthResolver>,

    /// The os/arch filter applied to every interpreted manifest.
    pub filter: PlatformFilter,

    /// Pushes everything even when the destination looks up to date.
    pub force_update: bool,

    /// Registry used when an images entry has an empty destination.
    pub default_registry: Option<String>,

    /// The record of successfully synchronized images.
    pub successful_images: Arc<ImageList>,
}

/// A unit of synchronization work.
#[derive(Clone)]
pub enum Task {
    /// Expands a source -> destination rule into url tasks.
    Rule(RuleTask),

    /// Expands one concrete reference pair into manifest and blob tasks.
    Url(UrlTask),

    /// Publishes manifest bytes once its children completed.
    Manifest(Arc<ManifestTask>),

    /// Transfers one blob.
    Blob(BlobTask),
}

/// What a task produced.
#[derive(Default)]
pub struct TaskOutput {
    /// Tasks to schedule next, scheduled ahead of unrelated work.
    pub children: Vec<Task>,

    /// An informational message for the log, empty when there is nothing
    /// noteworthy.
    pub message: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Task {
    /// Returns true when the task can execute immediately. Only manifest
    /// tasks ever wait: they become runnable when their prerequisite
    /// counter reaches zero.
    pub fn runnable(&self) -> bool {
        match self {
            Task::Manifest(manifest) => manifest.runnable(),
            _ => true,
        }
    }

    /// Releases the task once and returns whether it is runnable after the
    /// release. Non-manifest tasks have no prerequisites and are always
    /// runnable.
    pub fn release_once(&self) -> bool {
        match self {
            Task::Manifest(manifest) => manifest.release_once(),
            _ => true,
        }
    }

    /// The parent this task releases on completion, when it has one.
    pub fn primary(&self) -> Option<&Arc<ManifestTask>> {
        match self {
            Task::Manifest(manifest) => manifest.primary(),
            Task::Blob(blob) => Some(blob.primary()),
            _ => None,
        }
    }

    /// Executes the task, returning produced children and an optional info
    /// message. Children produced before an error are discarded by the
    /// scheduler.
    pub async fn run(&self, ctx: &SyncContext) -> RegsyncResult<TaskOutput> {
        match self {
            Task::Rule(rule) => rule.run(ctx).await,
            Task::Url(url) => url.run(ctx).await,
            Task::Manifest(manifest) => manifest.run(ctx).await,
            Task::Blob(blob) => blob.run(ctx).await,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Rule(rule) => write!(f, "{}", rule),
            Task::Url(url) => write!(f, "{}", url),
            Task::Manifest(manifest) => write!(f, "{}", manifest),
            Task::Blob(blob) => write!(f, "{}", blob),
        }
    }
}
