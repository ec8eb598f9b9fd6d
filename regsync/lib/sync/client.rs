use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    auth::AuthResolver,
    concurrent::{ImageList, List},
    config::Config,
    manifest::PlatformFilter,
    registry::{HttpRegistryAdapter, RegistryAdapter},
    task::{RuleTask, SyncContext, Task},
    RegsyncError, RegsyncResult,
};

use super::Scheduler;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Tunables of a synchronization run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Number of workers draining the task list.
    pub worker_count: usize,

    /// Retry passes over failed tasks.
    pub retries: usize,

    /// Permitted operating systems, format `os[:version]`.
    pub os_filter: Vec<String>,

    /// Permitted architectures, format `architecture[:variant]`.
    pub arch_filter: Vec<String>,

    /// Pushes everything even when the destination looks up to date.
    pub force_update: bool,

    /// Writes the successfully synchronized images to this file.
    pub output_success_images: Option<PathBuf>,

    /// Format of the success-images file, `json` or `yaml`.
    pub output_images_format: String,
}

/// A synchronization client: seeds rules, drives retry passes over the
/// worker pool and reports the outcome.
pub struct SyncClient {
    config: Config,
    options: SyncOptions,

    ctx: Arc<SyncContext>,
    task_list: Arc<List<Task>>,
    failed_list: Arc<List<Task>>,
    shutdown: Arc<AtomicBool>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SyncClient {
    /// Creates a client talking to real registries.
    pub fn new(config: Config, options: SyncOptions) -> Self {
        Self::with_adapter(config, options, Arc::new(HttpRegistryAdapter))
    }

    /// Creates a client over a custom registry adapter.
    ///
    /// This is how tests plug in an in-memory registry.
    pub fn with_adapter(
        config: Config,
        options: SyncOptions,
        adapter: Arc<dyn RegistryAdapter>,
    ) -> Self {
        let resolver = Arc::new(AuthResolver::new(config.auth.clone()));
        let ctx = Arc::new(SyncContext {
            adapter,
            resolver,
            filter: PlatformFilter::new(options.os_filter.clone(), options.arch_filter.clone()),
            force_update: options.force_update,
            default_registry: config.default_registry.clone(),
            successful_images: Arc::new(ImageList::new()),
        });

        Self {
            config,
            options,
            ctx,
            task_list: Arc::new(List::new()),
            failed_list: Arc::new(List::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The cooperative shutdown flag. Once set, workers finish their
    /// current task and exit; periodic mode stops between runs.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// The record of successfully synchronized images.
    pub fn successful_images(&self) -> Arc<ImageList> {
        self.ctx.successful_images.clone()
    }

    /// Runs one full synchronization: seeds one rule per source ->
    /// destination pair, drains the pool, retries failed tasks up to the
    /// configured count, and writes the success-images output.
    ///
    /// Succeeds iff the failed list is empty after the last pass.
    pub async fn run(&self) -> RegsyncResult<()> {
        let started = Instant::now();

        tracing::info!("Start to generate sync tasks, please wait ...");
        for (source, destinations) in &self.config.images {
            for destination in destinations {
                self.task_list
                    .push_back(Task::Rule(RuleTask::new(source, destination)));
            }
        }

        let scheduler = Scheduler::new(
            self.options.worker_count,
            self.task_list.clone(),
            self.failed_list.clone(),
            self.shutdown.clone(),
        );

        tracing::info!("Start to handle sync tasks, please wait ...");
        scheduler.run_pass(self.ctx.clone()).await?;

        for retry in 0..self.options.retries {
            if self.failed_list.is_empty() || self.shutdown.load(Ordering::Acquire) {
                break;
            }

            tracing::info!(
                "Start to retry failed sync tasks (attempt {} of {}), please wait ...",
                retry + 1,
                self.options.retries
            );
            self.task_list.push_back_list(&self.failed_list);
            scheduler.run_pass(self.ctx.clone()).await?;
        }

        self.write_success_images()?;

        let failed = self.failed_list.len();
        tracing::info!(
            "Finished, {} sync tasks failed, cost {:.2?}",
            failed,
            started.elapsed()
        );

        if failed > 0 {
            return Err(RegsyncError::TasksFailed(failed));
        }

        Ok(())
    }

    /// Runs forever, re-synchronizing every `interval` and resetting all
    /// lists between runs. A shutdown request breaks out of the loop
    /// between runs; it never interrupts an in-flight run.
    pub async fn run_every(&self, interval: Duration) -> RegsyncResult<()> {
        loop {
            self.reset();

            match self.run().await {
                Result::Ok(()) => tracing::info!("Synchronization pass succeeded"),
                Err(error) => tracing::error!("Synchronization pass failed: {}", error),
            }

            if self.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }

            tracing::info!("Next synchronization in {:?}", interval);
            let wake = Instant::now() + interval;
            while Instant::now() < wake {
                if self.shutdown.load(Ordering::Acquire) {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// Clears every list so the next run starts fresh.
    fn reset(&self) {
        self.task_list.reset();
        self.failed_list.reset();
        self.ctx.successful_images.reset();
    }

    /// Serializes the success-images map when an output file was asked
    /// for.
    fn write_success_images(&self) -> RegsyncResult<()> {
        let Some(path) = &self.options.output_success_images else {
            return Ok(());
        };

        let snapshot = self.ctx.successful_images.snapshot();
        let serialized = match self.options.output_images_format.as_str() {
            "json" => serde_json::to_string_pretty(&snapshot)?,
            "yaml" | "" => serde_yaml::to_string(&snapshot)?,
            other => {
                return Err(RegsyncError::Config(format!(
                    "unsupported output images format: {} (expected json or yaml)",
                    other
                )))
            }
        };

        std::fs::write(path, serialized)?;
        tracing::info!("Wrote successfully synchronized images to {}", path.display());

        Ok(())
    }
}
