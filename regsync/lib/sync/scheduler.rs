use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    concurrent::{BroadcastChan, Counter, List},
    task::{SyncContext, Task},
    RegsyncResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A fixed pool of workers draining the shared task list.
///
/// Workers pop from the front and execute runnable tasks to completion;
/// children are pushed to the front so an expanded image finishes before
/// unrelated rules start. A worker that finds the list empty parks on the
/// broadcast channel; once every worker is parked and the list is still
/// empty the pass is over. Failed tasks land on the failed list for the
/// next retry pass.
pub struct Scheduler {
    worker_count: usize,
    task_list: Arc<List<Task>>,
    failed_list: Arc<List<Task>>,
    shutdown: Arc<AtomicBool>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Scheduler {
    /// Creates a scheduler over the shared lists.
    pub fn new(
        worker_count: usize,
        task_list: Arc<List<Task>>,
        failed_list: Arc<List<Task>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker_count: worker_count.max(1),
            task_list,
            failed_list,
            shutdown,
        }
    }

    /// Runs one pass: drains the task list to quiescence with the
    /// configured number of workers. Returns when every worker has exited.
    pub async fn run_pass(&self, ctx: Arc<SyncContext>) -> RegsyncResult<()> {
        let chan = Arc::new(BroadcastChan::new(self.worker_count));
        let progress = Arc::new(Counter::new(0, self.task_list.len() as i64));

        let mut workers = Vec::with_capacity(self.worker_count);
        for _ in 0..self.worker_count {
            workers.push(tokio::spawn(worker_loop(
                self.task_list.clone(),
                self.failed_list.clone(),
                chan.clone(),
                progress.clone(),
                ctx.clone(),
                self.shutdown.clone(),
            )));
        }

        // quiescence: close the channel once every worker is parked and no
        // work remains, or when a shutdown was requested
        let mut all_parked = chan.all_parked();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                chan.close();
                break;
            }
            if *all_parked.borrow_and_update() && self.task_list.is_empty() {
                chan.close();
                break;
            }

            tokio::select! {
                changed = all_parked.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }

        for worker in workers {
            worker.await?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// One worker: pop, execute, reschedule children, collect failures, park
/// when idle.
async fn worker_loop(
    task_list: Arc<List<Task>>,
    failed_list: Arc<List<Task>>,
    chan: Arc<BroadcastChan>,
    progress: Arc<Counter>,
    ctx: Arc<SyncContext>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let Some(task) = task_list.pop_front() else {
            if chan.wait().await {
                break;
            }
            continue;
        };

        if !task.runnable() {
            // a manifest still waiting on children; give its blobs a turn
            task_list.push_back(task);
            tokio::task::yield_now().await;
            continue;
        }

        tracing::info!("Executing {} ...", task);

        match task.run(&ctx).await {
            Result::Ok(output) => {
                let produced = !output.children.is_empty();
                for child in output.children.into_iter().rev() {
                    progress.increase_total();
                    task_list.push_front(child);
                }
                if produced {
                    chan.broadcast();
                }

                let (count, total) = progress.increase();
                if output.message.is_empty() {
                    tracing::info!("Finish {}. Now {}/{} processed.", task, count, total);
                } else {
                    tracing::info!(
                        "Finish {}: {}. Now {}/{} processed.",
                        task,
                        output.message,
                        count,
                        total
                    );
                }
            }
            Err(error) => {
                let (count, total) = progress.increase();
                tracing::error!(
                    "Failed to execute {}: {}. Now {}/{} processed.",
                    task,
                    error,
                    count,
                    total
                );
                failed_list.push_back(task);
            }
        }
    }
}
