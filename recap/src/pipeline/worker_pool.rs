//! Worker pool executing queued jobs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::SchedulerEvent;
use super::job::{Job, JobStatus, RunOutcome};
use super::scheduler::{Dequeued, Shared};
use super::stages::StageSet;

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent jobs. Jobs run strictly one at a time with the default of 1.
    pub max_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_workers: 1 }
    }
}

/// A pool of identical worker loops sharing one queue.
pub struct WorkerPool {
    /// Configuration.
    config: WorkerPoolConfig,
    /// Cancellation token.
    cancellation_token: CancellationToken,
    /// Task set for workers.
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool with the default configuration.
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }

    /// Create a new worker pool with custom configuration.
    pub fn with_config(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker pool.
    pub(crate) fn start(&self, shared: Arc<Shared>, stages: Arc<StageSet>) {
        let max_workers = self.config.max_workers.max(1);
        info!("Starting worker pool with {} max workers", max_workers);

        let mut tasks = self.tasks.lock();
        if let Some(ref mut join_set) = *tasks {
            for i in 0..max_workers {
                join_set.spawn(worker_loop(
                    i,
                    shared.clone(),
                    stages.clone(),
                    self.cancellation_token.clone(),
                ));
            }
        }
    }

    /// Stop the worker pool.
    ///
    /// Workers exit at their next suspension point; a job that is mid-stage
    /// finishes that stage first.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();
        self.wait().await;
        info!("Worker pool stopped");
    }

    /// Wait for the workers to exit on their own, without cancelling them.
    pub(crate) async fn wait(&self) {
        // Take the join set out of the mutex before awaiting
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        // Wait for all workers to finish (outside the lock)
        if let Some(mut join_set) = join_set {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    warn!("Worker task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    stages: Arc<StageSet>,
    shutdown: CancellationToken,
) {
    debug!("Worker {} started", worker);

    let mut woken = false;
    'outer: loop {
        // Register for the next wake-up before looking at the queue, so a
        // notification sent while draining is not lost.
        let notified = shared.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        // A wake-up that finds nothing to do switches processing off.
        let mut idle_on_empty = woken;
        while !shutdown.is_cancelled() {
            match shared.dequeue(idle_on_empty) {
                Dequeued::Run {
                    run_id,
                    job,
                    cancel,
                } => {
                    idle_on_empty = false;
                    run_job(&shared, &stages, run_id, job, cancel).await;
                }
                Dequeued::Idle => break,
                Dequeued::Stop => {
                    debug!("Worker {} reached the shutdown cutoff", worker);
                    break 'outer;
                }
            }
        }

        // The only place an idle worker sleeps.
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = &mut notified => {}
        }
        woken = true;
    }

    debug!("Worker {} shutting down", worker);
}

async fn run_job(
    shared: &Shared,
    stages: &Arc<StageSet>,
    run_id: u64,
    job: Arc<Job>,
    cancel: CancellationToken,
) {
    info!(job_id = %job.id(), "Starting job");

    // Run on its own task so a panicking stage cannot take the worker down.
    let task = {
        let job = job.clone();
        let stages = stages.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { job.run(&stages, &cancel).await })
    };

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            let message = if e.is_panic() {
                "job panicked".to_string()
            } else {
                "job task was aborted".to_string()
            };
            error!(job_id = %job.id(), error = %e, "Error while processing job");
            job.set_status(JobStatus::Error(message.clone()));
            RunOutcome::Failed { message }
        }
    };

    match &outcome {
        RunOutcome::Completed => info!(job_id = %job.id(), "Job complete"),
        RunOutcome::Cancelled { last_status } => {
            info!(job_id = %job.id(), status = %last_status, "Job stopped after cancellation")
        }
        RunOutcome::Failed { message } => {
            warn!(job_id = %job.id(), error = %message, "Job failed")
        }
    }

    // The slot may already be gone if the job was cancelled.
    if !shared.release(run_id) {
        debug!(job_id = %job.id(), "Job slot already cleared");
    }

    shared.events.publish(SchedulerEvent::JobFinished {
        job_id: job.id().to_string(),
        status: job.status(),
        cancelled: cancel.is_cancelled(),
    });
}
