//! Job scheduler: a FIFO queue feeding a single worker.
//!
//! The scheduler mediates every mutation of queue state. A `parking_lot`
//! mutex guards the queue, the running slot(s) and the processing flag; it
//! is only held for short, non-blocking sections and never across an
//! `.await`. Waking the worker and cancelling a job are separate
//! primitives: a [`Notify`] for "there may be work", and a fresh
//! [`CancellationToken`] per dequeued job.
//!
//! Shutdown places a cutoff at the tail of the queue. Workers keep taking
//! jobs submitted before it while processing is enabled and exit when they
//! reach it.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{
    EVENT_BROADCAST_CAPACITY, EventDispatcher, EventSink, Hook, Observer, SchedulerEvent,
};
use super::job::{Job, JobStatus, JobView};
use super::stages::StageSet;
use super::worker_pool::{WorkerPool, WorkerPoolConfig};

/// Configuration for the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool configuration.
    pub worker_pool: WorkerPoolConfig,
}

/// A job a worker is currently running.
pub(crate) struct RunningJob {
    run_id: u64,
    job: Arc<Job>,
    cancel: CancellationToken,
}

/// A job waiting in the queue, tagged with its submission sequence number.
struct Queued {
    seq: u64,
    job: Arc<Job>,
}

#[derive(Default)]
pub(crate) struct QueueState {
    queue: VecDeque<Queued>,
    running: Vec<RunningJob>,
    enabled: bool,
    next_seq: u64,
    next_run_id: u64,
    /// Set by shutdown: jobs with `seq` at or past this value never run.
    stop_at: Option<u64>,
}

/// What a worker should do next.
pub(crate) enum Dequeued {
    /// Run this job.
    Run {
        run_id: u64,
        job: Arc<Job>,
        cancel: CancellationToken,
    },
    /// Nothing to do until the next wake-up.
    Idle,
    /// The shutdown cutoff was reached; the worker exits.
    Stop,
}

/// State shared between the scheduler handle, its workers and the dispatcher.
pub(crate) struct Shared {
    state: Mutex<QueueState>,
    /// Wakes an idle worker: the queue became non-empty or processing was enabled.
    pub(crate) wake: Notify,
    pub(crate) events: EventSink,
}

impl Shared {
    fn new(events: EventSink) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            events,
        }
    }

    /// Take the head of the queue into a running slot.
    ///
    /// Returns [`Dequeued::Idle`] when processing is disabled or the queue is
    /// empty. With `idle_on_empty`, an empty queue with nothing running also
    /// switches processing off, so it never stays on with nothing to do.
    /// Once shutdown began, returns [`Dequeued::Stop`] when processing is
    /// disabled or the head of the queue is past the cutoff.
    pub(crate) fn dequeue(&self, idle_on_empty: bool) -> Dequeued {
        let mut state = self.state.lock();
        if let Some(stop_at) = state.stop_at {
            let before_cutoff = state.queue.front().is_some_and(|q| q.seq < stop_at);
            if !state.enabled || !before_cutoff {
                return Dequeued::Stop;
            }
        }
        if !state.enabled {
            return Dequeued::Idle;
        }

        let Some(Queued { job, .. }) = state.queue.pop_front() else {
            if idle_on_empty && state.running.is_empty() {
                state.enabled = false;
                drop(state);
                info!("Queue is empty. Stopping processing.");
                self.events
                    .publish(SchedulerEvent::ProcessingChanged { enabled: false });
            }
            return Dequeued::Idle;
        };

        let run_id = state.next_run_id;
        state.next_run_id += 1;
        let cancel = CancellationToken::new();
        state.running.push(RunningJob {
            run_id,
            job: job.clone(),
            cancel: cancel.clone(),
        });
        let more_queued = !state.queue.is_empty();
        drop(state);

        // Let idle siblings pick up the rest; stores no permit when nobody waits.
        if more_queued {
            self.wake.notify_waiters();
        }

        self.events.publish(SchedulerEvent::JobStarted {
            job_id: job.id().to_string(),
        });
        Dequeued::Run {
            run_id,
            job,
            cancel,
        }
    }

    /// Release a running slot. Tolerates a slot already cleared by cancellation.
    pub(crate) fn release(&self, run_id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.running.len();
        state.running.retain(|r| r.run_id != run_id);
        state.running.len() != before
    }

    fn set_enabled(&self, enabled: bool) -> bool {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.enabled, enabled) != enabled
        };
        if changed {
            self.events
                .publish(SchedulerEvent::ProcessingChanged { enabled });
        }
        changed
    }

    /// Built-in handler: stop processing once the last job completed.
    fn on_event(&self, event: &SchedulerEvent) {
        let SchedulerEvent::JobFinished {
            status: JobStatus::Complete,
            ..
        } = event
        else {
            return;
        };

        let stopped = {
            let mut state = self.state.lock();
            if state.enabled && state.queue.is_empty() && state.running.is_empty() {
                state.enabled = false;
                true
            } else {
                false
            }
        };

        if stopped {
            info!("All jobs complete. Stopping processing.");
            self.events
                .publish(SchedulerEvent::ProcessingChanged { enabled: false });
        }
    }
}

/// The job scheduler.
///
/// Must be created inside a tokio runtime: construction spawns the worker
/// pool and the event dispatcher.
pub struct Scheduler {
    shared: Arc<Shared>,
    pool: WorkerPool,
    observers: Arc<RwLock<Vec<Observer>>>,
    broadcast_tx: broadcast::Sender<SchedulerEvent>,
    /// Stops the dispatcher once the workers are gone.
    dispatcher_token: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with a single worker.
    pub fn new(stages: StageSet) -> Self {
        Self::with_config(stages, SchedulerConfig::default())
    }

    /// Create a scheduler with custom configuration.
    pub fn with_config(stages: StageSet, config: SchedulerConfig) -> Self {
        let (events, rx) = EventSink::channel();
        let shared = Arc::new(Shared::new(events));
        let observers: Arc<RwLock<Vec<Observer>>> = Arc::new(RwLock::new(Vec::new()));
        let (broadcast_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let dispatcher_token = CancellationToken::new();

        let hook_shared = shared.clone();
        let hook: Hook = Box::new(move |event| hook_shared.on_event(event));
        let dispatcher = EventDispatcher::new(rx, hook, observers.clone(), broadcast_tx.clone());
        let dispatcher = tokio::spawn(dispatcher.run(dispatcher_token.clone()));

        let pool = WorkerPool::with_config(config.worker_pool);
        pool.start(shared.clone(), Arc::new(stages));

        Self {
            shared,
            pool,
            observers,
            broadcast_tx,
            dispatcher_token,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Append a job to the tail of the queue.
    ///
    /// Duplicate ids are accepted and run independently.
    pub fn submit(&self, mut job: Job) -> Arc<Job> {
        job.attach_notifier(self.shared.events.clone());
        let job = Arc::new(job);

        let (enabled, stopping) = {
            let mut state = self.shared.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push_back(Queued {
                seq,
                job: job.clone(),
            });
            (state.enabled, state.stop_at.is_some())
        };
        if stopping {
            warn!(job_id = %job.id(), "Job submitted after shutdown; it will not run");
        }
        info!(job_id = %job.id(), title = %job.title(), "Job submitted");

        if enabled {
            self.shared.wake.notify_one();
        }
        self.shared.events.publish(SchedulerEvent::JobSubmitted {
            job_id: job.id().to_string(),
        });
        job
    }

    /// Remove every queued job with this id, keeping the order of the rest.
    ///
    /// The running job is not affected. Returns the number of removed jobs.
    pub fn remove(&self, job_id: &str) -> usize {
        let removed = {
            let mut state = self.shared.state.lock();
            let before = state.queue.len();
            state.queue.retain(|q| q.job.id() != job_id);
            before - state.queue.len()
        };
        debug!(job_id, removed, "Removed queued jobs");

        self.shared.events.publish(SchedulerEvent::JobsRemoved {
            job_id: job_id.to_string(),
            removed,
        });
        removed
    }

    /// Remove every queued job. Returns the number of removed jobs.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.queue.len();
            state.queue.clear();
            removed
        };
        info!(removed, "Queue cleared");

        self.shared
            .events
            .publish(SchedulerEvent::QueueCleared { removed });
        removed
    }

    /// Allow the worker to dequeue and wake it.
    pub fn enable(&self) {
        if self.shared.set_enabled(true) {
            info!("Processing enabled");
        }
        self.shared.wake.notify_one();
    }

    /// Stop dequeuing. A running job is left to finish.
    pub fn disable(&self) {
        if self.shared.set_enabled(false) {
            info!("Processing disabled");
        }
    }

    /// Abandon the running job and stop processing.
    ///
    /// The slot is cleared immediately; the job itself stops at its next
    /// stage boundary, and a stage already in progress is not interrupted.
    /// Returns the ids of the abandoned jobs.
    pub fn cancel_current(&self) -> Vec<String> {
        let (cancelled, was_enabled) = {
            let mut state = self.shared.state.lock();
            if state.running.is_empty() {
                return Vec::new();
            }
            let cancelled: Vec<RunningJob> = state.running.drain(..).collect();
            for running in &cancelled {
                running.cancel.cancel();
            }
            let was_enabled = std::mem::replace(&mut state.enabled, false);
            (cancelled, was_enabled)
        };

        let ids: Vec<String> = cancelled
            .iter()
            .map(|running| running.job.id().to_string())
            .collect();
        for id in &ids {
            info!(job_id = %id, "Cancelling current job");
            self.shared.events.publish(SchedulerEvent::JobCancelled {
                job_id: id.clone(),
            });
        }
        if was_enabled {
            self.shared
                .events
                .publish(SchedulerEvent::ProcessingChanged { enabled: false });
        }
        ids
    }

    /// Start/stop switch: stops (cancelling the running job) when
    /// processing is on, starts it otherwise. Returns the new state.
    pub fn toggle(&self) -> bool {
        if self.is_processing() {
            self.cancel_current();
            self.disable();
            false
        } else {
            self.enable();
            true
        }
    }

    /// Queued jobs in order, excluding running ones.
    pub fn snapshot(&self) -> Vec<JobView> {
        let queued: Vec<Arc<Job>> = self
            .shared
            .state
            .lock()
            .queue
            .iter()
            .map(|q| q.job.clone())
            .collect();
        queued.iter().map(|job| job.view()).collect()
    }

    /// The running job, if any.
    pub fn current_job(&self) -> Option<JobView> {
        let current = self
            .shared
            .state
            .lock()
            .running
            .first()
            .map(|running| running.job.clone());
        current.map(|job| job.view())
    }

    /// All running jobs, oldest first.
    pub fn running_jobs(&self) -> Vec<JobView> {
        let running: Vec<Arc<Job>> = self
            .shared
            .state
            .lock()
            .running
            .iter()
            .map(|running| running.job.clone())
            .collect();
        running.iter().map(|job| job.view()).collect()
    }

    pub fn is_processing(&self) -> bool {
        self.shared.state.lock().enabled
    }

    /// Queued plus running jobs.
    pub fn total_jobs(&self) -> usize {
        let state = self.shared.state.lock();
        state.queue.len() + state.running.len()
    }

    /// `"Idle"` or `"Processing <id>"`.
    pub fn status_line(&self) -> String {
        match self.current_job() {
            Some(job) => format!("Processing {}", job.id),
            None => "Idle".to_string(),
        }
    }

    /// Register an observer. It runs on the dispatcher task and must not block.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    /// Subscribe to scheduler events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Wait until the queue is empty and no job is running.
    ///
    /// Never resolves while jobs sit in a queue that is not being processed.
    pub async fn wait_for_drain(&self) {
        let mut rx = self.subscribe();
        loop {
            if self.is_drained() {
                return;
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    fn is_drained(&self) -> bool {
        let state = self.shared.state.lock();
        state.queue.is_empty() && state.running.is_empty()
    }

    /// Stop the workers and the event dispatcher.
    ///
    /// Acts like a sentinel appended to the queue. While processing is
    /// enabled, the running job and every job submitted before this call
    /// run to completion first. With processing disabled the workers exit as
    /// soon as they are idle. Jobs still queued afterwards are dropped.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.stop_at.is_some() {
                return;
            }
            state.stop_at = Some(state.next_seq);
        }
        info!("Shutting down scheduler");
        self.shared.wake.notify_waiters();

        self.pool.wait().await;
        self.pool.stop().await;

        let dropped = {
            let mut state = self.shared.state.lock();
            state.enabled = false;
            let dropped = state.queue.len();
            state.queue.clear();
            dropped
        };
        if dropped > 0 {
            warn!(dropped, "Dropped queued jobs on shutdown");
        }

        self.dispatcher_token.cancel();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Event dispatcher ended abnormally: {}", e);
        }
        info!("Scheduler stopped");
    }
}
