//! Scheduler events and their delivery.
//!
//! Mutations never call observers inline. They publish onto an unbounded
//! channel that a dispatcher task drains outside of any scheduler lock, so
//! an observer may freely call back into the scheduler.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::job::JobStatus;

/// Broadcast channel capacity for subscribers.
pub(crate) const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Events emitted by the scheduler and its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Job appended to the queue.
    JobSubmitted { job_id: String },
    /// Queued jobs with this id removed. Emitted even when nothing matched.
    JobsRemoved { job_id: String, removed: usize },
    /// Every queued job removed.
    QueueCleared { removed: usize },
    /// Processing switched on or off.
    ProcessingChanged { enabled: bool },
    /// A worker dequeued the job and is about to run it.
    JobStarted { job_id: String },
    /// A job moved to a new status.
    StatusChanged { job_id: String, status: JobStatus },
    /// The running job was abandoned; it stops at its next stage boundary.
    JobCancelled { job_id: String },
    /// A job's run returned and its slot was released.
    JobFinished {
        job_id: String,
        status: JobStatus,
        cancelled: bool,
    },
}

/// A registered observer.
///
/// Observers run on the dispatcher task and must not block.
pub type Observer = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

/// Handler applied to each event before observers see it.
pub(crate) type Hook = Box<dyn Fn(&SchedulerEvent) + Send + Sync>;

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue an event. Never blocks; events published after the
    /// dispatcher stopped are dropped.
    pub fn publish(&self, event: SchedulerEvent) {
        trace!(?event, "Publishing scheduler event");
        let _ = self.tx.send(event);
    }
}

/// Drains the event channel and fans events out.
pub(crate) struct EventDispatcher {
    rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    hook: Hook,
    observers: Arc<RwLock<Vec<Observer>>>,
    broadcast_tx: broadcast::Sender<SchedulerEvent>,
}

impl EventDispatcher {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<SchedulerEvent>,
        hook: Hook,
        observers: Arc<RwLock<Vec<Observer>>>,
        broadcast_tx: broadcast::Sender<SchedulerEvent>,
    ) -> Self {
        Self {
            rx,
            hook,
            observers,
            broadcast_tx,
        }
    }

    /// Deliver events until `shutdown` fires, then flush what is already queued.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                event = self.rx.recv() => match event {
                    Some(event) => self.deliver(event),
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    while let Ok(event) = self.rx.try_recv() {
                        self.deliver(event);
                    }
                    break;
                }
            }
        }
        debug!("Event dispatcher stopped");
    }

    fn deliver(&self, event: SchedulerEvent) {
        (self.hook)(&event);

        // Clone the list so an observer may register another one.
        let observers = self.observers.read().clone();
        for observer in observers {
            observer(&event);
        }

        // Ignore errors - just means no subscribers currently
        let _ = self.broadcast_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_dispatcher_runs_hook_observers_and_broadcast_in_order() {
        let (sink, rx) = EventSink::channel();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let observer_calls = Arc::new(AtomicUsize::new(0));

        let hook_counter = hook_calls.clone();
        let hook: Hook = Box::new(move |_| {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        });
        let observer_counter = observer_calls.clone();
        let observers: Arc<RwLock<Vec<Observer>>> =
            Arc::new(RwLock::new(vec![Arc::new(move |_: &SchedulerEvent| {
                observer_counter.fetch_add(1, Ordering::SeqCst);
            })]));
        let (broadcast_tx, mut broadcast_rx) = broadcast::channel(EVENT_BROADCAST_CAPACITY);

        let shutdown = CancellationToken::new();
        let dispatcher = EventDispatcher::new(rx, hook, observers, broadcast_tx);
        let handle = tokio::spawn(dispatcher.run(shutdown.clone()));

        sink.publish(SchedulerEvent::JobSubmitted {
            job_id: "a".to_string(),
        });
        sink.publish(SchedulerEvent::ProcessingChanged { enabled: true });

        assert_eq!(
            broadcast_rx.recv().await.unwrap(),
            SchedulerEvent::JobSubmitted {
                job_id: "a".to_string()
            }
        );
        assert_eq!(
            broadcast_rx.recv().await.unwrap(),
            SchedulerEvent::ProcessingChanged { enabled: true }
        );
        assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
        assert_eq!(observer_calls.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_is_dropped_silently() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.publish(SchedulerEvent::QueueCleared { removed: 0 });
    }
}
