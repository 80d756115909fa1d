//! Background job processing.
//!
//! The pipeline is responsible for:
//! - Holding submitted jobs in a FIFO queue
//! - Running them one at a time on a worker task
//! - Sequencing each job through fetch, transcribe, summarize and finalize
//! - Cooperative cancellation at stage boundaries
//! - Publishing queue and status events to observers

pub mod chunker;
mod events;
mod job;
mod scheduler;
pub mod stages;
mod worker_pool;

pub use chunker::{chunk_text, chunk_windows};
pub use events::{EventSink, Observer, SchedulerEvent};
pub use job::{Job, JobParams, JobStatus, JobView, RunOutcome};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use stages::{StageSet, Summary, SummaryRequest};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};
