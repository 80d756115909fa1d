//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};

use recap::pipeline::stages::{Fetcher, MappingStore, Summarizer, Transcriber};
use recap::pipeline::{SchedulerEvent, StageSet, Summary, SummaryRequest};
use recap::{Error, Result};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Inner {
    /// When set, every fetch waits for a permit.
    gate: Option<Semaphore>,
    failing: HashSet<String>,
    fetched: Mutex<Vec<String>>,
    recorded: Mutex<Vec<String>>,
}

/// Stages whose fetch can be held open to keep a job running.
#[derive(Clone, Default)]
pub struct TestStages {
    inner: Arc<Inner>,
}

impl TestStages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches block until [`TestStages::release`] is called.
    pub fn gated() -> Self {
        Self {
            inner: Arc::new(Inner {
                gate: Some(Semaphore::new(0)),
                ..Default::default()
            }),
        }
    }

    /// Transcription of these ids fails.
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            inner: Arc::new(Inner {
                failing: ids.iter().map(|id| id.to_string()).collect(),
                ..Default::default()
            }),
        }
    }

    /// Let `n` blocked fetches proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(n);
        }
    }

    pub fn stage_set(&self) -> StageSet {
        let this = Arc::new(self.clone());
        StageSet::new(this.clone(), this.clone(), this.clone(), this)
    }

    /// Ids in the order their fetch started.
    pub fn fetched(&self) -> Vec<String> {
        self.inner.fetched.lock().clone()
    }

    pub fn recorded(&self) -> Vec<String> {
        self.inner.recorded.lock().clone()
    }
}

#[async_trait]
impl Fetcher for TestStages {
    async fn fetch(&self, video_id: &str) -> Result<PathBuf> {
        self.inner.fetched.lock().push(video_id.to_string());
        if let Some(gate) = &self.inner.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::retrieval(e.to_string()))?
                .forget();
        }
        Ok(PathBuf::from(format!("audio/{video_id}.m4a")))
    }
}

#[async_trait]
impl Transcriber for TestStages {
    async fn transcribe(&self, video_id: &str, _model: &str, _language: &str) -> Result<String> {
        if self.inner.failing.contains(video_id) {
            return Err(Error::transcription("boom"));
        }
        Ok(format!("transcript of {video_id}"))
    }
}

#[async_trait]
impl Summarizer for TestStages {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary> {
        Ok(Summary {
            long_form: format!("summary of {}", request.video_id),
            short_form: None,
        })
    }
}

#[async_trait]
impl MappingStore for TestStages {
    async fn record(&self, video_id: &str, _title: &str, _has_short_form: bool) -> Result<()> {
        self.inner.recorded.lock().push(video_id.to_string());
        Ok(())
    }
}

/// Wait for the next event matching `pred`, skipping others.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<SchedulerEvent>, pred: F) -> SchedulerEvent
where
    F: Fn(&SchedulerEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for scheduler event")
}

/// Wait until a job's fetch has started.
pub async fn started(rx: &mut broadcast::Receiver<SchedulerEvent>, id: &str) {
    next_event(rx, |e| matches!(e, SchedulerEvent::JobStarted { job_id } if job_id == id)).await;
}
