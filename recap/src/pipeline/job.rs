//! A single summarization job and its staged pipeline.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::events::{EventSink, SchedulerEvent};
use super::stages::{StageSet, SummaryRequest};
use crate::{Error, Result};

/// Job status.
///
/// The happy path is strictly forward:
/// `Pending → Fetching → Transcribing → Summarizing → Finalizing → Complete`.
/// Any stage may instead end in `Error`, which is terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Retrieving the source media.
    Fetching,
    /// Producing the transcript.
    Transcribing,
    /// Generating the summary (and short form).
    Summarizing,
    /// Recording the job in the idempotency index.
    Finalizing,
    /// All stages finished.
    Complete,
    /// A stage failed; carries the failure message.
    Error(String),
}

impl JobStatus {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error(_))
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, JobStatus::Complete)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Fetching => write!(f, "Fetching"),
            JobStatus::Transcribing => write!(f, "Transcribing"),
            JobStatus::Summarizing => write!(f, "Summarizing"),
            JobStatus::Finalizing => write!(f, "Finalizing"),
            JobStatus::Complete => write!(f, "Complete"),
            JobStatus::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Pipeline parameters of a job. Immutable once the job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobParams {
    /// Spoken language passed to the transcriber.
    pub language: String,
    /// Speech-to-text model selector.
    pub transcription_model: String,
    /// Generative model selector used for summarization.
    pub summary_model: String,
    /// Window length, in characters, of each summarization chunk.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub overlap: usize,
    /// Also produce a condensed short form of the summary.
    pub short_form: bool,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            transcription_model: "openai/whisper-large-v3".to_string(),
            summary_model: "llama3".to_string(),
            chunk_size: 6000,
            overlap: 500,
            short_form: true,
        }
    }
}

impl JobParams {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::validation("chunk_size must be greater than zero"));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::validation(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Externally visible reduction of a job, as shown in queue listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub title: String,
    pub language: String,
    pub status: JobStatus,
}

/// How a call to [`Job::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage succeeded.
    Completed,
    /// Cancellation was observed at a stage boundary; the status was left as is.
    Cancelled { last_status: JobStatus },
    /// A stage failed and the job is now in `Error`.
    Failed { message: String },
}

#[derive(Debug, Default)]
struct JobState {
    status: JobStatus,
    source: Option<PathBuf>,
    transcript: Option<String>,
    summary: Option<String>,
    short_form: Option<String>,
}

/// A user-submitted unit of work.
///
/// Identity and parameters are fixed at creation. Status and artifacts are
/// written only by the job's own stage methods while a worker runs it.
#[derive(Debug)]
pub struct Job {
    id: String,
    title: String,
    params: JobParams,
    state: RwLock<JobState>,
    notifier: Option<EventSink>,
}

impl Job {
    /// Create a pending job with default parameters.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            params: JobParams::default(),
            state: RwLock::new(JobState::default()),
            notifier: None,
        }
    }

    /// Set the pipeline parameters.
    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = params;
        self
    }

    /// Set the spoken language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.params.language = language.into();
        self
    }

    /// Route status changes to the scheduler's event channel.
    pub(crate) fn attach_notifier(&mut self, sink: EventSink) {
        self.notifier = Some(sink);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn language(&self) -> &str {
        &self.params.language
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn status(&self) -> JobStatus {
        self.state.read().status.clone()
    }

    /// Location of the fetched source media, once fetched.
    pub fn source(&self) -> Option<PathBuf> {
        self.state.read().source.clone()
    }

    pub fn transcript(&self) -> Option<String> {
        self.state.read().transcript.clone()
    }

    pub fn summary(&self) -> Option<String> {
        self.state.read().summary.clone()
    }

    pub fn short_form(&self) -> Option<String> {
        self.state.read().short_form.clone()
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            title: self.title.clone(),
            language: self.params.language.clone(),
            status: self.status(),
        }
    }

    /// Update the status and publish a change notification.
    ///
    /// Publishing only enqueues an event; observers run later on the
    /// dispatcher task, so this never blocks and never takes the scheduler lock.
    pub fn set_status(&self, status: JobStatus) {
        self.state.write().status = status.clone();
        info!(job_id = %self.id, status = %status, "Job status changed");

        if let Some(sink) = &self.notifier {
            sink.publish(SchedulerEvent::StatusChanged {
                job_id: self.id.clone(),
                status,
            });
        }
    }

    /// Run the pipeline.
    ///
    /// `cancel` is consulted before every stage. A stage already in progress
    /// always runs to completion or failure; only the next boundary is
    /// interruptible. Stage failures put the job in `Error` and are reported
    /// as [`RunOutcome::Failed`].
    pub async fn run(&self, stages: &StageSet, cancel: &CancellationToken) -> RunOutcome {
        match self.run_stages(stages, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %self.id, error = %message, "Error while running job");
                self.set_status(JobStatus::Error(message.clone()));
                RunOutcome::Failed { message }
            }
        }
    }

    async fn run_stages(&self, stages: &StageSet, cancel: &CancellationToken) -> Result<RunOutcome> {
        if let Some(outcome) = self.checkpoint(cancel) {
            return Ok(outcome);
        }
        self.fetch(stages).await?;

        if let Some(outcome) = self.checkpoint(cancel) {
            return Ok(outcome);
        }
        self.transcribe(stages).await?;

        if let Some(outcome) = self.checkpoint(cancel) {
            return Ok(outcome);
        }
        self.summarize(stages).await?;

        if let Some(outcome) = self.checkpoint(cancel) {
            return Ok(outcome);
        }
        self.finalize(stages).await?;

        Ok(RunOutcome::Completed)
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> Option<RunOutcome> {
        if !cancel.is_cancelled() {
            return None;
        }
        let last_status = self.status();
        info!(job_id = %self.id, status = %last_status, "Job cancelled at stage boundary");
        Some(RunOutcome::Cancelled { last_status })
    }

    async fn fetch(&self, stages: &StageSet) -> Result<()> {
        self.set_status(JobStatus::Fetching);
        let start = Instant::now();

        let source = stages.fetcher.fetch(&self.id).await?;

        info!(
            job_id = %self.id,
            source = %source.display(),
            "Fetched in {:.2} seconds",
            start.elapsed().as_secs_f64()
        );
        self.state.write().source = Some(source);
        Ok(())
    }

    async fn transcribe(&self, stages: &StageSet) -> Result<()> {
        self.set_status(JobStatus::Transcribing);
        let start = Instant::now();

        let transcript = stages
            .transcriber
            .transcribe(
                &self.id,
                &self.params.transcription_model,
                &self.params.language,
            )
            .await?;

        info!(
            job_id = %self.id,
            chars = transcript.chars().count(),
            "Transcribed in {:.2} seconds",
            start.elapsed().as_secs_f64()
        );
        self.state.write().transcript = Some(transcript);
        Ok(())
    }

    async fn summarize(&self, stages: &StageSet) -> Result<()> {
        self.set_status(JobStatus::Summarizing);
        let start = Instant::now();

        let transcript = self.transcript().unwrap_or_default();
        let summary = stages
            .summarizer
            .summarize(SummaryRequest {
                video_id: &self.id,
                text: &transcript,
                model: &self.params.summary_model,
                chunk_size: self.params.chunk_size,
                overlap: self.params.overlap,
                short_form: self.params.short_form,
            })
            .await?;

        info!(
            job_id = %self.id,
            "Summarized in {:.2} seconds",
            start.elapsed().as_secs_f64()
        );
        let mut state = self.state.write();
        state.summary = Some(summary.long_form);
        state.short_form = summary.short_form;
        Ok(())
    }

    async fn finalize(&self, stages: &StageSet) -> Result<()> {
        self.set_status(JobStatus::Finalizing);

        let has_short_form = self
            .state
            .read()
            .short_form
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        stages
            .mapping
            .record(&self.id, &self.title, has_short_form)
            .await?;

        info!(job_id = %self.id, has_short_form, "Recorded mapping");
        self.set_status(JobStatus::Complete);
        Ok(())
    }
}
