//! Collaborators that do the actual work of each pipeline stage.
//!
//! A [`Job`](super::Job) only sequences stages and tracks status; the
//! retrieval, speech-to-text, summarization and indexing work is delegated
//! to the traits below, bundled in a [`StageSet`].

mod fetch;
mod mapping;
mod summarize;
mod title;
mod transcribe;

pub use fetch::YtDlpFetcher;
pub use mapping::{JsonMappingStore, MappingEntry};
pub use summarize::{OllamaClient, OllamaSummarizer};
pub use title::{TitleResolver, YtDlpTitleResolver};
pub use transcribe::WhisperTranscriber;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Result;
use crate::config::AppConfig;

/// Retrieves the source media of a video.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Make the audio of `video_id` available locally and return its location.
    async fn fetch(&self, video_id: &str) -> Result<PathBuf>;
}

/// Converts fetched media into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, video_id: &str, model: &str, language: &str) -> Result<String>;
}

/// Input of a summarization.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub video_id: &'a str,
    pub text: &'a str,
    pub model: &'a str,
    pub chunk_size: usize,
    pub overlap: usize,
    /// Also produce the condensed short form.
    pub short_form: bool,
}

/// Output of a summarization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub long_form: String,
    /// Present only when requested.
    pub short_form: Option<String>,
}

/// Produces summaries of transcripts.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary>;
}

/// Persistent index of processed videos.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Insert or update the entry for `video_id`.
    async fn record(&self, video_id: &str, title: &str, has_short_form: bool) -> Result<()>;
}

/// The collaborators a job runs against.
#[derive(Clone)]
pub struct StageSet {
    pub fetcher: Arc<dyn Fetcher>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn Summarizer>,
    pub mapping: Arc<dyn MappingStore>,
}

impl StageSet {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        transcriber: Arc<dyn Transcriber>,
        summarizer: Arc<dyn Summarizer>,
        mapping: Arc<dyn MappingStore>,
    ) -> Self {
        Self {
            fetcher,
            transcriber,
            summarizer,
            mapping,
        }
    }

    /// The default yt-dlp / whisper / Ollama / JSON index stack.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let storage = config.storage();
        let ollama = OllamaClient::new(&config.ollama.host)?;
        Ok(Self::new(
            Arc::new(YtDlpFetcher::new(&config.ytdlp.program, storage.clone())),
            Arc::new(WhisperTranscriber::new(
                &config.whisper.program,
                storage.clone(),
            )),
            Arc::new(OllamaSummarizer::new(ollama, storage.clone())),
            Arc::new(JsonMappingStore::new(storage.mapping_file())),
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory stages for unit tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::Error;

    #[derive(Default)]
    struct Inner {
        fetches: AtomicUsize,
        transcription_failure: Option<String>,
        recorded: Mutex<Vec<(String, String, bool)>>,
    }

    /// Stages that succeed instantly with predictable outputs.
    #[derive(Clone, Default)]
    pub(crate) struct FakeStages {
        inner: Arc<Inner>,
    }

    impl FakeStages {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Make every transcription fail with `message`.
        pub(crate) fn failing_transcription(self, message: &str) -> Self {
            Self {
                inner: Arc::new(Inner {
                    transcription_failure: Some(message.to_string()),
                    ..Default::default()
                }),
            }
        }

        pub(crate) fn stage_set(&self) -> StageSet {
            let this = Arc::new(self.clone());
            StageSet::new(this.clone(), this.clone(), this.clone(), this)
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.inner.fetches.load(Ordering::SeqCst)
        }

        pub(crate) fn recorded(&self) -> Vec<(String, String, bool)> {
            self.inner.recorded.lock().clone()
        }
    }

    #[async_trait]
    impl Fetcher for FakeStages {
        async fn fetch(&self, video_id: &str) -> Result<PathBuf> {
            self.inner.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!("audio/{video_id}.m4a")))
        }
    }

    #[async_trait]
    impl Transcriber for FakeStages {
        async fn transcribe(&self, video_id: &str, _model: &str, _language: &str) -> Result<String> {
            match &self.inner.transcription_failure {
                Some(message) => Err(Error::transcription(message.clone())),
                None => Ok(format!("transcript of {video_id}")),
            }
        }
    }

    #[async_trait]
    impl Summarizer for FakeStages {
        async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary> {
            Ok(Summary {
                long_form: format!("summary of {}", request.video_id),
                short_form: request
                    .short_form
                    .then(|| format!("short form of {}", request.video_id)),
            })
        }
    }

    #[async_trait]
    impl MappingStore for FakeStages {
        async fn record(&self, video_id: &str, title: &str, has_short_form: bool) -> Result<()> {
            self.inner.recorded.lock().push((
                video_id.to_string(),
                title.to_string(),
                has_short_form,
            ));
            Ok(())
        }
    }
}
