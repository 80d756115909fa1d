//! Summarization through a local Ollama server.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Summarizer, Summary, SummaryRequest};
use crate::config::StoragePaths;
use crate::pipeline::chunker::chunk_text;
use crate::utils::fs;
use crate::{Error, Result};

/// Generation on large models is slow; only guard against a dead server.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const JOURNALIST_PROMPT: &str = r#"# ROLE: News Analyst
You are a news analyst. You will read a transcript of a youtube video, and extract stories, news, opinions, events from it like a journalist. You will convert the transcript into a detailed journalistic expression that captures the main points and key ideas of the video, with each news item or topic covered in a separate section.
**BE SURE TO INCLUDE ALL THE TOPICS/NEWS/INFORMATION FROM THE VIDEO IN YOUR SUMMARY.**
**START FROM THE VERY BEGINNING OF THE VIDEO, DO NOT SKIP CONTENT**
**DO NOT INCLUDE YOUR OPINION, ONLY THE FACTS AND INFORMATION FROM THE VIDEO**
**INCLUDE ALL NEWS ITEMS, EVENTS, AND TOPICS DISCUSSED IN THE VIDEO, EVEN IF THEY SOUND GOSSIPY**
**DO NOT INCLUDE ANY INFORMATION THAT IS NOT IN THE VIDEO**
# STYLE: Journalistic
Use markdown to express the news items, events, topics, shared opinions, etc.. in a journalistic style.
**USE HEADINGS FOR EACH NEWS ITEM OR TOPIC**
**USE BULLET POINTS FOR DETAILS**
**USE PARAGRAPHS FOR DESCRIPTIONS**
**USE QUOTES FOR DIRECT QUOTES**
**USE ITALICS FOR EMPHASIS**
**USE BOLD FOR IMPORTANT POINTS**
**USE LINKS FOR REFERENCES**
**USE BLOCKQUOTES FOR LONG QUOTES**"#;

const ABSTRACTOR_PROMPT: &str = r#"# ROLE: Abstractor
You are an abstractor. You will read a summary of a youtube video, and summarize it. Pay attention to the main points and the key ideas.
**DO NOT INCLUDE YOUR OPINION, ONLY THE FACTS AND INFORMATION FROM THE VIDEO**
**DO NOT OUTPUT ANYTHING ELSE**
# FORMAT: Markdown"#;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    #[serde(skip_serializing_if = "no_context")]
    context: &'a [i64],
    stream: bool,
}

fn no_context(context: &&[i64]) -> bool {
    context.is_empty()
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    context: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Minimal client for the Ollama HTTP API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base: Url,
    client: Client,
}

impl OllamaClient {
    pub fn new(host: &str) -> Result<Self> {
        let base = Url::parse(host)
            .map_err(|e| Error::config(format!("invalid Ollama host {host:?}: {e}")))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::config(format!("invalid Ollama endpoint {path}: {e}")))
    }

    /// Names of the locally available models.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.endpoint("api/tags")?)
            .send()
            .await?
            .error_for_status()?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// One non-streaming completion. Returns the text and the conversation context.
    async fn generate(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
        context: &[i64],
    ) -> Result<GenerateResponse> {
        let response = self
            .client
            .post(self.endpoint("api/generate")?)
            .json(&GenerateRequest {
                model,
                prompt,
                system,
                context,
                stream: false,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Summarizes transcripts window by window and writes the results to disk.
pub struct OllamaSummarizer {
    client: OllamaClient,
    storage: StoragePaths,
}

impl OllamaSummarizer {
    pub fn new(client: OllamaClient, storage: StoragePaths) -> Self {
        Self { client, storage }
    }

    async fn long_form(&self, request: &SummaryRequest<'_>) -> Result<String> {
        let chunks = chunk_text(request.text, request.chunk_size, request.overlap)?;
        let total = chunks.len();
        let mut summary = String::new();
        let mut context = Vec::new();

        for (i, chunk) in chunks.into_iter().enumerate() {
            debug!(video_id = request.video_id, chunk = i + 1, total, "Summarizing chunk");
            let reply = self
                .client
                .generate(request.model, JOURNALIST_PROMPT, chunk, &context)
                .await
                .map_err(|e| Error::summarization(format!("chunk {}/{total}: {e}", i + 1)))?;
            summary.push_str(&reply.response);
            context = reply.context;
        }
        Ok(summary)
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary> {
        let long_form = self.long_form(&request).await?;
        fs::write_atomic(
            "writing summary",
            &self.storage.summary_file(request.video_id),
            long_form.as_bytes(),
        )
        .await
        .map_err(|e| Error::persistence(e.to_string()))?;
        info!(video_id = request.video_id, "Summary written");

        let short_form = if request.short_form {
            let reply = self
                .client
                .generate(request.model, ABSTRACTOR_PROMPT, &long_form, &[])
                .await
                .map_err(|e| Error::summarization(format!("short form: {e}")))?;
            fs::write_atomic(
                "writing short form",
                &self.storage.abstract_file(request.video_id),
                reply.response.as_bytes(),
            )
            .await
            .map_err(|e| Error::persistence(e.to_string()))?;
            Some(reply.response)
        } else {
            None
        };

        Ok(Summary {
            long_form,
            short_form,
        })
    }
}
