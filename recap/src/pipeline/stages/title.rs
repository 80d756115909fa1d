//! Video title lookup.

use async_trait::async_trait;

use crate::utils::url::watch_url;
use crate::{Error, Result};

#[async_trait]
pub trait TitleResolver: Send + Sync {
    async fn resolve(&self, video_id: &str) -> Result<String>;
}

/// Asks yt-dlp for the title without downloading anything.
pub struct YtDlpTitleResolver {
    program: String,
}

impl YtDlpTitleResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl TitleResolver for YtDlpTitleResolver {
    async fn resolve(&self, video_id: &str) -> Result<String> {
        let mut cmd = process_utils::tokio_command(&self.program);
        cmd.args(["--skip-download", "--no-warnings", "--print", "title"])
            .arg(watch_url(video_id));

        let output = process_utils::run_captured(&self.program, cmd)
            .await
            .map_err(|e| Error::retrieval(format!("Failed to look up title of {video_id}: {e}")))?;

        let title = output.stdout.lines().next().unwrap_or_default().trim();
        if title.is_empty() {
            return Err(Error::retrieval(format!("no title reported for {video_id}")));
        }
        Ok(title.to_string())
    }
}
