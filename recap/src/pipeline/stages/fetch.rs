//! Audio retrieval through yt-dlp.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use super::Fetcher;
use crate::config::StoragePaths;
use crate::utils::{fs, url::watch_url};
use crate::{Error, Result};

/// Downloads the audio track of a video as `audio/<id>.m4a`.
pub struct YtDlpFetcher {
    program: String,
    storage: StoragePaths,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>, storage: StoragePaths) -> Self {
        Self {
            program: program.into(),
            storage,
        }
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(&self, video_id: &str) -> Result<PathBuf> {
        let target = self.storage.audio_file(video_id);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            info!(video_id, path = %target.display(), "Audio already downloaded");
            return Ok(target);
        }

        let audio_dir = self.storage.audio_dir();
        fs::ensure_dir_all_with_op("creating audio directory", &audio_dir).await?;

        let mut cmd = process_utils::tokio_command(&self.program);
        cmd.args(["-f", "m4a/bestaudio/best", "-x", "--audio-format", "m4a"])
            .arg("-P")
            .arg(&audio_dir)
            .args(["-o", "%(id)s.%(ext)s"])
            .arg(watch_url(video_id));

        debug!(video_id, program = %self.program, "Downloading audio");
        process_utils::run_captured(&self.program, cmd)
            .await
            .map_err(|e| Error::retrieval(format!("Failed to download video: {e}")))?;

        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(Error::retrieval(format!(
                "{} finished but {} is missing",
                self.program,
                target.display()
            )));
        }
        Ok(target)
    }
}
