//! Speech-to-text through a whisper-compatible CLI.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::Transcriber;
use crate::config::StoragePaths;
use crate::utils::fs;
use crate::{Error, Result};

/// Model selectors may be given as Hugging Face ids.
const MODEL_PREFIX: &str = "openai/whisper-";

/// Filesystem failures inside this stage fail the job as a transcription error.
fn stage_error(e: Error) -> Error {
    Error::transcription(e.to_string())
}

/// Transcribes `audio/<id>.m4a` and caches the text in `transcripts/<id>.txt`.
pub struct WhisperTranscriber {
    program: String,
    storage: StoragePaths,
}

impl WhisperTranscriber {
    pub fn new(program: impl Into<String>, storage: StoragePaths) -> Self {
        Self {
            program: program.into(),
            storage,
        }
    }

    /// `openai/whisper-large-v3` -> `large-v3`.
    fn cli_model(model: &str) -> &str {
        model.strip_prefix(MODEL_PREFIX).unwrap_or(model)
    }

    fn scratch_dir(&self, video_id: &str) -> PathBuf {
        self.storage
            .transcript_file(video_id)
            .with_file_name(format!(".work-{video_id}"))
    }

    async fn run_whisper(
        &self,
        audio: &Path,
        scratch: &Path,
        model: &str,
        language: &str,
    ) -> Result<String> {
        fs::ensure_dir_all_with_op("creating transcription scratch directory", scratch)
            .await
            .map_err(stage_error)?;

        let mut cmd = process_utils::tokio_command(&self.program);
        cmd.arg(audio)
            .args(["--model", Self::cli_model(model)])
            .args(["--language", language])
            .args(["--output_format", "txt"])
            .arg("--output_dir")
            .arg(scratch);

        process_utils::run_captured(&self.program, cmd)
            .await
            .map_err(|e| Error::transcription(e.to_string()))?;

        let stem = audio.file_stem().unwrap_or(audio.as_os_str());
        let output = scratch.join(stem).with_extension("txt");
        match fs::read_to_string_if_exists("reading transcription output", &output)
            .await
            .map_err(stage_error)?
        {
            Some(text) => Ok(text.trim().to_string()),
            None => Err(Error::transcription(format!(
                "{} produced no transcript at {}",
                self.program,
                output.display()
            ))),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, video_id: &str, model: &str, language: &str) -> Result<String> {
        let cache = self.storage.transcript_file(video_id);
        if let Some(text) = fs::read_to_string_if_exists("reading transcript", &cache)
            .await
            .map_err(stage_error)?
        {
            info!(video_id, "Loading existing transcript");
            return Ok(text);
        }

        let audio = self.storage.audio_file(video_id);
        if !tokio::fs::try_exists(&audio).await.unwrap_or(false) {
            return Err(Error::transcription(format!(
                "audio file {} not found",
                audio.display()
            )));
        }

        info!(video_id, model, language, "Transcribing audio");
        let scratch = self.scratch_dir(video_id);
        let result = self.run_whisper(&audio, &scratch, model, language).await;
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %scratch.display(), error = %e, "Failed to remove scratch directory");
        }
        let text = result?;

        fs::write_atomic("writing transcript", &cache, text.as_bytes())
            .await
            .map_err(stage_error)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hugging_face_prefix() {
        assert_eq!(WhisperTranscriber::cli_model("openai/whisper-large-v3"), "large-v3");
        assert_eq!(WhisperTranscriber::cli_model("medium"), "medium");
    }

    #[tokio::test]
    async fn cached_transcript_is_returned_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StoragePaths::new(dir.path());
        let cache = storage.transcript_file("abc");
        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        std::fs::write(&cache, "hello world").unwrap();

        let transcriber = WhisperTranscriber::new("/nonexistent/whisper", storage);
        let text = transcriber.transcribe("abc", "large-v3", "en").await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn missing_audio_is_a_transcription_error() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = WhisperTranscriber::new("whisper", StoragePaths::new(dir.path()));

        let err = transcriber.transcribe("abc", "large-v3", "en").await.unwrap_err();
        assert!(matches!(err, Error::Transcription(_)));
    }

    #[tokio::test]
    async fn unreadable_cache_is_a_transcription_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StoragePaths::new(dir.path());
        // A directory where the cached transcript should be cannot be read as text.
        std::fs::create_dir_all(storage.transcript_file("abc")).unwrap();

        let transcriber = WhisperTranscriber::new("/nonexistent/whisper", storage);
        let err = transcriber.transcribe("abc", "large-v3", "en").await.unwrap_err();
        let Error::Transcription(message) = err else {
            panic!("expected a transcription error, got {err:?}");
        };
        assert!(message.contains("reading transcript"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transcript_from_cli_output_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StoragePaths::new(dir.path());
        std::fs::create_dir_all(storage.audio_dir()).unwrap();
        std::fs::write(storage.audio_file("abc"), b"audio").unwrap();

        // Stand-in CLI: writes "<stem>.txt" into the directory after --output_dir.
        let script = dir.path().join("fake-whisper.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--output_dir\" ]; then out=\"$2\"; fi\n  shift\ndone\necho ' spoken words ' > \"$out/abc.txt\"\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transcriber = WhisperTranscriber::new(script.to_string_lossy(), storage.clone());
        let text = transcriber
            .transcribe("abc", "openai/whisper-large-v3", "en")
            .await
            .unwrap();

        assert_eq!(text, "spoken words");
        assert_eq!(
            std::fs::read_to_string(storage.transcript_file("abc")).unwrap(),
            "spoken words"
        );
        assert!(!transcriber.scratch_dir("abc").exists());
    }
}
