//! Application configuration.
//!
//! Configuration is read from an optional JSON file (every field has a
//! default) and then overridden from the environment. A `.env` file in the
//! working directory is honored.

mod paths;

pub use paths::StoragePaths;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::pipeline::{JobParams, SchedulerConfig};
use crate::{Error, Result};

/// Environment variable overriding [`AppConfig::data_dir`].
pub const ENV_DATA_DIR: &str = "RECAP_DATA_DIR";
/// Environment variable overriding [`AppConfig::log_dir`].
pub const ENV_LOG_DIR: &str = "RECAP_LOG_DIR";
/// Environment variable overriding [`OllamaConfig::host`].
pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";
/// Environment variable overriding [`YtDlpConfig::program`].
pub const ENV_YTDLP: &str = "RECAP_YTDLP";
/// Environment variable overriding [`WhisperConfig::program`].
pub const ENV_WHISPER: &str = "RECAP_WHISPER";

/// Speech-to-text tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// Whisper-compatible CLI to invoke.
    pub program: String,
    /// Models offered to submitters; the first one is the default.
    pub models: Vec<String>,
    /// Languages offered to submitters.
    pub languages: Vec<String>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            program: "whisper".to_string(),
            models: vec!["openai/whisper-large-v3".to_string()],
            languages: vec!["en".to_string()],
        }
    }
}

/// Downloader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YtDlpConfig {
    pub program: String,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
        }
    }
}

/// Ollama server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the Ollama HTTP API.
    pub host: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:11434".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory for audio, transcripts, summaries and the mapping index.
    pub data_dir: PathBuf,
    /// Directory for rotated log files. Console-only logging when unset.
    pub log_dir: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    /// Parameters applied to submitted jobs unless overridden.
    pub defaults: JobParams,
    pub whisper: WhisperConfig,
    pub ytdlp: YtDlpConfig,
    pub ollama: OllamaConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            log_dir: None,
            scheduler: SchedulerConfig::default(),
            defaults: JobParams::default(),
            whisper: WhisperConfig::default(),
            ytdlp: YtDlpConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (if given), apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io_path("reading config file", path, e))?;
        Self::from_json(&raw)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            debug!(data_dir = %dir, "Data directory overridden from environment");
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(host) = lookup(ENV_OLLAMA_HOST) {
            self.ollama.host = normalize_host(&host);
        }
        if let Some(program) = lookup(ENV_YTDLP) {
            self.ytdlp.program = program;
        }
        if let Some(program) = lookup(ENV_WHISPER) {
            self.whisper.program = program;
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.worker_pool.max_workers == 0 {
            return Err(Error::config("scheduler.worker_pool.max_workers must be at least 1"));
        }
        self.defaults
            .validate()
            .map_err(|e| Error::config(format!("defaults: {e}")))?;
        if self.whisper.models.is_empty() {
            return Err(Error::config("whisper.models must not be empty"));
        }
        if self.whisper.languages.is_empty() {
            return Err(Error::config("whisper.languages must not be empty"));
        }
        self.check_params(&self.defaults)
            .map_err(|e| Error::config(format!("defaults: {e}")))?;
        if self.ollama.host.is_empty() {
            return Err(Error::config("ollama.host must not be empty"));
        }
        Ok(())
    }

    /// Check job parameters against the configured model and language choices.
    pub fn check_params(&self, params: &JobParams) -> Result<()> {
        params.validate()?;
        if !self.whisper.models.contains(&params.transcription_model) {
            return Err(Error::validation(format!(
                "unknown transcription model '{}' (available: {})",
                params.transcription_model,
                self.whisper.models.join(", ")
            )));
        }
        if !self.whisper.languages.contains(&params.language) {
            return Err(Error::validation(format!(
                "unsupported language '{}' (available: {})",
                params.language,
                self.whisper.languages.join(", ")
            )));
        }
        Ok(())
    }

    /// On-disk layout derived from [`AppConfig::data_dir`].
    pub fn storage(&self) -> StoragePaths {
        StoragePaths::new(&self.data_dir)
    }
}

/// `OLLAMA_HOST` is commonly given without a scheme (`0.0.0.0:11434`).
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.worker_pool.max_workers, 1);
        assert_eq!(config.defaults.chunk_size, 6000);
        assert_eq!(config.defaults.overlap, 500);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "data_dir": "/srv/recap",
                "defaults": {
                    "language": "de",
                    "transcription_model": "openai/whisper-small",
                    "chunk_size": 4000
                },
                "whisper": {
                    "models": ["openai/whisper-small"],
                    "languages": ["en", "de"]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/recap"));
        assert_eq!(config.defaults.language, "de");
        assert_eq!(config.defaults.chunk_size, 4000);
        assert_eq!(config.defaults.overlap, 500);
        assert_eq!(config.whisper.models, vec!["openai/whisper-small"]);
        assert_eq!(config.whisper.program, "whisper");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            ENV_DATA_DIR => Some("/data".to_string()),
            ENV_OLLAMA_HOST => Some("0.0.0.0:11434/".to_string()),
            _ => None,
        });

        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.ollama.host, "http://0.0.0.0:11434");
        assert_eq!(config.ytdlp.program, "yt-dlp");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = AppConfig::default();
        config.defaults.overlap = config.defaults.chunk_size;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_default_model_must_be_offered() {
        let config = AppConfig::from_json(r#"{ "whisper": { "models": ["openai/whisper-small"] } }"#)
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("openai/whisper-small"));
    }

    #[test]
    fn test_check_params_rejects_unknown_choices() {
        let config = AppConfig::default();
        assert!(config.check_params(&config.defaults).is_ok());

        let mut params = config.defaults.clone();
        params.language = "xx".to_string();
        let err = config.check_params(&params).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("xx"));

        let mut params = config.defaults.clone();
        params.transcription_model = "tiny".to_string();
        assert!(matches!(config.check_params(&params), Err(Error::Validation(_))));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.worker_pool.max_workers = 0;
        assert!(config.validate().is_err());
    }
}
