//! recap: queue-driven video transcription and summarization.
//!
//! Submitted videos are queued and processed one at a time: the audio is
//! fetched, transcribed, summarized (with an optional short form) and the
//! result recorded in an index of processed videos.

pub mod config;
pub mod error;
pub mod library;
pub mod logging;
pub mod pipeline;
pub mod utils;

pub use error::{Error, Result};
