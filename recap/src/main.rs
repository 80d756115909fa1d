use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use recap::config::AppConfig;
use recap::library::Library;
use recap::logging;
use recap::pipeline::stages::{OllamaClient, TitleResolver, YtDlpTitleResolver};
use recap::pipeline::{Job, JobParams, Scheduler, SchedulerEvent, StageSet};
use recap::utils::url::extract_video_id;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe and summarize videos, one at a time
    Run {
        /// Video URLs or ids
        #[arg(required = true)]
        videos: Vec<String>,

        /// Spoken language
        #[arg(short, long)]
        language: Option<String>,

        /// Speech-to-text model
        #[arg(short, long)]
        model: Option<String>,

        /// Ollama model used for summaries
        #[arg(long)]
        summary_model: Option<String>,

        /// Characters per summarization chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared by consecutive chunks
        #[arg(long)]
        overlap: Option<usize>,

        /// Skip the short form
        #[arg(long)]
        no_abstract: bool,
    },

    /// List processed videos
    Library,

    /// Print the stored summary of a video
    Show {
        /// Video URL or id
        video: String,

        /// Print the short form instead
        #[arg(long)]
        short: bool,
    },

    /// List models available on the Ollama server
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard =
        logging::init_logging(config.log_dir.as_deref()).context("Failed to initialize logging")?;
    info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    match args.command {
        Commands::Run {
            videos,
            language,
            model,
            summary_model,
            chunk_size,
            overlap,
            no_abstract,
        } => {
            let mut params = config.defaults.clone();
            if let Some(language) = language {
                params.language = language;
            }
            if let Some(model) = model {
                params.transcription_model = model;
            }
            if let Some(summary_model) = summary_model {
                params.summary_model = summary_model;
            }
            if let Some(chunk_size) = chunk_size {
                params.chunk_size = chunk_size;
            }
            if let Some(overlap) = overlap {
                params.overlap = overlap;
            }
            if no_abstract {
                params.short_form = false;
            }
            config
                .check_params(&params)
                .context("Invalid job parameters")?;

            run(&config, videos, params).await
        }
        Commands::Library => {
            let library = Library::new(config.storage());
            let entries = library.entries().await?;
            if entries.is_empty() {
                println!("No processed videos yet.");
            }
            for entry in entries {
                let marker = if entry.has_abstract { "*" } else { " " };
                println!("{} {}  {}", marker, entry.video_id, entry.title);
            }
            Ok(())
        }
        Commands::Show { video, short } => {
            let video_id = extract_video_id(&video);
            let artifacts = Library::new(config.storage()).artifacts(&video_id).await?;
            let text = if short {
                artifacts.short_form
            } else {
                artifacts.summary
            };
            match text {
                Some(text) => println!("{}", text),
                None => anyhow::bail!("Nothing stored for {}", video_id),
            }
            Ok(())
        }
        Commands::Models => {
            let client = OllamaClient::new(&config.ollama.host)?;
            let models = client
                .list_models()
                .await
                .with_context(|| format!("Failed to list models on {}", config.ollama.host))?;
            for model in models {
                println!("{}", model);
            }
            Ok(())
        }
    }
}

async fn run(config: &AppConfig, videos: Vec<String>, params: JobParams) -> anyhow::Result<()> {
    let stages = StageSet::from_config(config)?;
    let scheduler = Scheduler::with_config(stages, config.scheduler.clone());

    scheduler.observe(|event| match event {
        SchedulerEvent::StatusChanged { job_id, status } => {
            info!(job_id = %job_id, "{}", status)
        }
        SchedulerEvent::JobCancelled { job_id } => warn!(job_id = %job_id, "Cancelled"),
        _ => {}
    });

    let titles = YtDlpTitleResolver::new(&config.ytdlp.program);
    for video in videos {
        let video_id = extract_video_id(&video);
        let title = match titles.resolve(&video_id).await {
            Ok(title) => title,
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "Could not resolve title, using the id");
                video_id.clone()
            }
        };
        scheduler.submit(Job::new(video_id, title).with_params(params.clone()));
    }

    scheduler.enable();

    tokio::select! {
        _ = scheduler.wait_for_drain() => {
            info!("All jobs processed");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            warn!("Interrupted, cancelling current job");
            scheduler.cancel_current();
            let dropped = scheduler.clear();
            if dropped > 0 {
                warn!(dropped, "Discarded queued jobs");
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
