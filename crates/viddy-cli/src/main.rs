//! ViddyScribe command-line client.
//!
//! Uploads a video, follows the job until it finishes and downloads the
//! audio-described result next to the working directory.

mod download;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use viddy_backend::{BackendClient, BackendConfig, WsTransport};
use viddy_models::{Job, JobPhase, JobState, UploadFile, UploadOptions};
use viddy_tracker::{FileStore, Session, TrackerConfig, TrackerError};

#[derive(Parser)]
#[command(name = "viddyscribe")]
#[command(about = "Add audio descriptions to a video", long_about = None)]
struct Args {
    /// Video file to upload
    file: PathBuf,

    /// Mix background music into the narrated output
    #[arg(long)]
    bg_music: bool,

    /// Where to save the result (defaults to <name>_with_audio_desc.<ext>)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Print the result URL instead of downloading it
    #[arg(long)]
    no_download: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,viddy=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let backend_config = BackendConfig::from_env().context("loading backend configuration")?;
    let tracker_config = TrackerConfig::from_env();
    info!(
        backend = %backend_config.base_url,
        realtime = %backend_config.realtime_url,
        "Starting viddyscribe"
    );

    let name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("input path has no file name")?;
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;

    let backend = Arc::new(BackendClient::new(backend_config.clone())?);
    let realtime = Arc::new(WsTransport::new(backend_config));
    let store = Arc::new(FileStore::new(tracker_config.client_store_path.clone()));
    let session = Arc::new(Session::new(backend, realtime, store, tracker_config));

    let printer = tokio::spawn(print_progress(session.subscribe()));

    let options = UploadOptions {
        add_bg_music: args.bg_music,
    };
    let submit = session.submit(UploadFile::new(name, bytes), options);
    let job_id = tokio::select! {
        result = submit => result?,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            return Ok(ExitCode::from(130));
        }
    };
    println!("Submitted {}", job_id);

    let job = tokio::select! {
        job = wait_for_terminal(session.subscribe()) => job,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling job");
            session.cancel();
            session.join_tracking().await;
            return Ok(ExitCode::from(130));
        }
    };
    printer.abort();

    let Some(job) = job else {
        anyhow::bail!("job state closed before the job finished");
    };

    match &job.state {
        JobState::Completed { .. } => {}
        JobState::Error { message, .. } => {
            eprintln!("Processing failed: {}", message);
            return Ok(ExitCode::FAILURE);
        }
        JobState::Cancelled => return Ok(ExitCode::from(130)),
        other => anyhow::bail!("unexpected job state {:?}", other),
    }

    let url = match session.retrieve_result().await {
        Ok(url) => url,
        Err(e @ TrackerError::Retrieval(_)) => {
            eprintln!("The video was processed, but its download link is not ready: {}", e);
            eprintln!("Try again later with the job id {}", job.id);
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    if args.no_download {
        println!("{}", url);
        return Ok(ExitCode::SUCCESS);
    }

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(job.id.download_file_name()));
    let written = download::download_to(&reqwest::Client::new(), &url, &output).await?;
    println!("Saved {} ({} bytes)", output.display(), written);
    Ok(ExitCode::SUCCESS)
}

/// Resolve with the job once it reaches a terminal phase.
async fn wait_for_terminal(mut rx: watch::Receiver<Option<Job>>) -> Option<Job> {
    let job = rx
        .wait_for(|job| job.as_ref().is_some_and(Job::is_terminal))
        .await
        .ok()?;
    job.clone()
}

async fn print_progress(mut rx: watch::Receiver<Option<Job>>) {
    let mut last: Option<(JobPhase, Option<String>)> = None;
    loop {
        let current = rx.borrow_and_update().as_ref().map(|job| {
            (job.phase(), job.status_text().map(str::to_string))
        });
        if let Some(current) = current {
            if last.as_ref() != Some(&current) {
                match &current.1 {
                    Some(text) => eprintln!("[{}] {}", current.0, text),
                    None => eprintln!("[{}]", current.0),
                }
                last = Some(current);
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
