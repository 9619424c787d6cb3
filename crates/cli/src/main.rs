//! `moodscan` -- command-line front end for the emotion-detection backend.
//!
//! Each subcommand drives one client surface: single-image recognition,
//! video processing (request/response or streamed with progress), and the
//! two live panels.
//!
//! # Environment variables
//!
//! | Variable               | Default                  |
//! |------------------------|--------------------------|
//! | `BACKEND_URL`          | `http://localhost:8000`  |
//! | `PROCESSING_WS_PATH`   | `/ws/process-video`      |
//! | `REQUEST_TIMEOUT_SECS` | `120`                    |
//! | `STALL_TIMEOUT_SECS`   | `60` (`0` disables)      |
//! | `UPLOAD_CHUNK_BYTES`   | `1048576`                |
//! | `MESSAGE_FRAMING`      | `tagged` or `legacy`     |
//! | `DOWNLOAD_DIR`         | system temp dir          |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use moodscan_client::live::LiveSession;
use moodscan_client::runner::TaskClient;
use moodscan_core::config::{ws_origin_for, BackendConfig};
use moodscan_core::framing::Framing;
use moodscan_core::live::LiveState;
use moodscan_core::media::{declared_type_for_path, MediaCategory};
use moodscan_core::task::{DeliveryMode, Submission, TaskState};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "moodscan", version, about = "Emotion detection client")]
struct Cli {
    /// Backend origin, overrides `BACKEND_URL`.
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Processing channel framing, overrides `MESSAGE_FRAMING`.
    #[arg(long, global = true)]
    framing: Option<Framing>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the emotion on a single image.
    Recognize { file: PathBuf },

    /// Annotate a video with per-frame emotions.
    ProcessVideo {
        file: PathBuf,
        /// Upload over the processing channel and report progress.
        #[arg(long)]
        stream: bool,
    },

    /// Follow a YouTube video or live stream.
    Youtube {
        /// Video id or YouTube URL.
        video: String,
        /// Write each received frame as a JPEG into this directory.
        #[arg(long)]
        frames_dir: Option<PathBuf>,
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Follow the backend host's webcam.
    Webcam {
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moodscan=info,moodscan_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = BackendConfig::from_env().context("invalid configuration")?;
    if let Some(url) = &cli.backend_url {
        let origin = url.trim().trim_end_matches('/').to_string();
        config.ws_origin = ws_origin_for(&origin).context("invalid --backend-url")?;
        config.http_origin = origin;
    }
    if let Some(framing) = cli.framing {
        config.framing = framing;
    }

    tracing::info!(
        backend = %config.http_origin,
        framing = config.framing.as_str(),
        "Starting moodscan",
    );

    match cli.command {
        Commands::Recognize { file } => {
            let client = TaskClient::new(config, MediaCategory::Image)?;
            run_task(&client, &file, DeliveryMode::RequestResponse).await
        }
        Commands::ProcessVideo { file, stream } => {
            let client = TaskClient::new(config, MediaCategory::Video)?;
            let mode = if stream {
                DeliveryMode::Streaming
            } else {
                DeliveryMode::RequestResponse
            };
            run_task(&client, &file, mode).await
        }
        Commands::Youtube {
            video,
            frames_dir,
            duration,
        } => {
            let session = LiveSession::start_youtube(&config, &video).await?;
            follow_live(&session, frames_dir.as_deref(), duration).await
        }
        Commands::Webcam { duration } => {
            let session = LiveSession::start_webcam(&config).await?;
            follow_live(&session, None, duration).await
        }
    }
}

/// Select `path`, submit it in `mode` and report until the task ends or
/// Ctrl-C cancels it.
async fn run_task(client: &TaskClient, path: &Path, mode: DeliveryMode) -> Result<()> {
    let payload = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut submission = Submission::new(payload, declared_type_for_path(path));
    if let Some(name) = path.file_name() {
        submission = submission.with_file_name(name.to_string_lossy());
    }

    client.select_artifact(submission).await?;

    let mut events = client.subscribe();
    client.submit(mode).await?;

    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let TaskState::InProgress(percent) = event.state {
                        println!("progress: {percent:.0}%");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress reporter lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let state = tokio::select! {
        state = client.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            client.cancel().await;
            client.state().await
        }
    };
    reporter.abort();

    match state {
        TaskState::Completed(result) => {
            println!("{}", result.resolve(&client.config().http_origin));
            Ok(())
        }
        TaskState::Failed(error) => bail!("{error}"),
        other => {
            println!("{other}");
            Ok(())
        }
    }
}

/// Print live updates until the session ends, the duration elapses or
/// Ctrl-C is pressed.
async fn follow_live(
    session: &LiveSession,
    frames_dir: Option<&Path>,
    duration: Option<u64>,
) -> Result<()> {
    if let Some(dir) = frames_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut updates = session.subscribe();
    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut frame_count: u64 = 0;
    let mut last_emotion: Option<String> = None;
    let mut last_frame: Option<Vec<u8>> = None;
    let mut last_error: Option<String> = None;

    // The session may already have ended before we subscribed.
    while session.state().await.running {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => {
                let state = match update {
                    Ok(update) => update.state,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                if state.emotion != last_emotion {
                    if let Some(emotion) = &state.emotion {
                        println!("emotion: {emotion}");
                    }
                    last_emotion = state.emotion.clone();
                }
                if state.error != last_error {
                    if let Some(error) = &state.error {
                        eprintln!("error: {error}");
                    }
                    last_error = state.error.clone();
                }
                if let (Some(dir), Some(frame)) = (frames_dir, &state.frame) {
                    if last_frame.as_ref() != Some(frame) {
                        frame_count += 1;
                        let path = dir.join(format!("frame_{frame_count:06}.jpg"));
                        tokio::fs::write(&path, frame)
                            .await
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        last_frame = Some(frame.clone());
                    }
                }
                if !state.running {
                    break;
                }
            }
        }
    }

    let ended_by_backend = !session.state().await.running;
    session.stop().await;
    report_live_end(&session.state().await, ended_by_backend)
}

/// Per-frame errors still showing when the user stops are not failures.
fn report_live_end(state: &LiveState, ended_by_backend: bool) -> Result<()> {
    match &state.error {
        Some(error) if ended_by_backend => bail!("{error}"),
        _ => {
            println!("stopped");
            Ok(())
        }
    }
}
