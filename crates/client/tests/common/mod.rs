//! In-process mock of the inference backend.
//!
//! Serves the two HTTP endpoints and the three WebSocket channels on
//! `127.0.0.1:0`, replays a scripted sequence of frames per channel, and
//! records everything the client sent.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use moodscan_core::config::BackendConfig;
use tokio::sync::Mutex;

/// One scripted server action on a WebSocket channel.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a text frame.
    Text(String),
    /// Pause before the next step.
    Sleep(u64),
    /// Send a close frame and end the handler.
    Close,
    /// Drop the socket without a closing handshake.
    Drop,
}

pub fn text(s: &str) -> Step {
    Step::Text(s.to_string())
}

/// What the mock answers on each endpoint. Once a channel's steps run out
/// the socket is held open until the client closes it.
#[derive(Debug, Clone)]
pub struct Script {
    pub recognize: (StatusCode, serde_json::Value),
    pub process_video: (StatusCode, Vec<u8>),
    pub stream: Vec<Step>,
    pub youtube: Vec<Step>,
    pub webcam: Vec<Step>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            recognize: (StatusCode::OK, serde_json::json!({"emotion": "happy"})),
            process_video: (StatusCode::OK, b"processed-video-bytes".to_vec()),
            stream: Vec::new(),
            youtube: Vec::new(),
            webcam: Vec::new(),
        }
    }
}

/// A multipart field the mock received.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub len: usize,
}

/// A frame the client sent on the processing channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(usize),
}

#[derive(Debug, Default)]
pub struct Log {
    pub uploads: Vec<ReceivedFile>,
    pub stream_frames: Vec<Frame>,
    pub stream_connections: usize,
    pub live_commands: Vec<serde_json::Value>,
    /// Set once the client closed a channel the mock was holding open.
    pub client_closed: bool,
}

#[derive(Clone)]
struct AppState {
    script: Arc<Script>,
    log: Arc<Mutex<Log>>,
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub log: Arc<Mutex<Log>>,
}

impl MockBackend {
    pub async fn spawn(script: Script) -> Self {
        let log = Arc::new(Mutex::new(Log::default()));
        let state = AppState {
            script: Arc::new(script),
            log: Arc::clone(&log),
        };

        let app = Router::new()
            .route("/recognize/", post(recognize))
            .route("/process-video/", post(process_video))
            .route("/ws/process-video", get(process_ws))
            .route("/ws/youtube", get(youtube_ws))
            .route("/ws", get(webcam_ws))
            .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, log }
    }

    /// Client configuration pointing at this mock.
    pub fn config(&self, download_dir: &Path) -> BackendConfig {
        let mut config = BackendConfig::new(&format!("http://{}", self.addr)).unwrap();
        config.stall_timeout = Some(Duration::from_secs(5));
        config.request_timeout = Duration::from_secs(10);
        config.chunk_size = 64 * 1024;
        config.download_dir = download_dir.to_path_buf();
        config
    }
}

/// Poll `check` against the log until it holds or a second passes.
pub async fn eventually<F>(log: &Arc<Mutex<Log>>, check: F) -> bool
where
    F: Fn(&Log) -> bool,
{
    for _ in 0..100 {
        if check(&*log.lock().await) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn recognize(State(app): State<AppState>, multipart: Multipart) -> Response {
    record_multipart(&app, multipart).await;
    let (status, body) = app.script.recognize.clone();
    (status, Json(body)).into_response()
}

async fn process_video(State(app): State<AppState>, multipart: Multipart) -> Response {
    record_multipart(&app, multipart).await;
    let (status, body) = app.script.process_video.clone();
    if status.is_success() {
        (
            status,
            [
                (header::CONTENT_TYPE, "video/mp4"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"processed_clip.mp4\"",
                ),
            ],
            body,
        )
            .into_response()
    } else {
        (status, "processing exploded").into_response()
    }
}

async fn record_multipart(app: &AppState, mut multipart: Multipart) {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        app.log.lock().await.uploads.push(ReceivedFile {
            field: name,
            file_name,
            content_type,
            len,
        });
    }
}

// ---------------------------------------------------------------------------
// WebSocket handlers
// ---------------------------------------------------------------------------

async fn process_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_process(socket, app))
}

async fn youtube_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_youtube(socket, app))
}

async fn webcam_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_webcam(socket, app))
}

async fn run_process(mut socket: WebSocket, app: AppState) {
    app.log.lock().await.stream_connections += 1;

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(t) => {
                let end = t.as_str() == "end";
                app.log
                    .lock()
                    .await
                    .stream_frames
                    .push(Frame::Text(t.as_str().to_string()));
                if end {
                    break;
                }
            }
            Message::Binary(b) => {
                app.log.lock().await.stream_frames.push(Frame::Binary(b.len()));
            }
            Message::Close(_) => {
                app.log.lock().await.client_closed = true;
                return;
            }
            _ => {}
        }
    }

    play(&mut socket, &app, &app.script.stream).await;
}

async fn run_youtube(mut socket: WebSocket, app: AppState) {
    match socket.recv().await {
        Some(Ok(Message::Text(t))) => {
            let command = serde_json::from_str(t.as_str()).unwrap_or(serde_json::Value::Null);
            app.log.lock().await.live_commands.push(command);
        }
        _ => return,
    }
    play(&mut socket, &app, &app.script.youtube).await;
}

async fn run_webcam(mut socket: WebSocket, app: AppState) {
    play(&mut socket, &app, &app.script.webcam).await;
}

async fn play(socket: &mut WebSocket, app: &AppState, steps: &[Step]) {
    for step in steps {
        match step {
            Step::Text(t) => {
                if socket.send(Message::Text(t.clone().into())).await.is_err() {
                    return;
                }
            }
            Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
            Step::Close => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            Step::Drop => return,
        }
    }
    hold(socket, app).await;
}

/// Keep the socket open, recording late client commands, until the client
/// closes it.
async fn hold(socket: &mut WebSocket, app: &AppState) {
    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(t)) => {
                let command = serde_json::from_str(t.as_str())
                    .unwrap_or_else(|_| serde_json::Value::String(t.as_str().to_string()));
                app.log.lock().await.live_commands.push(command);
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    app.log.lock().await.client_closed = true;
}
