//! Live panel sessions (YouTube live and webcam).
//!
//! A [`LiveSession`] owns exactly one channel. A reader task folds pushed
//! frames into a [`LiveState`] and broadcasts a [`LiveUpdate`] on every
//! visible change. [`LiveSession::stop`] closes the channel and is safe to
//! call more than once.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use moodscan_core::config::BackendConfig;
use moodscan_core::live::{parse_video_id, LiveCommand, LiveEvent, LiveState, VideoIdError};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::{ChannelClient, ChannelError, WsStream};
use crate::events::{LiveUpdate, EVENT_CHANNEL_CAPACITY};

/// How long `stop` waits for the reader to observe the close.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Which live feed a session is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveSource {
    /// A YouTube video or live stream analysed by the backend.
    Youtube { video_id: String },
    /// The backend host's webcam.
    Webcam,
}

/// Errors starting a live session.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error(transparent)]
    InvalidVideo(#[from] VideoIdError),

    #[error("WebSocket connection failed: {}", connection_cause(.0))]
    Connection(#[from] ChannelError),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The underlying cause without the channel layer's own prefix.
fn connection_cause(err: &ChannelError) -> &str {
    match err {
        ChannelError::Connection(cause) | ChannelError::Protocol(cause) => cause,
        ChannelError::Closed => "connection closed",
    }
}

type Sink = SplitSink<WsStream, Message>;

/// One running live panel.
pub struct LiveSession {
    source: LiveSource,
    state: Arc<Mutex<LiveState>>,
    sink: Mutex<Option<Sink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    update_tx: broadcast::Sender<LiveUpdate>,
}

impl LiveSession {
    /// Validate `video` (bare id or YouTube URL), open the YouTube channel
    /// and send the start command. Nothing is contacted if the id is
    /// invalid.
    pub async fn start_youtube(config: &BackendConfig, video: &str) -> Result<Self, LiveError> {
        let video_id = parse_video_id(video)?;
        let source = LiveSource::Youtube {
            video_id: video_id.clone(),
        };
        let session = Self::open(ChannelClient::new(config.youtube_ws_url()), source).await?;

        let start = serde_json::to_string(&LiveCommand::Start {
            video_id: video_id.clone(),
        })?;
        if let Err(e) = session.send_text(start).await {
            session.stop().await;
            return Err(e.into());
        }

        tracing::info!(video_id = %video_id, "YouTube live session started");
        Ok(session)
    }

    /// Open the receive-only webcam channel.
    pub async fn start_webcam(config: &BackendConfig) -> Result<Self, LiveError> {
        let session = Self::open(ChannelClient::new(config.webcam_ws_url()), LiveSource::Webcam).await?;
        tracing::info!("Webcam live session started");
        Ok(session)
    }

    pub fn source(&self) -> &LiveSource {
        &self.source
    }

    /// Subscribe to live panel changes.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveUpdate> {
        self.update_tx.subscribe()
    }

    /// Current panel snapshot.
    pub async fn state(&self) -> LiveState {
        self.state.lock().await.clone()
    }

    /// Send the stop command (YouTube only) and close the channel.
    pub async fn stop(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if matches!(self.source, LiveSource::Youtube { .. }) {
                match serde_json::to_string(&LiveCommand::Stop) {
                    Ok(stop) => {
                        if let Err(e) = sink.send(Message::Text(stop)).await {
                            tracing::debug!(error = %e, "Stop command not delivered");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to encode stop command"),
                }
            }
            let _ = sink.close().await;
            tracing::info!(source = ?self.source, "Live session stopped");
        }

        if let Some(mut handle) = self.reader.lock().await.take() {
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        let mut state = self.state.lock().await;
        if state.running {
            state.mark_stopped();
            let _ = self.update_tx.send(LiveUpdate::new(state.clone()));
        }
    }

    /// Wait until the channel ends on its own (server close or error).
    pub async fn wait(&self) -> LiveState {
        let handle = self.reader.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Live reader panicked");
            }
        }
        self.state().await
    }

    // ---- private helpers ----

    async fn open(client: ChannelClient, source: LiveSource) -> Result<Self, LiveError> {
        let conn = client.connect().await?;
        let (sink, stream) = conn.ws_stream.split();

        let (update_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(LiveState::started()));

        let reader = tokio::spawn(read_loop(
            stream,
            source.clone(),
            Arc::clone(&state),
            update_tx.clone(),
        ));

        Ok(Self {
            source,
            state,
            sink: Mutex::new(Some(sink)),
            reader: Mutex::new(Some(reader)),
            update_tx,
        })
    }

    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(ChannelError::Closed);
        };
        sink.send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::Protocol(e.to_string()))
    }
}

/// Fold inbound frames into the shared state until the channel ends or the
/// backend reports an error.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    source: LiveSource,
    state: Arc<Mutex<LiveState>>,
    update_tx: broadcast::Sender<LiveUpdate>,
) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Live channel closed by peer");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Live channel receive error");
                break;
            }
        };

        let event = match source {
            LiveSource::Youtube { .. } => match LiveEvent::parse(&text) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, raw_message = %text, "Failed to parse live event");
                    continue;
                }
            },
            LiveSource::Webcam => match LiveEvent::from_webcam_text(&text) {
                Some(event) => event,
                None => continue,
            },
        };

        let mut current = state.lock().await;
        if current.apply(event) {
            if let Some(emotion) = &current.emotion {
                tracing::debug!(emotion = %emotion, "Live emotion");
            }
            let _ = update_tx.send(LiveUpdate::new(current.clone()));
        }
        if !current.running {
            tracing::warn!(error = ?current.error, "Live session ended by backend error");
            break;
        }
    }

    let mut current = state.lock().await;
    if current.running {
        current.mark_stopped();
        let _ = update_tx.send(LiveUpdate::new(current.clone()));
    }
}
