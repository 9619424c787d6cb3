//! WebSocket channels to the backend.
//!
//! [`ChannelClient`] holds the URL of one channel endpoint. Call
//! [`ChannelClient::connect`] to open a live [`ChannelConnection`].

use futures::SinkExt;
use moodscan_core::error::TaskError;
use moodscan_core::framing::{upload_chunks, END_TOKEN, START_TOKEN};
use moodscan_core::task::Submission;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw stream type every channel uses.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for one WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    ws_url: String,
}

/// A live WebSocket connection.
pub struct ChannelConnection {
    /// Unique id for correlating log lines with this connection.
    pub connection_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl ChannelClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    /// Full WebSocket URL (e.g. `ws://host:8000/ws/process-video`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the channel.
    pub async fn connect(&self) -> Result<ChannelConnection, ChannelError> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let (ws_stream, _response) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            ChannelError::Connection(format!("Failed to connect to {}: {e}", self.ws_url))
        })?;

        tracing::info!(
            connection_id = %connection_id,
            "Connected to {}",
            self.ws_url,
        );

        Ok(ChannelConnection {
            connection_id,
            ws_stream,
        })
    }
}

/// Send an artifact over an open channel: the start token, the payload as
/// binary frames of at most `chunk_size` bytes, then the end token.
///
/// Returns the number of binary frames sent.
pub async fn upload<S>(
    sink: &mut S,
    submission: &Submission,
    chunk_size: usize,
) -> Result<usize, ChannelError>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(START_TOKEN.to_string()))
        .await
        .map_err(protocol)?;

    let chunks = upload_chunks(submission.payload(), chunk_size);
    let count = chunks.len();
    for chunk in chunks {
        sink.send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(protocol)?;
    }

    sink.send(Message::Text(END_TOKEN.to_string()))
        .await
        .map_err(protocol)?;

    tracing::debug!(
        bytes = submission.len(),
        chunks = count,
        "Upload sent",
    );
    Ok(count)
}

fn protocol(e: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ChannelError::Closed,
        other => ChannelError::Protocol(other.to_string()),
    }
}

/// Errors that can occur when working with a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer closed the channel.
    #[error("connection closed")]
    Closed,
}

impl From<ChannelError> for TaskError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => TaskError::ConnectionClosed,
            other => TaskError::Transport(other.to_string()),
        }
    }
}
