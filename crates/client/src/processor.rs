//! Inbound frame processing for the streaming processing channel.
//!
//! Reads raw frames, decodes text frames with a [`FrameDecoder`] for the
//! configured [`Framing`], and turns close/error/stall conditions into
//! terminal [`ChannelEvent`]s.

use std::time::Duration;

use futures::{Stream, StreamExt};
use moodscan_core::error::TaskError;
use moodscan_core::framing::{parse_envelope, parse_legacy, Framing};
use moodscan_core::task::ChannelEvent;
use tokio_tungstenite::tungstenite::{self, Message};

/// Wait for the next meaningful event on the channel.
///
/// Binary, ping/pong and undecodable text frames are skipped. Returns
/// [`ChannelEvent::Closed`] when the peer closes or the stream ends, and
/// `Failed(Timeout)` when no frame at all arrives within `stall_timeout`.
pub async fn next_event<S>(
    stream: &mut S,
    decoder: &mut FrameDecoder,
    stall_timeout: Option<Duration>,
) -> ChannelEvent
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = match stall_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(stall = ?limit, "Channel stalled");
                    return ChannelEvent::Failed(TaskError::Timeout);
                }
            },
            None => stream.next().await,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if let Some(event) = decoder.decode(&text) {
                    return event;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::trace!(bytes = data.len(), "Ignoring binary frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Processing channel closed by peer");
                return ChannelEvent::Closed;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => return receive_error(e),
            None => {
                tracing::info!("Processing channel stream exhausted");
                return ChannelEvent::Closed;
            }
        }
    }
}

/// Per-channel text frame decoder.
///
/// In tagged framing a `complete` envelope without a `result` may be
/// followed by the locator as a bare text frame; the decoder remembers that
/// it is waiting for one.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    framing: Framing,
    awaiting_locator: bool,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            awaiting_locator: false,
        }
    }

    /// Decode one text frame. `None` means "skip it".
    pub fn decode(&mut self, text: &str) -> Option<ChannelEvent> {
        match self.framing {
            Framing::Tagged => match parse_envelope(text) {
                Ok(event) => {
                    if event == ChannelEvent::Complete(None) {
                        self.awaiting_locator = true;
                    }
                    Some(event)
                }
                Err(e) => {
                    if let Some(locator) = self.bare_locator(text) {
                        return Some(locator);
                    }
                    tracing::warn!(
                        error = %e,
                        raw_message = %text,
                        "Failed to parse channel message",
                    );
                    None
                }
            },
            Framing::Legacy => parse_legacy(text),
        }
    }

    /// Non-blank, non-JSON text right after a result-less `complete`.
    fn bare_locator(&mut self, text: &str) -> Option<ChannelEvent> {
        let trimmed = text.trim();
        if !self.awaiting_locator
            || trimmed.is_empty()
            || serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
        {
            return None;
        }
        self.awaiting_locator = false;
        Some(ChannelEvent::Locator(trimmed.to_string()))
    }
}

/// Abrupt closes count as `connection closed`; anything else is a
/// transport failure.
fn receive_error(e: tungstenite::Error) -> ChannelEvent {
    use tungstenite::error::ProtocolError;

    match e {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Io(_)
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            tracing::warn!(error = %e, "Processing channel dropped");
            ChannelEvent::Closed
        }
        other => {
            tracing::error!(error = %other, "WebSocket receive error");
            ChannelEvent::Failed(TaskError::Transport(other.to_string()))
        }
    }
}
