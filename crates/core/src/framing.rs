//! Streaming-mode wire framing.
//!
//! Outbound, the client sends [`START_TOKEN`], the payload as binary chunks,
//! then [`END_TOKEN`]. Inbound text frames are decoded into
//! [`ChannelEvent`]s using one of two framings:
//!
//! * [`Framing::Tagged`]: JSON with a `kind` discriminator
//!   (`progress | complete | error`).
//! * [`Framing::Legacy`]: structured parse first, then the
//!   [`COMPLETE_SENTINEL`] token, then any other text as a result locator.

use serde::Deserialize;

use crate::task::ChannelEvent;

/// Text frame opening an upload.
pub const START_TOKEN: &str = "start";
/// Text frame closing an upload.
pub const END_TOKEN: &str = "end";
/// Legacy terminal token: processing complete, no further payload.
pub const COMPLETE_SENTINEL: &str = "done";

/// Which inbound framing the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Tagged,
    Legacy,
}

impl Framing {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tagged => "tagged",
            Self::Legacy => "legacy",
        }
    }
}

impl std::str::FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tagged" => Ok(Self::Tagged),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown framing '{other}' (expected tagged or legacy)")),
        }
    }
}

/// Tagged inbound envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Progress {
        progress: f32,
    },
    Complete {
        #[serde(default)]
        result: Option<String>,
    },
    Error {
        message: String,
    },
}

impl From<Envelope> for ChannelEvent {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Progress { progress } => ChannelEvent::Progress(progress),
            Envelope::Complete { result } => {
                ChannelEvent::Complete(result.filter(|r| !r.trim().is_empty()))
            }
            Envelope::Error { message } => ChannelEvent::ServerError(message),
        }
    }
}

/// Structured legacy frames: `{"progress": N}` or `{"error": "..."}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyFrame {
    Progress { progress: f32 },
    Error { error: String },
}

/// Parse a tagged envelope.
///
/// Returns `Err` for malformed JSON or an unknown `kind`. Callers should
/// log and continue.
pub fn parse_envelope(text: &str) -> Result<ChannelEvent, serde_json::Error> {
    serde_json::from_str::<Envelope>(text).map(ChannelEvent::from)
}

/// Interpret a legacy frame. Blank frames yield `None`.
pub fn parse_legacy(text: &str) -> Option<ChannelEvent> {
    if let Ok(frame) = serde_json::from_str::<LegacyFrame>(text) {
        return Some(match frame {
            LegacyFrame::Progress { progress } => ChannelEvent::Progress(progress),
            LegacyFrame::Error { error } => ChannelEvent::ServerError(error),
        });
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed == COMPLETE_SENTINEL {
        Some(ChannelEvent::Sentinel)
    } else {
        Some(ChannelEvent::Locator(trimmed.to_string()))
    }
}

/// Split a payload into upload chunks of at most `chunk_size` bytes.
///
/// Always yields at least one chunk, so an upload never consists of the
/// start and end tokens alone.
pub fn upload_chunks(payload: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if payload.is_empty() {
        return vec![payload];
    }
    payload.chunks(chunk_size.max(1)).collect()
}
