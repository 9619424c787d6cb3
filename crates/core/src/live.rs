//! Live panel protocol: commands, pushed events and the state they fold into.
//!
//! The YouTube channel speaks JSON in both directions. The webcam channel
//! only pushes plain text: an emotion label or `Error: <message>`.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Prefix the webcam channel puts in front of error text.
pub const WEBCAM_ERROR_PREFIX: &str = "Error:";

/// Maximum accepted video id length.
const MAX_VIDEO_ID_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Outbound command on the YouTube live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LiveCommand {
    Start {
        #[serde(rename = "videoId")]
        video_id: String,
    },
    Stop,
}

/// Validation failures for a video reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VideoIdError {
    #[error("video id is empty")]
    Empty,

    #[error("video id '{0}' contains invalid characters")]
    InvalidCharacters(String),

    #[error("video id is longer than 64 characters")]
    TooLong,
}

/// Extract a YouTube video id from a bare id or a watch/short/live URL.
pub fn parse_video_id(input: &str) -> Result<String, VideoIdError> {
    let input = input.trim();
    let candidate = extract_from_url(input).unwrap_or(input);

    if candidate.is_empty() {
        return Err(VideoIdError::Empty);
    }
    if candidate.len() > MAX_VIDEO_ID_LEN {
        return Err(VideoIdError::TooLong);
    }
    if !candidate
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(VideoIdError::InvalidCharacters(candidate.to_string()));
    }
    Ok(candidate.to_string())
}

fn extract_from_url(input: &str) -> Option<&str> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let rest = rest.strip_prefix("m.").unwrap_or(rest);

    let id_and_tail = if let Some(tail) = rest.strip_prefix("youtu.be/") {
        tail
    } else if let Some(tail) = rest.strip_prefix("youtube.com/live/") {
        tail
    } else if let Some(query) = rest.strip_prefix("youtube.com/watch?") {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("v="))
            .unwrap_or_default()
    } else {
        return None;
    };

    id_and_tail.split(['?', '&', '/', '#']).next()
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Inbound event on the YouTube live channel. Any subset of fields may be
/// present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LiveEvent {
    #[serde(default)]
    pub emotion: Option<String>,
    /// Base64-encoded JPEG of the analysed frame.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// The error is about a single frame and the stream carries on. Only
    /// webcam text errors are recoverable; a YouTube `error` ends the
    /// session.
    #[serde(skip)]
    pub recoverable: bool,
}

impl LiveEvent {
    /// Parse a JSON text frame from the YouTube channel.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Interpret a plain-text webcam frame. Blank frames yield `None`.
    pub fn from_webcam_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(match text.strip_prefix(WEBCAM_ERROR_PREFIX) {
            Some(message) => Self {
                error: Some(message.trim().to_string()),
                recoverable: true,
                ..Self::default()
            },
            None => Self {
                emotion: Some(text.to_string()),
                ..Self::default()
            },
        })
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// What the live panel currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveState {
    pub running: bool,
    pub emotion: Option<String>,
    /// Decoded JPEG bytes of the latest frame.
    pub frame: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl LiveState {
    /// Fresh state for a session that has just been started.
    pub fn started() -> Self {
        Self {
            running: true,
            ..Self::default()
        }
    }

    /// Fold one event in. Returns `true` if anything visible changed.
    ///
    /// A new emotion clears any earlier recoverable error. An undecodable
    /// image or a recoverable error is recorded without stopping the
    /// session; any other explicit `error` stops it.
    pub fn apply(&mut self, event: LiveEvent) -> bool {
        let before = self.clone();

        if let Some(emotion) = event.emotion.filter(|e| !e.is_empty()) {
            self.emotion = Some(emotion);
            self.error = None;
        }
        if let Some(image) = event.image.filter(|i| !i.is_empty()) {
            match base64::engine::general_purpose::STANDARD.decode(image.trim()) {
                Ok(bytes) => self.frame = Some(bytes),
                Err(e) => self.error = Some(format!("undecodable frame: {e}")),
            }
        }
        if let Some(error) = event.error.filter(|e| !e.is_empty()) {
            self.error = Some(error);
            if !event.recoverable {
                self.running = false;
            }
        }

        *self != before
    }

    /// The channel went away (stop, server close, transport error).
    pub fn mark_stopped(&mut self) {
        self.running = false;
    }
}
