use crate::media::MediaCategory;

/// Why a task ended up in [`TaskState::Failed`](crate::task::TaskState::Failed).
///
/// The `Display` output is the human-readable reason shown to the user,
/// so variants render as short lowercase phrases.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("invalid type")]
    InvalidType {
        declared: String,
        expected: MediaCategory,
    },

    #[error("no file selected")]
    NoArtifact,

    #[error("{0}")]
    Transport(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    ServerReported(String),
}

/// Coarse error taxonomy used by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caught before any network contact.
    Validation,
    /// Connection refused, abrupt close, non-success status, timeout.
    Transport,
    /// The backend explicitly reported a failure.
    ServerReported,
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidType { .. } | Self::NoArtifact => ErrorKind::Validation,
            Self::Transport(_) | Self::ConnectionClosed | Self::Timeout => ErrorKind::Transport,
            Self::ServerReported(_) => ErrorKind::ServerReported,
        }
    }

    /// The reason string surfaced verbatim to the user.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
