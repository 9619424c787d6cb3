//! Task lifecycle state machine shared by every artifact-submission surface.
//!
//! [`TaskLifecycle`] is pure and synchronous: it owns the current
//! [`Submission`] and [`TaskState`] and decides every transition. Transport
//! code drives it by calling [`TaskLifecycle::begin_submit`] and then feeding
//! [`ChannelEvent`]s tagged with the [`Ticket`] it was handed. Events carrying
//! a ticket from an older submission are dropped, so nothing a torn-down
//! channel delivers can change state.

use crate::error::TaskError;
use crate::media::{validate_declared_type, MediaCategory};

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// File name used when the caller does not provide one.
pub const DEFAULT_FILE_NAME: &str = "upload";

/// A user-selected artifact waiting to be (or being) processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    file_name: String,
    declared_type: String,
    payload: Vec<u8>,
}

impl Submission {
    pub fn new(payload: Vec<u8>, declared_type: impl Into<String>) -> Self {
        Self {
            file_name: DEFAULT_FILE_NAME.to_string(),
            declared_type: declared_type.into(),
            payload,
        }
    }

    /// Set the file name sent as the multipart filename.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// File name without its final extension.
    pub fn file_stem(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.file_name,
        }
    }

    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ResultRef
// ---------------------------------------------------------------------------

/// Opaque locator for a finished task's output: an emotion label, a URL or a
/// path. Only ever read for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Root-relative locators (`/result/abc.mp4`) live on the backend.
    pub fn is_root_relative(&self) -> bool {
        self.0.starts_with('/') && !self.0.starts_with("//")
    }

    /// Join a root-relative locator onto `origin`; anything else is
    /// returned as-is.
    pub fn resolve(&self, origin: &str) -> String {
        if self.is_root_relative() {
            format!("{}{}", origin.trim_end_matches('/'), self.0)
        } else {
            self.0.clone()
        }
    }
}

impl std::fmt::Display for ResultRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// The single live state of one client instance.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Idle,
    Submitting,
    /// Percentage in `0.0..=100.0` from the most recent progress event.
    InProgress(f32),
    Completed(ResultRef),
    Failed(TaskError),
}

impl TaskState {
    /// A request or channel is outstanding.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Submitting | Self::InProgress(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    pub fn percent(&self) -> Option<f32> {
        match self {
            Self::InProgress(p) => Some(*p),
            _ => None,
        }
    }

    /// Short lowercase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::InProgress(_) => "in_progress",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Submitting => f.write_str("submitting"),
            Self::InProgress(p) => write!(f, "in progress ({p:.0}%)"),
            Self::Completed(r) => write!(f, "completed: {r}"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery, tickets and events
// ---------------------------------------------------------------------------

/// How a submission reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One bounded HTTP request; the response is the result.
    RequestResponse,
    /// One duplex channel with pushed progress and a terminal signal.
    Streaming,
}

/// Ties asynchronous callbacks to the submission that started them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(self) -> u64 {
        self.0
    }
}

/// Something the transport observed for a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Progress percentage pushed by the backend.
    Progress(f32),
    /// Legacy terminal token: processing finished, no more payload.
    Sentinel,
    /// A bare result locator.
    Locator(String),
    /// Tagged completion, optionally carrying the locator.
    Complete(Option<String>),
    /// The backend reported an error explicitly.
    ServerError(String),
    /// Request/response mode finished with a result.
    Response(ResultRef),
    /// The channel closed.
    Closed,
    /// The transport failed (connect, send, status, timeout).
    Failed(TaskError),
}

/// Outcome of [`TaskLifecycle::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Ticket no longer current or task not active; nothing changed.
    Stale,
    /// Accepted; the task is still running.
    Pending,
    /// Accepted; the task reached `Completed` or `Failed`.
    Terminal,
}

// ---------------------------------------------------------------------------
// TaskLifecycle
// ---------------------------------------------------------------------------

/// Reusable Idle/Submitting/InProgress/Completed/Failed state machine.
#[derive(Debug)]
pub struct TaskLifecycle {
    expected: MediaCategory,
    submission: Option<Submission>,
    state: TaskState,
    generation: u64,
    mode: Option<DeliveryMode>,
    sentinel_seen: bool,
    pending_locator: Option<String>,
}

impl TaskLifecycle {
    /// Create an idle lifecycle accepting artifacts of `expected` category.
    pub fn new(expected: MediaCategory) -> Self {
        Self {
            expected,
            submission: None,
            state: TaskState::Idle,
            generation: 0,
            mode: None,
            sentinel_seen: false,
            pending_locator: None,
        }
    }

    pub fn expected(&self) -> MediaCategory {
        self.expected
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn submission(&self) -> Option<&Submission> {
        self.submission.as_ref()
    }

    pub fn result(&self) -> Option<&ResultRef> {
        match &self.state {
            TaskState::Completed(r) => Some(r),
            _ => None,
        }
    }

    /// Whether a channel belonging to the current submission is open.
    pub fn has_open_channel(&self) -> bool {
        self.state.is_active() && self.mode == Some(DeliveryMode::Streaming)
    }

    /// Submit control enabled: an artifact is held and nothing is running.
    pub fn can_submit(&self) -> bool {
        self.submission.is_some() && !self.state.is_active()
    }

    /// Validate and store a newly selected artifact.
    ///
    /// Any running task is invalidated first. On rejection the state becomes
    /// `Failed` and no artifact is held.
    pub fn select_artifact(&mut self, submission: Submission) -> Result<(), TaskError> {
        self.invalidate();

        let checked = if submission.is_empty() {
            Err(TaskError::NoArtifact)
        } else {
            validate_declared_type(submission.declared_type(), self.expected)
        };

        match checked {
            Ok(()) => {
                self.submission = Some(submission);
                self.state = TaskState::Idle;
                Ok(())
            }
            Err(e) => {
                self.submission = None;
                self.state = TaskState::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Start delivering the held artifact.
    ///
    /// With no artifact held this is a no-op returning
    /// [`TaskError::NoArtifact`]. A running task is torn down first.
    pub fn begin_submit(&mut self, mode: DeliveryMode) -> Result<Ticket, TaskError> {
        if self.submission.is_none() {
            return Err(TaskError::NoArtifact);
        }
        self.invalidate();
        self.mode = Some(mode);
        self.state = TaskState::Submitting;
        Ok(Ticket(self.generation))
    }

    /// Feed one transport observation into the state machine.
    pub fn apply(&mut self, ticket: Ticket, event: ChannelEvent) -> Applied {
        if ticket.0 != self.generation || !self.state.is_active() {
            return Applied::Stale;
        }

        match event {
            ChannelEvent::Progress(p) => {
                if p.is_finite() {
                    self.state = TaskState::InProgress(p.clamp(0.0, 100.0));
                }
                Applied::Pending
            }
            ChannelEvent::Sentinel | ChannelEvent::Complete(None) => {
                self.sentinel_seen = true;
                match self.pending_locator.take() {
                    Some(locator) => self.complete(ResultRef::new(locator)),
                    None => Applied::Pending,
                }
            }
            ChannelEvent::Locator(locator) => {
                if self.sentinel_seen {
                    self.complete(ResultRef::new(locator))
                } else {
                    self.pending_locator = Some(locator);
                    Applied::Pending
                }
            }
            ChannelEvent::Complete(Some(locator)) => self.complete(ResultRef::new(locator)),
            ChannelEvent::Response(result) => self.complete(result),
            ChannelEvent::ServerError(message) => self.fail(TaskError::ServerReported(message)),
            ChannelEvent::Closed => self.fail(TaskError::ConnectionClosed),
            ChannelEvent::Failed(e) => self.fail(e),
        }
    }

    /// Abandon the running task. Returns `false` (and changes nothing) when
    /// no task is running.
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.invalidate();
        self.state = TaskState::Idle;
        true
    }

    /// Clear a finished task back to `Idle` with nothing held. Returns
    /// `false` unless the state was `Completed` or `Failed`.
    pub fn reset(&mut self) -> bool {
        if !self.state.is_terminal() {
            return false;
        }
        self.submission = None;
        self.clear_stream();
        self.state = TaskState::Idle;
        true
    }

    // ---- private helpers ----

    /// Retire the current ticket so late callbacks are dropped.
    fn invalidate(&mut self) {
        self.generation += 1;
        self.mode = None;
        self.clear_stream();
        if self.state.is_active() {
            self.state = TaskState::Idle;
        }
    }

    fn clear_stream(&mut self) {
        self.sentinel_seen = false;
        self.pending_locator = None;
    }

    fn complete(&mut self, result: ResultRef) -> Applied {
        self.submission = None;
        self.mode = None;
        self.clear_stream();
        self.state = TaskState::Completed(result);
        Applied::Terminal
    }

    fn fail(&mut self, error: TaskError) -> Applied {
        self.mode = None;
        self.clear_stream();
        self.state = TaskState::Failed(error);
        Applied::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn jpeg() -> Submission {
        Submission::new(vec![0xFF; 2 * 1024 * 1024], "image/jpeg").with_file_name("face.jpg")
    }

    fn video() -> Submission {
        Submission::new(vec![0u8; 4096], "video/mp4").with_file_name("clip.mp4")
    }

    fn streaming_video() -> (TaskLifecycle, Ticket) {
        let mut lc = TaskLifecycle::new(MediaCategory::Video);
        lc.select_artifact(video()).unwrap();
        let ticket = lc.begin_submit(DeliveryMode::Streaming).unwrap();
        (lc, ticket)
    }

    // ---- selection ----

    #[test]
    fn select_valid_artifact_goes_idle() {
        let mut lc = TaskLifecycle::new(MediaCategory::Image);
        lc.select_artifact(jpeg()).unwrap();
        assert_eq!(lc.state(), &TaskState::Idle);
        assert_eq!(lc.submission().unwrap().file_name(), "face.jpg");
        assert!(lc.can_submit());
    }

    #[test]
    fn select_wrong_type_fails_without_channel() {
        for declared in ["text/plain", "video/mp4", "application/pdf", ""] {
            let mut lc = TaskLifecycle::new(MediaCategory::Image);
            let err = lc
                .select_artifact(Submission::new(vec![1, 2, 3], declared))
                .unwrap_err();
            assert_matches!(err, TaskError::InvalidType { .. });
            assert_matches!(lc.state(), TaskState::Failed(TaskError::InvalidType { .. }));
            assert!(lc.submission().is_none());
            assert!(!lc.has_open_channel());
            assert!(!lc.can_submit());
        }
    }

    #[test]
    fn select_empty_payload_is_rejected() {
        let mut lc = TaskLifecycle::new(MediaCategory::Video);
        let err = lc.select_artifact(Submission::new(Vec::new(), "video/mp4")).unwrap_err();
        assert_eq!(err, TaskError::NoArtifact);
        assert_eq!(lc.state(), &TaskState::Failed(TaskError::NoArtifact));
    }

    #[test]
    fn select_during_stream_invalidates_old_ticket() {
        let (mut lc, old) = streaming_video();
        lc.select_artifact(video().with_file_name("second.mp4")).unwrap();
        assert_eq!(lc.state(), &TaskState::Idle);
        assert!(!lc.has_open_channel());
        assert_eq!(lc.apply(old, ChannelEvent::Progress(50.0)), Applied::Stale);
        assert_eq!(lc.state(), &TaskState::Idle);
    }

    // ---- submit ----

    #[test]
    fn submit_without_artifact_is_noop() {
        let mut lc = TaskLifecycle::new(MediaCategory::Image);
        assert_eq!(
            lc.begin_submit(DeliveryMode::RequestResponse),
            Err(TaskError::NoArtifact)
        );
        assert_eq!(lc.state(), &TaskState::Idle);
    }

    #[test]
    fn submit_opens_channel_only_in_streaming_mode() {
        let (lc, _) = streaming_video();
        assert_eq!(lc.state(), &TaskState::Submitting);
        assert!(lc.has_open_channel());

        let mut lc = TaskLifecycle::new(MediaCategory::Image);
        lc.select_artifact(jpeg()).unwrap();
        lc.begin_submit(DeliveryMode::RequestResponse).unwrap();
        assert_eq!(lc.state(), &TaskState::Submitting);
        assert!(!lc.has_open_channel());
        assert!(!lc.can_submit());
    }

    #[test]
    fn resubmit_tears_down_previous_ticket() {
        let (mut lc, first) = streaming_video();
        let second = lc.begin_submit(DeliveryMode::Streaming).unwrap();
        assert_ne!(first, second);
        assert_eq!(lc.apply(first, ChannelEvent::Closed), Applied::Stale);
        assert_eq!(lc.state(), &TaskState::Submitting);
    }

    // ---- request/response ----

    #[test]
    fn request_response_happy_label() {
        let mut lc = TaskLifecycle::new(MediaCategory::Image);
        lc.select_artifact(jpeg()).unwrap();
        let ticket = lc.begin_submit(DeliveryMode::RequestResponse).unwrap();
        let applied = lc.apply(ticket, ChannelEvent::Response(ResultRef::new("happy")));
        assert_eq!(applied, Applied::Terminal);
        assert_eq!(lc.state(), &TaskState::Completed(ResultRef::new("happy")));
        assert_eq!(lc.result().unwrap().as_str(), "happy");
        assert!(lc.submission().is_none());
    }

    #[test]
    fn request_response_transport_failure() {
        let mut lc = TaskLifecycle::new(MediaCategory::Image);
        lc.select_artifact(jpeg()).unwrap();
        let ticket = lc.begin_submit(DeliveryMode::RequestResponse).unwrap();
        lc.apply(
            ticket,
            ChannelEvent::Failed(TaskError::Transport("HTTP 500".into())),
        );
        assert_eq!(
            lc.state(),
            &TaskState::Failed(TaskError::Transport("HTTP 500".into()))
        );
        // Artifact is kept so the user can retry.
        assert!(lc.can_submit());
    }

    // ---- streaming ----

    #[test]
    fn streaming_scenario_completes_with_locator() {
        let (mut lc, t) = streaming_video();
        for p in [10.0, 55.0, 99.0] {
            assert_eq!(lc.apply(t, ChannelEvent::Progress(p)), Applied::Pending);
            assert_eq!(lc.state(), &TaskState::InProgress(p));
        }
        assert_eq!(lc.apply(t, ChannelEvent::Sentinel), Applied::Pending);
        assert_eq!(lc.state(), &TaskState::InProgress(99.0));
        assert_eq!(
            lc.apply(t, ChannelEvent::Locator("/result/abc.mp4".into())),
            Applied::Terminal
        );
        assert_eq!(
            lc.state(),
            &TaskState::Completed(ResultRef::new("/result/abc.mp4"))
        );
        assert!(!lc.has_open_channel());
    }

    #[test]
    fn locator_before_sentinel_waits_for_sentinel() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Locator("/result/x.mp4".into()));
        assert_eq!(lc.state(), &TaskState::Submitting);
        lc.apply(t, ChannelEvent::Sentinel);
        assert_eq!(
            lc.state(),
            &TaskState::Completed(ResultRef::new("/result/x.mp4"))
        );
    }

    #[test]
    fn tagged_complete_with_result_is_terminal() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Progress(40.0));
        assert_eq!(
            lc.apply(t, ChannelEvent::Complete(Some("/result/y.mp4".into()))),
            Applied::Terminal
        );
        assert_eq!(lc.result(), Some(&ResultRef::new("/result/y.mp4")));
    }

    #[test]
    fn progress_is_last_write_wins() {
        let (mut lc, t) = streaming_video();
        for p in [80.0, 20.0, 65.0, 30.0] {
            lc.apply(t, ChannelEvent::Progress(p));
        }
        assert_eq!(lc.state(), &TaskState::InProgress(30.0));
    }

    #[test]
    fn progress_is_clamped() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Progress(140.0));
        assert_eq!(lc.state().percent(), Some(100.0));
        lc.apply(t, ChannelEvent::Progress(-3.0));
        assert_eq!(lc.state().percent(), Some(0.0));
        lc.apply(t, ChannelEvent::Progress(f32::NAN));
        assert_eq!(lc.state().percent(), Some(0.0));
    }

    #[test]
    fn silence_never_completes() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Progress(100.0));
        lc.apply(t, ChannelEvent::Locator("/result/abc.mp4".into()));
        assert!(lc.state().is_active());
        assert_eq!(lc.apply(t, ChannelEvent::Closed), Applied::Terminal);
        assert_eq!(lc.state(), &TaskState::Failed(TaskError::ConnectionClosed));
        assert_eq!(lc.state().to_string(), "failed: connection closed");
    }

    #[test]
    fn server_error_event_fails() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::ServerError("codec not supported".into()));
        assert_eq!(
            lc.state(),
            &TaskState::Failed(TaskError::ServerReported("codec not supported".into()))
        );
    }

    #[test]
    fn events_after_terminal_are_stale() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Complete(Some("/r.mp4".into())));
        assert_eq!(lc.apply(t, ChannelEvent::Closed), Applied::Stale);
        assert_eq!(lc.apply(t, ChannelEvent::Progress(3.0)), Applied::Stale);
        assert_eq!(lc.result(), Some(&ResultRef::new("/r.mp4")));
    }

    // ---- cancel ----

    #[test]
    fn cancel_then_late_messages_do_not_mutate() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Progress(10.0));
        assert!(lc.cancel());
        assert_eq!(lc.state(), &TaskState::Idle);
        assert!(!lc.has_open_channel());

        for event in [
            ChannelEvent::Progress(90.0),
            ChannelEvent::Sentinel,
            ChannelEvent::Locator("/late.mp4".into()),
            ChannelEvent::ServerError("late".into()),
            ChannelEvent::Closed,
        ] {
            assert_eq!(lc.apply(t, event), Applied::Stale);
            assert_eq!(lc.state(), &TaskState::Idle);
        }
        // The artifact survives a cancel.
        assert!(lc.can_submit());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (mut lc, _) = streaming_video();
        assert!(lc.cancel());
        assert!(!lc.cancel());
        assert!(!lc.cancel());
        assert_eq!(lc.state(), &TaskState::Idle);
    }

    #[test]
    fn cancel_after_terminal_is_noop() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Closed);
        assert!(!lc.cancel());
        assert_eq!(lc.state(), &TaskState::Failed(TaskError::ConnectionClosed));
    }

    // ---- reset ----

    #[test]
    fn reset_after_completed_returns_to_empty_idle() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Complete(Some("/r.mp4".into())));
        assert!(lc.reset());
        assert_eq!(lc.state(), &TaskState::Idle);
        assert!(lc.submission().is_none());
        assert!(lc.result().is_none());
    }

    #[test]
    fn reset_after_failed_returns_to_empty_idle() {
        let (mut lc, t) = streaming_video();
        lc.apply(t, ChannelEvent::Failed(TaskError::Timeout));
        assert!(lc.reset());
        assert_eq!(lc.state(), &TaskState::Idle);
        assert!(lc.submission().is_none());
        assert!(lc.result().is_none());
        assert!(!lc.can_submit());
    }

    #[test]
    fn reset_while_running_is_rejected() {
        let (mut lc, _) = streaming_video();
        assert!(!lc.reset());
        assert_eq!(lc.state(), &TaskState::Submitting);
    }

    // ---- values ----

    #[test]
    fn result_ref_resolves_against_origin() {
        let r = ResultRef::new("/result/abc.mp4");
        assert_eq!(
            r.resolve("http://localhost:8000/"),
            "http://localhost:8000/result/abc.mp4"
        );
        let abs = ResultRef::new("https://cdn.example.com/abc.mp4");
        assert_eq!(abs.resolve("http://localhost:8000"), abs.as_str());
        assert!(!ResultRef::new("//cdn/abc.mp4").is_root_relative());
        assert_eq!(ResultRef::new("happy").resolve("http://x"), "happy");
    }

    #[test]
    fn file_stem_strips_last_extension() {
        assert_eq!(video().file_stem(), "clip");
        assert_eq!(video().with_file_name("a.b.webm").file_stem(), "a.b");
        assert_eq!(video().with_file_name(".hidden").file_stem(), ".hidden");
        assert_eq!(video().with_file_name("noext").file_stem(), "noext");
    }
}
