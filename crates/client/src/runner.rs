//! Async driver for one artifact-submission surface.
//!
//! [`TaskClient`] wraps a [`TaskLifecycle`] and runs each submission in its
//! own tokio task. At most one submission is outstanding: selecting a new
//! artifact, submitting again or cancelling triggers the running task's
//! [`CancellationToken`], which closes its request or channel. Whatever the
//! old task still reports carries a retired [`Ticket`] and is dropped by the
//! lifecycle.
//!
//! State changes are broadcast as [`TaskEvent`]s. Call
//! [`TaskClient::subscribe`] to receive them.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use moodscan_core::config::BackendConfig;
use moodscan_core::error::TaskError;
use moodscan_core::media::MediaCategory;
use moodscan_core::task::{
    Applied, ChannelEvent, DeliveryMode, ResultRef, Submission, TaskLifecycle, TaskState, Ticket,
};
use moodscan_core::types::TaskId;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{save_processed_media, ApiError, InferenceApi};
use crate::channel::{upload, ChannelClient};
use crate::events::{TaskEvent, EVENT_CHANNEL_CAPACITY};
use crate::processor::{next_event, FrameDecoder};

/// How long `cancel` waits for the transport task to close its channel
/// before aborting it.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one submission surface (image upload, video processing, ...).
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: BackendConfig,
    category: MediaCategory,
    api: InferenceApi,
    channel: ChannelClient,
    /// Lock order: `active` before `lifecycle`. Transport tasks only take
    /// `lifecycle`.
    lifecycle: Mutex<TaskLifecycle>,
    active: Mutex<Option<ActiveTask>>,
    event_tx: broadcast::Sender<TaskEvent>,
}

/// Bookkeeping for the running submission.
struct ActiveTask {
    task_id: TaskId,
    ticket: Ticket,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TaskClient {
    /// Create an idle client accepting artifacts of `category`.
    pub fn new(config: BackendConfig, category: MediaCategory) -> Result<Self, ApiError> {
        let api = InferenceApi::new(&config)?;
        Ok(Self::with_api(config, category, api))
    }

    /// Create a client around an existing [`InferenceApi`].
    pub fn with_api(config: BackendConfig, category: MediaCategory, api: InferenceApi) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let channel = ChannelClient::new(config.processing_ws_url());

        Self {
            inner: Arc::new(Inner {
                config,
                category,
                api,
                channel,
                lifecycle: Mutex::new(TaskLifecycle::new(category)),
                active: Mutex::new(None),
                event_tx,
            }),
        }
    }

    pub fn category(&self) -> MediaCategory {
        self.inner.category
    }

    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Current state snapshot.
    pub async fn state(&self) -> TaskState {
        self.inner.lifecycle.lock().await.state().clone()
    }

    /// Result of the last completed task, if the state is `Completed`.
    pub async fn result(&self) -> Option<ResultRef> {
        self.inner.lifecycle.lock().await.result().cloned()
    }

    /// Whether the submit control should be enabled.
    pub async fn can_submit(&self) -> bool {
        self.inner.lifecycle.lock().await.can_submit()
    }

    /// Whether a processing channel is currently open.
    pub async fn has_open_channel(&self) -> bool {
        self.inner.lifecycle.lock().await.has_open_channel()
    }

    /// Validate and hold a newly selected artifact, tearing down any
    /// running submission first. No network contact happens here.
    pub async fn select_artifact(&self, submission: Submission) -> Result<(), TaskError> {
        let mut active = self.inner.active.lock().await;
        Self::signal_teardown(&mut active);

        let mut lifecycle = self.inner.lifecycle.lock().await;
        let file_name = submission.file_name().to_string();
        let result = lifecycle.select_artifact(submission);
        match &result {
            Ok(()) => tracing::debug!(file_name = %file_name, "Artifact selected"),
            Err(e) => tracing::warn!(file_name = %file_name, error = %e, "Artifact rejected"),
        }
        self.inner.emit(TaskId::nil(), lifecycle.state().clone());
        result
    }

    /// Start delivering the held artifact in `mode`.
    ///
    /// With nothing selected this is a no-op returning
    /// [`TaskError::NoArtifact`]. Returns the id of the new submission.
    pub async fn submit(&self, mode: DeliveryMode) -> Result<TaskId, TaskError> {
        let mut active = self.inner.active.lock().await;
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let Some(submission) = lifecycle.submission().cloned() else {
            tracing::warn!("Submit requested with no artifact selected");
            return Err(TaskError::NoArtifact);
        };

        Self::signal_teardown(&mut active);
        let ticket = lifecycle.begin_submit(mode)?;
        let task_id = uuid::Uuid::new_v4();
        self.inner.emit(task_id, lifecycle.state().clone());
        drop(lifecycle);

        tracing::info!(
            task_id = %task_id,
            ?mode,
            category = %self.inner.category,
            file_name = %submission.file_name(),
            bytes = submission.len(),
            "Submitting artifact",
        );

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            inner.drive(task_id, ticket, mode, submission, task_cancel).await;
        });

        *active = Some(ActiveTask {
            task_id,
            ticket,
            cancel,
            handle: Some(handle),
        });

        Ok(task_id)
    }

    /// Abandon the running submission and close its channel.
    ///
    /// Safe to call at any time; returns `false` when nothing was running.
    pub async fn cancel(&self) -> bool {
        let mut active = self.inner.active.lock().await;
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let cancelled = lifecycle.cancel();
        let task = active.take();
        if cancelled {
            self.inner.emit(
                task.as_ref().map(|t| t.task_id).unwrap_or_default(),
                lifecycle.state().clone(),
            );
        }
        drop(lifecycle);
        drop(active);

        let Some(mut task) = task else {
            return cancelled;
        };
        task.cancel.cancel();

        if let Some(mut handle) = task.handle.take() {
            if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(task_id = %task.task_id, "Transport task did not stop, aborting");
                handle.abort();
            }
        }

        if cancelled {
            tracing::info!(
                task_id = %task.task_id,
                generation = task.ticket.generation(),
                "Submission cancelled",
            );
        }
        cancelled
    }

    /// Clear a finished task back to `Idle` with nothing held.
    ///
    /// Returns `false` unless the state was `Completed` or `Failed`.
    pub async fn reset(&self) -> bool {
        let mut active = self.inner.active.lock().await;
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if !lifecycle.reset() {
            return false;
        }
        *active = None;
        self.inner.emit(TaskId::nil(), lifecycle.state().clone());
        true
    }

    /// Wait for the running submission's transport task to finish, then
    /// return the resulting state.
    pub async fn wait(&self) -> TaskState {
        let handle = self
            .inner
            .active
            .lock()
            .await
            .as_mut()
            .and_then(|task| task.handle.take());

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Transport task panicked");
            }
        }
        self.state().await
    }

    // ---- private helpers ----

    /// Trigger cancellation of whatever is running. Does not wait.
    fn signal_teardown(active: &mut Option<ActiveTask>) {
        if let Some(task) = active.take() {
            tracing::debug!(task_id = %task.task_id, "Tearing down previous submission");
            task.cancel.cancel();
        }
    }
}

impl Inner {
    fn emit(&self, task_id: TaskId, state: TaskState) {
        let _ = self.event_tx.send(TaskEvent::new(task_id, state));
    }

    /// Feed one transport observation into the lifecycle and publish the
    /// resulting state if it changed.
    async fn apply(&self, task_id: TaskId, ticket: Ticket, event: ChannelEvent) -> Applied {
        let mut lifecycle = self.lifecycle.lock().await;
        let before = lifecycle.state().clone();
        let applied = lifecycle.apply(ticket, event);

        match applied {
            Applied::Stale => {
                tracing::debug!(task_id = %task_id, "Dropping event for retired submission");
            }
            Applied::Pending | Applied::Terminal => {
                let after = lifecycle.state();
                if *after != before {
                    match after {
                        TaskState::InProgress(percent) => {
                            tracing::debug!(task_id = %task_id, percent, "Processing progress");
                        }
                        TaskState::Completed(result) => {
                            tracing::info!(task_id = %task_id, result = %result, "Task completed");
                        }
                        TaskState::Failed(error) => {
                            tracing::warn!(
                                task_id = %task_id,
                                kind = ?error.kind(),
                                error = %error,
                                "Task failed",
                            );
                        }
                        _ => {}
                    }
                    self.emit(task_id, after.clone());
                }
            }
        }
        applied
    }

    async fn drive(
        &self,
        task_id: TaskId,
        ticket: Ticket,
        mode: DeliveryMode,
        submission: Submission,
        cancel: CancellationToken,
    ) {
        match (mode, self.category) {
            (DeliveryMode::RequestResponse, MediaCategory::Image) => {
                self.run_recognize(task_id, ticket, &submission, &cancel).await
            }
            (DeliveryMode::RequestResponse, MediaCategory::Video) => {
                self.run_process_video(task_id, ticket, &submission, &cancel)
                    .await
            }
            (DeliveryMode::Streaming, _) => {
                self.run_stream(task_id, ticket, &submission, &cancel).await
            }
        }
    }

    async fn run_recognize(
        &self,
        task_id: TaskId,
        ticket: Ticket,
        submission: &Submission,
        cancel: &CancellationToken,
    ) {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(task_id = %task_id, "Recognize request abandoned");
                return;
            }
            result = self.api.recognize(submission) => result,
        };

        let event = match outcome {
            Ok(label) => ChannelEvent::Response(ResultRef::new(label)),
            Err(e) => ChannelEvent::Failed(e.into()),
        };
        self.apply(task_id, ticket, event).await;
    }

    async fn run_process_video(
        &self,
        task_id: TaskId,
        ticket: Ticket,
        submission: &Submission,
        cancel: &CancellationToken,
    ) {
        let download = async {
            let media = self.api.process_video(submission).await?;
            let path = save_processed_media(&self.config.download_dir, submission, &media).await?;
            Ok::<_, ApiError>(path)
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(task_id = %task_id, "Video request abandoned");
                return;
            }
            result = download => result,
        };

        let event = match outcome {
            Ok(path) => ChannelEvent::Response(ResultRef::new(path.display().to_string())),
            Err(e) => ChannelEvent::Failed(e.into()),
        };
        self.apply(task_id, ticket, event).await;
    }

    async fn run_stream(
        &self,
        task_id: TaskId,
        ticket: Ticket,
        submission: &Submission,
        cancel: &CancellationToken,
    ) {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.channel.connect() => result,
        };
        let conn = match connected {
            Ok(conn) => conn,
            Err(e) => {
                self.apply(task_id, ticket, ChannelEvent::Failed(e.into())).await;
                return;
            }
        };

        tracing::debug!(
            task_id = %task_id,
            connection_id = %conn.connection_id,
            "Processing channel open",
        );
        let (mut sink, mut stream) = conn.ws_stream.split();

        let uploaded = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            result = upload(&mut sink, submission, self.config.chunk_size) => result,
        };
        if let Err(e) = uploaded {
            self.apply(task_id, ticket, ChannelEvent::Failed(e.into())).await;
            let _ = sink.close().await;
            return;
        }

        let mut decoder = FrameDecoder::new(self.config.framing);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(task_id = %task_id, "Closing processing channel");
                    break;
                }
                event = next_event(&mut stream, &mut decoder, self.config.stall_timeout) => event,
            };

            // Closed/Failed are terminal for an active task; if the task
            // was retired meanwhile they are stale and we stop anyway.
            let channel_gone = matches!(event, ChannelEvent::Closed | ChannelEvent::Failed(_));
            match self.apply(task_id, ticket, event).await {
                Applied::Pending if !channel_gone => {}
                _ => break,
            }
        }

        let _ = sink.close().await;
    }
}
