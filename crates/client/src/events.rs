//! Events broadcast to the presentation layer.
//!
//! Every state change of a [`TaskClient`](crate::runner::TaskClient) or a
//! [`LiveSession`](crate::live::LiveSession) is published as a snapshot so
//! subscribers can render without querying back.

use chrono::Utc;
use moodscan_core::live::LiveState;
use moodscan_core::task::TaskState;
use moodscan_core::types::{TaskId, Timestamp};

/// Broadcast channel capacity for task and live events.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A task lifecycle state change.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    /// Submission the change belongs to. Selection and reset events use
    /// the nil id since no submission is running.
    pub task_id: TaskId,
    /// The new state.
    pub state: TaskState,
    /// When the change happened (UTC).
    pub at: Timestamp,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            at: Utc::now(),
        }
    }
}

/// A live panel change.
#[derive(Debug, Clone)]
pub struct LiveUpdate {
    pub state: LiveState,
    pub at: Timestamp,
}

impl LiveUpdate {
    pub fn new(state: LiveState) -> Self {
        Self {
            state,
            at: Utc::now(),
        }
    }
}
