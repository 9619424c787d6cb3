//! Transport layer for the moodscan emotion-detection client.
//!
//! Provides the HTTP multipart API wrapper, WebSocket channel handling,
//! the async [`runner::TaskClient`] that drives a task lifecycle over
//! either delivery mode, live panel sessions, and the events broadcast to
//! the presentation layer.

pub mod api;
pub mod channel;
pub mod events;
pub mod live;
pub mod processor;
pub mod runner;
