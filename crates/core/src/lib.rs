//! Domain core for the moodscan emotion-detection client.
//!
//! Pure, synchronous building blocks shared by every submission surface:
//! media validation, the task lifecycle state machine, streaming message
//! framing, the live panel protocol and backend configuration. No I/O
//! happens here; transport lives in `moodscan-client`.

pub mod config;
pub mod error;
pub mod framing;
pub mod live;
pub mod media;
pub mod task;
pub mod types;
