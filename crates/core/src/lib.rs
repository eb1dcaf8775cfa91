//! Shared building blocks for the lo-fi publishing pipeline.
//!
//! Everything here is independent of any particular remote service:
//! the stage error taxonomy, the retry policy, the remote-job poller,
//! the wake-lock guard, ffmpeg muxing, run naming, and the metadata
//! types that end up on disk.

pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod metadata;
pub mod naming;
pub mod poller;
pub mod retry;
pub mod types;
pub mod wake_lock;
