//! `lofi-worker` library crate.
//!
//! Configuration, CLI parsing, logging and pipeline assembly. The binary
//! entrypoint lives in `main.rs`.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
