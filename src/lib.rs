//! An asynchronous, crash-safe logging core for high-throughput server
//! processes.
//!
//! The pipeline has three parts: a fixed-capacity buffer reused across
//! drain cycles ([`fixed_buffer`]), a double-buffered producer/consumer
//! handoff that bounds producer latency and memory under overload
//! ([`async_logging`]), and a policy layer that rolls and flushes the
//! files the consumer writes to ([`log_file`], atop [`append_file`]).
//!
//! This crate does not format log records — it accepts already-formatted
//! byte runs from callers (severity gating, timestamps, source location,
//! and message rendering are the caller's concern) and is responsible only
//! for getting those bytes onto disk quickly, safely, and without
//! unbounded memory growth when producers outrun the disk.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod append_file;
pub mod async_logging;
pub mod error;
pub mod filename;
pub mod fixed_buffer;
pub mod log_file;

pub use append_file::AppendFile;
pub use async_logging::AsyncLogging;
pub use error::{LogFileError, RollError};
pub use fixed_buffer::FixedBuffer;
pub use log_file::LogFile;
