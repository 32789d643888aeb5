//! Typed error surfaces for the fallible operations in this crate.

use std::io;
use std::path::PathBuf;

use snafu::Snafu;

/// Errors returned when constructing a [`crate::log_file::LogFile`].
#[derive(Debug, Snafu)]
pub enum LogFileError {
    /// The initial log file could not be opened.
    #[snafu(display("failed to open log file at {}: {}", path.display(), source))]
    OpenFailed { path: PathBuf, source: io::Error },
}

/// Errors returned from [`crate::log_file::LogFile::roll_file`].
#[derive(Debug, Snafu)]
pub enum RollError {
    /// The new, timestamped log file could not be opened.
    #[snafu(display("failed to open rolled log file at {}: {}", path.display(), source))]
    RollOpenFailed { path: PathBuf, source: io::Error },
}
