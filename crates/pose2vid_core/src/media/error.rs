//! Error types for media probing and encoding.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::probe::VideoProperties;

#[derive(Error, Debug)]
pub enum MediaError {
    /// The source video does not exist.
    #[error("Input video not found: {0}")]
    InputNotFound(PathBuf),

    /// The tool could not be started at all.
    #[error("Failed to run {tool}: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The tool ran and exited unsuccessfully.
    #[error("{tool} failed with exit code {exit_code}: {message}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        message: String,
    },

    /// The file could not be opened or read as a video.
    #[error("Cannot probe {path}: {message}")]
    ProbeFailed { path: PathBuf, message: String },

    #[error("No video stream in {0}")]
    NoVideoStream(PathBuf),

    /// Output frame geometry differs from the source.
    #[error("{path} does not match its source: expected {expected}, got {actual}")]
    GeometryMismatch {
        path: PathBuf,
        expected: VideoProperties,
        actual: VideoProperties,
    },

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl MediaError {
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
