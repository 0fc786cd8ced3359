//! Error types for run setup and the per-prompt pipeline.
//!
//! Errors carry context that chains through layers:
//! Prompt → Step → Operation → Detail

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::generation::{BackendCapability, GenerationError};
use crate::media::MediaError;
use crate::models::BundleError;
use crate::runtime::ParseDeviceError;

/// Failure before the first prompt runs. Aborts the whole run.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No skeleton video given (use --skeleton-path or set skeleton_path)")]
    MissingSkeleton,

    #[error("Skeleton video not found: {0}")]
    SkeletonNotFound(PathBuf),

    #[error("Invalid device: {0}")]
    Device(#[from] ParseDeviceError),

    #[error("Model loading failed: {0}")]
    Model(#[from] BundleError),

    #[error("Checkpoint resume failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error(
        "Backend '{backend}' does not support {}; install it or disable the matching option",
        .capability.as_str()
    )]
    MissingCapability {
        backend: String,
        capability: BackendCapability,
    },

    #[error("Generation backend unavailable: {0}")]
    Backend(#[from] GenerationError),

    #[error("ffmpeg/ffprobe not available ({ffmpeg}, {ffprobe})")]
    ToolsUnavailable { ffmpeg: PathBuf, ffprobe: PathBuf },

    #[error("Failed to create {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open run log: {0}")]
    Logger(#[source] io::Error),
}

impl SetupError {
    pub fn directory(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Directory {
            path: path.into(),
            source,
        }
    }
}

/// Per-prompt pipeline error with prompt context.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A step failed during execution.
    #[error("Prompt '{prompt}' failed at step '{step_name}': {source}")]
    StepFailed {
        prompt: String,
        step_name: String,
        #[source]
        source: StepError,
    },

    /// Pipeline was cancelled.
    #[error("Prompt '{prompt}' was cancelled")]
    Cancelled { prompt: String },
}

impl PipelineError {
    pub fn step_failed(
        prompt: impl Into<String>,
        step_name: impl Into<String>,
        source: StepError,
    ) -> Self {
        Self::StepFailed {
            prompt: prompt.into(),
            step_name: step_name.into(),
            source,
        }
    }

    pub fn cancelled(prompt: impl Into<String>) -> Self {
        Self::Cancelled {
            prompt: prompt.into(),
        }
    }

    /// Name of the failing step, if a step failed.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step_name, .. } => Some(step_name),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Error from a pipeline step with operation context.
#[derive(Error, Debug)]
pub enum StepError {
    /// Input validation failed.
    #[error("Input validation failed: {0}")]
    InvalidInput(String),

    /// Output validation failed.
    #[error("Output validation failed: {0}")]
    InvalidOutput(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Media(#[from] MediaError),

    /// File I/O error.
    #[error("I/O error in {operation}: {source}")]
    IoError {
        operation: String,
        #[source]
        source: io::Error,
    },

    /// A required file was not found.
    #[error("Required file not found: {path}")]
    FileNotFound { path: String },

    /// A precondition was not met.
    #[error("Precondition not met: {0}")]
    PreconditionFailed(String),
}

impl StepError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::InvalidOutput(message.into())
    }

    pub fn io_error(operation: impl Into<String>, source: io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            source,
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed(message.into())
    }
}

/// Result type for step operations.
pub type StepResult<T> = Result<T, StepError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
