//! Checkpoint discovery and resume-path parsing.
//!
//! Checkpoints are directories named `checkpoint-<global_step>`. A run can
//! resume from an explicit directory or from `"latest"`, the highest-step
//! checkpoint inside the output directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Keyword selecting the most recent checkpoint in the output directory.
pub const LATEST: &str = "latest";

/// Prefix of checkpoint directory names.
pub const CHECKPOINT_PREFIX: &str = "checkpoint-";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    #[error("Cannot read global step from checkpoint '{path}': {reason}")]
    InvalidName { path: PathBuf, reason: String },

    #[error("I/O error while scanning {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where and at which step a run resumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumePoint {
    pub checkpoint_dir: PathBuf,
    pub global_step: u64,
    /// Output root implied by the checkpoint location.
    pub output_root: PathBuf,
}

/// Parse the global step from a checkpoint path.
///
/// The step is the integer after the last `-` of the final path component.
pub fn parse_global_step(path: &Path) -> Result<u64, CheckpointError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| CheckpointError::InvalidName {
            path: path.to_path_buf(),
            reason: "path has no final component".to_string(),
        })?;

    let suffix = name
        .rsplit_once('-')
        .map(|(_, step)| step)
        .ok_or_else(|| CheckpointError::InvalidName {
            path: path.to_path_buf(),
            reason: format!("'{}' has no '-<step>' suffix", name),
        })?;

    suffix.parse::<u64>().map_err(|e| CheckpointError::InvalidName {
        path: path.to_path_buf(),
        reason: format!("'{}' is not a step number: {}", suffix, e),
    })
}

/// Find the checkpoint with the highest step inside `output_dir`.
///
/// Entries that are not `checkpoint-<n>` directories are ignored. A missing
/// output directory simply has no checkpoints.
pub fn find_latest(output_dir: &Path) -> Result<Option<PathBuf>, CheckpointError> {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CheckpointError::Io {
                path: output_dir.to_path_buf(),
                source: e,
            })
        }
    };

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| CheckpointError::Io {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let is_checkpoint = path.is_dir()
            && entry
                .file_name()
                .to_string_lossy()
                .starts_with(CHECKPOINT_PREFIX);
        if !is_checkpoint {
            continue;
        }
        if let Ok(step) = parse_global_step(&path) {
            if best.as_ref().map_or(true, |(s, _)| step > *s) {
                best = Some((step, path));
            }
        }
    }

    Ok(best.map(|(_, path)| path))
}

/// Resolve the `resume_from_checkpoint` setting.
///
/// * `None` - start fresh.
/// * `"latest"` - highest checkpoint under `output_dir`, or fresh if none.
/// * anything else - that directory; the output root becomes its parent.
pub fn resolve_resume(
    setting: Option<&str>,
    output_dir: &Path,
) -> Result<Option<ResumePoint>, CheckpointError> {
    let Some(setting) = setting.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if setting == LATEST {
        return match find_latest(output_dir)? {
            Some(dir) => Ok(Some(ResumePoint {
                global_step: parse_global_step(&dir)?,
                checkpoint_dir: dir,
                output_root: output_dir.to_path_buf(),
            })),
            None => {
                tracing::info!(
                    "No checkpoint found in {}; starting a new run",
                    output_dir.display()
                );
                Ok(None)
            }
        };
    }

    let checkpoint_dir = PathBuf::from(setting);
    if !checkpoint_dir.is_dir() {
        return Err(CheckpointError::NotFound(checkpoint_dir));
    }
    let global_step = parse_global_step(&checkpoint_dir)?;

    let absolute = std::path::absolute(&checkpoint_dir).map_err(|e| CheckpointError::Io {
        path: checkpoint_dir.clone(),
        source: e,
    })?;
    let output_root = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| absolute.clone());

    Ok(Some(ResumePoint {
        checkpoint_dir,
        global_step,
        output_root,
    }))
}
