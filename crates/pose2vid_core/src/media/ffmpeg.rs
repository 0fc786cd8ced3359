//! ffmpeg/ffprobe invocation.
//!
//! Every external call goes through [`MediaTools::run`], which logs the
//! command line and the tool's output to the run logger (or `tracing` when
//! no logger is attached) and turns a non-zero exit into
//! [`MediaError::CommandFailed`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use super::error::{MediaError, MediaResult};
use crate::config::TranscodeSettings;
use crate::logging::RunLogger;

/// Number of stderr lines kept in a failure message.
const ERROR_CONTEXT_LINES: usize = 5;

/// Locations of the ffmpeg tools plus an optional logger.
#[derive(Clone)]
pub struct MediaTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    logger: Option<Arc<RunLogger>>,
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            logger: None,
        }
    }
}

impl std::fmt::Debug for MediaTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTools")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .field("logged", &self.logger.is_some())
            .finish()
    }
}

impl MediaTools {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            logger: None,
        }
    }

    pub fn from_settings(settings: &TranscodeSettings) -> Self {
        Self::new(&settings.ffmpeg_path, &settings.ffprobe_path)
    }

    /// Route command lines and tool output to a run logger.
    pub fn with_logger(mut self, logger: Arc<RunLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn ffmpeg_path(&self) -> &PathBuf {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> &PathBuf {
        &self.ffprobe
    }

    /// Check both tools start and report a version.
    pub fn is_available(&self) -> bool {
        [&self.ffmpeg, &self.ffprobe].iter().all(|tool| {
            Command::new(tool)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    }

    /// Run ffmpeg with `args`, overwriting outputs and never reading stdin.
    pub fn ffmpeg(&self, args: Vec<OsString>) -> MediaResult<Output> {
        let mut full: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-loglevel", "error"]
            .iter()
            .map(OsString::from)
            .collect();
        full.extend(args);
        self.run("ffmpeg", &self.ffmpeg, full)
    }

    /// Run ffprobe with `args`.
    pub fn ffprobe(&self, args: Vec<OsString>) -> MediaResult<Output> {
        self.run("ffprobe", &self.ffprobe, args)
    }

    fn run(&self, tool: &str, program: &PathBuf, args: Vec<OsString>) -> MediaResult<Output> {
        let cmd_line = std::iter::once(program.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        match &self.logger {
            Some(logger) => logger.command(&cmd_line),
            None => tracing::debug!("Running {}: {}", tool, cmd_line),
        }

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| MediaError::ToolUnavailable {
                tool: tool.to_string(),
                source: e,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(logger) = &self.logger {
            logger.output_block(&stderr, true);
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            if let Some(logger) = &self.logger {
                logger.show_tail(&format!("{} output", tool));
            }
            return Err(MediaError::CommandFailed {
                tool: tool.to_string(),
                exit_code,
                message: last_lines(&stderr, ERROR_CONTEXT_LINES),
            });
        }

        Ok(output)
    }
}

/// Last `n` non-blank lines of `text`, joined with `" | "`.
fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return "no error output".to_string();
    }
    lines[lines.len().saturating_sub(n)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_keeps_last_lines() {
        let stderr = "a\n\nb\nc\nd\ne\nf\n";
        assert_eq!(last_lines(stderr, 3), "d | e | f");
        assert_eq!(last_lines("", 3), "no error output");
    }

    #[test]
    fn missing_tool_is_unavailable() {
        let tools = MediaTools::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(!tools.is_available());

        let err = tools.ffmpeg(vec!["-version".into()]).unwrap_err();
        assert!(matches!(err, MediaError::ToolUnavailable { .. }));
    }

    #[test]
    fn settings_select_tool_paths() {
        let settings = TranscodeSettings {
            ffmpeg_path: "/opt/ff/ffmpeg".to_string(),
            ..TranscodeSettings::default()
        };
        let tools = MediaTools::from_settings(&settings);
        assert_eq!(tools.ffmpeg_path(), &PathBuf::from("/opt/ff/ffmpeg"));
        assert_eq!(tools.ffprobe_path(), &PathBuf::from("ffprobe"));
    }
}
