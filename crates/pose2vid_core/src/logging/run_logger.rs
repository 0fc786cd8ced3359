//! Per-run log file.
//!
//! One [`RunLogger`] is opened per run under `<output_dir>/logs`. Lines are
//! written to the file, handed to an optional callback and mirrored to
//! `tracing`. Output captured from ffmpeg and the generator is kept in a
//! short tail so a failing prompt can show what the tool printed last.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::types::{LogCallback, LogConfig, LogLevel, MessagePrefix};

struct LoggerState {
    writer: Option<BufWriter<File>>,
    tail: VecDeque<String>,
    /// Last progress value written (compact mode).
    last_progress: u32,
}

/// Logger for one run.
pub struct RunLogger {
    run_name: String,
    log_path: PathBuf,
    config: LogConfig,
    callback: Option<LogCallback>,
    state: Mutex<LoggerState>,
}

impl RunLogger {
    /// Open `<log_dir>/<run_name>.log`, creating `log_dir` if needed.
    pub fn new(
        run_name: impl Into<String>,
        log_dir: impl AsRef<Path>,
        config: LogConfig,
        callback: Option<LogCallback>,
    ) -> std::io::Result<Self> {
        let run_name = run_name.into();
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let log_path = log_dir.join(log_file_name(&run_name));
        let writer = BufWriter::new(File::create(&log_path)?);
        let tail_capacity = config.error_tail.max(1);

        Ok(Self {
            run_name,
            log_path,
            config,
            callback,
            state: Mutex::new(LoggerState {
                writer: Some(writer),
                tail: VecDeque::with_capacity(tail_capacity),
                last_progress: 0,
            }),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Write `message` if `level` passes the configured filter.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.config.level {
            return;
        }
        if self.config.mirror_to_tracing {
            mirror(level, &self.run_name, message);
        }
        self.emit(message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, &MessagePrefix::Warning.format(message));
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, &MessagePrefix::Error.format(message));
    }

    /// Echo a command line before it runs.
    pub fn command(&self, command_line: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Command.format(command_line));
    }

    pub fn phase(&self, name: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Phase.format(name));
    }

    pub fn section(&self, name: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Section.format(name));
    }

    pub fn success(&self, message: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Success.format(message));
    }

    /// Log a progress percentage.
    ///
    /// In compact mode only values that reach a new multiple of
    /// `progress_step` (or 100) are written. Returns whether a line was
    /// written.
    pub fn progress(&self, percent: u32) -> bool {
        if self.config.compact {
            let step = self.config.progress_step.max(1);
            let mut state = self.state.lock();
            if percent / step <= state.last_progress / step && percent < 100 {
                return false;
            }
            state.last_progress = percent;
        }
        self.log(LogLevel::Info, &format!("Progress: {}%", percent));
        true
    }

    /// Start progress filtering over for the next prompt.
    pub fn reset_progress(&self) {
        self.state.lock().last_progress = 0;
    }

    /// Record one line printed by an external tool.
    ///
    /// The line always goes to the tail; it reaches the log file only
    /// outside compact mode.
    pub fn output_line(&self, line: &str, is_stderr: bool) {
        {
            let limit = self.config.error_tail.max(1);
            let mut state = self.state.lock();
            while state.tail.len() >= limit {
                state.tail.pop_front();
            }
            state.tail.push_back(line.to_string());
        }

        if !self.config.compact {
            if is_stderr {
                self.emit(&format!("[stderr] {}", line));
            } else {
                self.emit(line);
            }
        }
    }

    /// [`output_line`](Self::output_line) for every non-blank line of `text`.
    pub fn output_block(&self, text: &str, is_stderr: bool) {
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .for_each(|l| self.output_line(l, is_stderr));
    }

    /// Write the captured tool output under a `[<header>/tail]` marker.
    pub fn show_tail(&self, header: &str) {
        let lines: Vec<String> = self.state.lock().tail.iter().cloned().collect();
        if lines.is_empty() {
            return;
        }
        self.emit(&format!("[{}/tail]", header));
        for line in &lines {
            self.emit(line);
        }
    }

    pub fn clear_tail(&self) {
        self.state.lock().tail.clear();
    }

    pub fn tail(&self) -> Vec<String> {
        self.state.lock().tail.iter().cloned().collect()
    }

    pub fn flush(&self) {
        if let Some(writer) = self.state.lock().writer.as_mut() {
            let _ = writer.flush();
        }
    }

    /// Flush and release the log file. Later lines only reach the callback.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(mut writer) = state.writer.take() {
            let _ = writer.flush();
        }
    }

    fn emit(&self, message: &str) {
        let line = if self.config.show_timestamps {
            format!("[{}] {}", Local::now().format("%H:%M:%S"), message)
        } else {
            message.to_string()
        };

        if let Some(writer) = self.state.lock().writer.as_mut() {
            let _ = writeln!(writer, "{}", line);
        }
        if let Some(callback) = &self.callback {
            callback(&line);
        }
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn mirror(level: LogLevel, run: &str, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(run, "{}", message),
        LogLevel::Debug => tracing::debug!(run, "{}", message),
        LogLevel::Info => tracing::info!(run, "{}", message),
        LogLevel::Warn => tracing::warn!(run, "{}", message),
        LogLevel::Error => tracing::error!(run, "{}", message),
    }
}

/// `<run_name>.log` with path separators and reserved characters replaced.
fn log_file_name(run_name: &str) -> String {
    let safe: String = run_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();
    format!("{}.log", safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn quiet_logger(dir: &Path) -> RunLogger {
        RunLogger::new("dance-run", dir, LogConfig::quiet(), None).unwrap()
    }

    #[test]
    fn writes_markers_to_file() {
        let dir = tempdir().unwrap();
        let logger = quiet_logger(dir.path());

        logger.phase("Generate");
        logger.section("Prompt 1/3");
        logger.debug("hidden detail");
        logger.flush();

        assert!(logger.log_path().ends_with("dance-run.log"));
        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(content.contains("=== Generate ==="));
        assert!(content.contains("--- Prompt 1/3 ---"));
        assert!(!content.contains("hidden detail"));
    }

    #[test]
    fn callback_sees_every_line() {
        let dir = tempdir().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let callback: LogCallback = Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let logger = RunLogger::new("run", dir.path(), LogConfig::quiet(), Some(callback)).unwrap();
        logger.info("one");
        logger.success("two");
        logger.close();
        logger.warn("after close");

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn compact_progress_is_throttled() {
        let dir = tempdir().unwrap();
        let logger = quiet_logger(dir.path());

        assert!(!logger.progress(5));
        assert!(!logger.progress(15));
        assert!(logger.progress(20));
        assert!(!logger.progress(25));
        assert!(logger.progress(60));
        assert!(logger.progress(100));

        logger.reset_progress();
        assert!(logger.progress(40));
    }

    #[test]
    fn tail_keeps_latest_tool_lines() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            error_tail: 3,
            ..LogConfig::quiet()
        };
        let logger = RunLogger::new("run", dir.path(), config, None).unwrap();

        logger.output_block("frame=1\n\n  \nframe=2\nframe=3\nframe=4\n", true);
        assert_eq!(logger.tail(), vec!["frame=2", "frame=3", "frame=4"]);

        logger.show_tail("ffmpeg");
        logger.flush();
        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(content.contains("[ffmpeg/tail]"));
        assert!(content.contains("frame=4"));

        logger.clear_tail();
        assert!(logger.tail().is_empty());
    }

    #[test]
    fn verbose_mode_writes_tool_output() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            compact: false,
            ..LogConfig::quiet()
        };
        let logger = RunLogger::new("run", dir.path(), config, None).unwrap();

        logger.output_line("Sampling 3/50", false);
        logger.output_line("warning: low memory", true);
        logger.flush();

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(content.contains("Sampling 3/50"));
        assert!(content.contains("[stderr] warning: low memory"));
    }

    #[test]
    fn log_file_name_replaces_reserved_characters() {
        assert_eq!(log_file_name("dance-2024"), "dance-2024.log");
        assert_eq!(log_file_name("a/b:c"), "a_b_c.log");
    }
}
