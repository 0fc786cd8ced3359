//! Logging infrastructure.
//!
//! This module provides:
//! - A per-run logger writing to a dedicated file (plus optional callback)
//! - Compact mode with progress filtering
//! - Tail buffer of external tool output for error diagnosis
//! - Integration with the `tracing` ecosystem
//!
//! # Example
//!
//! ```no_run
//! use pose2vid_core::logging::{RunLogger, LogConfig};
//!
//! let logger = RunLogger::new("dance-2024", "/tmp/out/logs", LogConfig::default(), None).unwrap();
//!
//! logger.phase("Generate");
//! logger.command("ffmpeg -i raw.mp4 ...");
//! logger.progress(50);
//! logger.success("Prompt finished");
//! ```

mod run_logger;
mod types;

pub use run_logger::RunLogger;
pub use types::{LogCallback, LogConfig, LogLevel, MessagePrefix, ParseLogLevelError};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; otherwise logs this workspace's crates at
/// `default_level` and everything else at `warn`.
///
/// Should be called once at application startup. Later calls are ignored.
pub fn init_tracing(default_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .try_init();
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

/// Filter directive used when `RUST_LOG` is not set.
fn default_filter(level: LogLevel) -> String {
    format!(
        "warn,pose2vid_core={lvl},pose2vid_cli={lvl},txt2video={lvl}",
        lvl = level.as_str()
    )
}
