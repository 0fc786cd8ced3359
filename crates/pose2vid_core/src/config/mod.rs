//! Run configuration.
//!
//! This module provides:
//! - TOML-based run config with logical sections
//! - Validation on load with automatic defaults
//! - A reproducibility copy written into the output directory
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use pose2vid_core::config::ConfigManager;
//!
//! let mut config = ConfigManager::new("configs/dance.toml");
//! config.load().unwrap();
//!
//! println!("Prompts: {}", config.settings().unwrap().validation_data.prompts.len());
//! config.echo_to(Path::new("outputs/dance"), None).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult, CONFIG_COPY_NAME};
pub(crate) use manager::atomic_write;
pub use settings::{
    BackendSettings, CaptionSettings, LoggingSettings, MixedPrecision, RunConfig,
    TranscodeSettings, ValidationData,
};
