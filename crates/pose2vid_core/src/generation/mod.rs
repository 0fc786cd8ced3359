//! Generation dispatch.
//!
//! Diffusion sampling runs outside this crate. A [`GenerationBackend`]
//! receives one [`GenerationRequest`] per prompt and reports the video it
//! wrote. Two backends ship:
//!
//! - [`CommandBackend`]: runs the configured generator program per prompt
//! - [`TestPatternBackend`]: renders an ffmpeg test pattern of the right
//!   size and length, for dry runs of the post-processing path

mod command;
mod test_pattern;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BackendSettings, ValidationData};
use crate::media::{MediaError, MediaTools};
use crate::runtime::{DeviceSpec, WeightDtype};

pub use command::{render_args, CommandBackend, PLACEHOLDERS};
pub use test_pattern::TestPatternBackend;

/// Which backend implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// External generator process.
    #[default]
    Command,
    /// Synthetic ffmpeg test pattern.
    TestPattern,
}

/// Optional generator features the run may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendCapability {
    MemoryEfficientAttention,
    GradientCheckpointing,
    VaeSlicing,
}

impl BackendCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendCapability::MemoryEfficientAttention => "memory_efficient_attention",
            BackendCapability::GradientCheckpointing => "gradient_checkpointing",
            BackendCapability::VaeSlicing => "vae_slicing",
        }
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generator command is not configured")]
    NotConfigured,

    #[error("Generator '{program}' could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Generator exited with code {exit_code}: {message}")]
    Failed { exit_code: i32, message: String },

    #[error("Generator reported success but wrote no video at {0}")]
    MissingOutput(PathBuf),

    #[error("Unknown placeholder '{{{0}}}' in generator arguments")]
    UnknownPlaceholder(String),

    #[error("Failed to encode generation request: {0}")]
    Request(#[from] serde_json::Error),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Media(#[from] MediaError),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// Everything a generator needs for one prompt.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Position of the prompt in the batch.
    pub index: usize,
    pub prompt: String,
    pub seed: u64,
    pub skeleton_path: PathBuf,
    /// Where the generator must write the raw video.
    pub output_path: PathBuf,
    /// Directory for inverted latents when `use_inv_latent` is set.
    pub inv_latents_dir: PathBuf,
    pub validation: ValidationData,
    pub model_root: PathBuf,
    pub dtype: WeightDtype,
    pub device: DeviceSpec,
    pub gradient_checkpointing: bool,
    pub checkpoint: Option<PathBuf>,
    pub global_step: u64,
}

/// A raw video produced by a backend.
#[derive(Debug, Clone)]
pub struct GeneratedVideo {
    pub path: PathBuf,
    pub elapsed: Duration,
    /// Non-blank lines the generator printed.
    pub log_lines: Vec<String>,
}

/// Task-dispatch boundary between the prompt loop and the generator.
pub trait GenerationBackend: Send + Sync {
    /// Short name for logs and the run summary.
    fn name(&self) -> &str;

    /// Features this backend declares.
    fn capabilities(&self) -> &[BackendCapability];

    fn supports(&self, capability: BackendCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Check the backend can run at all. Called once before the first prompt.
    fn prepare(&self) -> GenerationResult<()> {
        Ok(())
    }

    /// Generate one video at `request.output_path`.
    fn generate(&self, request: &GenerationRequest) -> GenerationResult<GeneratedVideo>;
}

/// Build the backend selected in `[backend]`.
pub fn backend_from_settings(
    settings: &BackendSettings,
    tools: &MediaTools,
) -> Arc<dyn GenerationBackend> {
    match settings.kind {
        BackendKind::Command => Arc::new(CommandBackend::from_settings(settings)),
        BackendKind::TestPattern => Arc::new(
            TestPatternBackend::new(tools.clone()).with_capabilities(settings.capabilities.clone()),
        ),
    }
}

#[cfg(test)]
pub(crate) fn sample_request(output_path: PathBuf) -> GenerationRequest {
    let mut validation = ValidationData::with_prompts(vec!["a person dancing".to_string()]);
    validation.width = 64;
    validation.height = 64;
    GenerationRequest {
        index: 0,
        prompt: "a person dancing".to_string(),
        seed: 42,
        skeleton_path: PathBuf::from("pose.mp4"),
        inv_latents_dir: output_path
            .parent()
            .map(|p| p.join("inv_latents"))
            .unwrap_or_default(),
        output_path,
        validation,
        model_root: PathBuf::from("models/sd"),
        dtype: WeightDtype::F16,
        device: DeviceSpec::Cpu,
        gradient_checkpointing: true,
        checkpoint: None,
        global_step: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: BackendKind,
            caps: Vec<BackendCapability>,
        }
        let parsed: Wrapper = toml::from_str(
            "kind = \"test_pattern\"\ncaps = [\"memory_efficient_attention\", \"vae_slicing\"]",
        )
        .unwrap();
        assert_eq!(parsed.kind, BackendKind::TestPattern);
        assert_eq!(parsed.caps[0].as_str(), "memory_efficient_attention");
        assert_eq!(BackendKind::default(), BackendKind::Command);
    }

    #[test]
    fn factory_honours_kind() {
        let tools = MediaTools::default();
        let mut settings = BackendSettings::default();
        settings.command = "gen".to_string();
        assert_eq!(backend_from_settings(&settings, &tools).name(), "command");

        settings.kind = BackendKind::TestPattern;
        settings.capabilities = vec![BackendCapability::VaeSlicing];
        let backend = backend_from_settings(&settings, &tools);
        assert_eq!(backend.name(), "test_pattern");
        assert!(backend.supports(BackendCapability::VaeSlicing));
        assert!(!backend.supports(BackendCapability::MemoryEfficientAttention));
    }
}
