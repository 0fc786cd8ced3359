//! Run configuration loaded from a TOML file.
//!
//! Top-level keys carry the model path, output directory and runtime flags.
//! Tables group validation parameters and the generation/post-processing
//! tooling. Every field except `pretrained_model_path`, `output_dir` and
//! `validation_data.prompts` has a default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::generation::{BackendCapability, BackendKind};
use crate::logging::{LogConfig, LogLevel};

/// Root configuration for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Local directory or hub repo id of the pretrained bundle.
    pub pretrained_model_path: String,

    /// Directory receiving `samples/`, `inv_latents/`, logs and the config copy.
    pub output_dir: String,

    /// Root folder for finished videos (one subfolder per run).
    #[serde(default = "default_destination_dir")]
    pub destination_dir: String,

    #[serde(default = "default_validation_steps")]
    pub validation_steps: u32,

    #[serde(default = "default_one")]
    pub train_batch_size: u32,

    #[serde(default = "default_one")]
    pub gradient_accumulation_steps: u32,

    #[serde(default = "default_true")]
    pub gradient_checkpointing: bool,

    /// Checkpoint directory, or `"latest"`.
    #[serde(default)]
    pub resume_from_checkpoint: Option<String>,

    #[serde(default)]
    pub mixed_precision: MixedPrecision,

    #[serde(default = "default_true")]
    pub enable_xformers_memory_efficient_attention: bool,

    /// Seed for the run RNG. Unseeded runs draw from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Device string: `cpu`, `cuda` or `cuda:N`.
    #[serde(default = "default_device")]
    pub device: String,

    /// Skeleton/pose data path. The CLI flag overrides this.
    #[serde(default)]
    pub skeleton_path: Option<String>,

    pub validation_data: ValidationData,

    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub caption: CaptionSettings,

    #[serde(default)]
    pub transcode: TranscodeSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_destination_dir() -> String {
    "GeneratedVideos".to_string()
}

fn default_validation_steps() -> u32 {
    100
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_device() -> String {
    "cuda:0".to_string()
}

impl RunConfig {
    /// Check value ranges that serde cannot express, plus backend
    /// readiness.
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.validate_values();
        if self.backend.kind == BackendKind::Command && self.backend.command.trim().is_empty() {
            issues.push("backend.command must be set for the command backend".to_string());
        }
        issues
    }

    /// Value checks that hold regardless of which backend ends up running.
    ///
    /// Used at load time, before command-line overrides such as a dry run
    /// switch the backend.
    pub fn validate_values(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.pretrained_model_path.trim().is_empty() {
            issues.push("pretrained_model_path must not be empty".to_string());
        }
        if self.output_dir.trim().is_empty() {
            issues.push("output_dir must not be empty".to_string());
        }
        if self.destination_dir.trim().is_empty() {
            issues.push("destination_dir must not be empty".to_string());
        }
        if self.train_batch_size == 0 {
            issues.push("train_batch_size must be at least 1".to_string());
        }
        if self.gradient_accumulation_steps == 0 {
            issues.push("gradient_accumulation_steps must be at least 1".to_string());
        }
        if matches!(&self.resume_from_checkpoint, Some(s) if s.trim().is_empty()) {
            issues.push("resume_from_checkpoint must not be an empty string".to_string());
        }

        issues.extend(self.validation_data.validate());

        if self.caption.font_size == 0 {
            issues.push("caption.font_size must be at least 1".to_string());
        }
        if self.transcode.codec.trim().is_empty() {
            issues.push("transcode.codec must not be empty".to_string());
        }

        issues
    }
}

/// Precision used for inference weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixedPrecision {
    /// Full precision.
    No,
    #[default]
    Fp16,
    Bf16,
}

/// Prompts and sampling parameters for the generation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationData {
    /// One video is generated per prompt, in order.
    pub prompts: Vec<String>,

    /// Frames per generated clip.
    #[serde(default = "default_video_length")]
    pub video_length: u32,

    #[serde(default = "default_dimension")]
    pub width: u32,

    #[serde(default = "default_dimension")]
    pub height: u32,

    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,

    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,

    #[serde(default)]
    pub use_inv_latent: bool,

    #[serde(default = "default_inference_steps")]
    pub num_inv_steps: u32,

    /// Frame rate of the written clip.
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_video_length() -> u32 {
    8
}

fn default_dimension() -> u32 {
    512
}

fn default_inference_steps() -> u32 {
    50
}

fn default_guidance_scale() -> f64 {
    12.5
}

fn default_fps() -> u32 {
    8
}

impl ValidationData {
    /// Default sampling parameters for `prompts`.
    pub fn with_prompts(prompts: Vec<String>) -> Self {
        Self {
            prompts,
            video_length: default_video_length(),
            width: default_dimension(),
            height: default_dimension(),
            num_inference_steps: default_inference_steps(),
            guidance_scale: default_guidance_scale(),
            use_inv_latent: false,
            num_inv_steps: default_inference_steps(),
            fps: default_fps(),
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.prompts.is_empty() {
            issues.push("validation_data.prompts must contain at least one prompt".to_string());
        }
        for (i, prompt) in self.prompts.iter().enumerate() {
            if prompt.trim().is_empty() {
                issues.push(format!("validation_data.prompts[{}] is blank", i));
            }
        }
        // Latent space is 1/8 of pixel space, and yuv420p needs even sizes.
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 8 != 0 {
                issues.push(format!(
                    "validation_data.{} must be a positive multiple of 8 (got {})",
                    name, value
                ));
            }
        }
        if self.video_length == 0 {
            issues.push("validation_data.video_length must be at least 1".to_string());
        }
        if self.num_inference_steps == 0 {
            issues.push("validation_data.num_inference_steps must be at least 1".to_string());
        }
        if self.num_inv_steps == 0 {
            issues.push("validation_data.num_inv_steps must be at least 1".to_string());
        }
        if self.fps == 0 {
            issues.push("validation_data.fps must be at least 1".to_string());
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            issues.push("validation_data.guidance_scale must be a non-negative number".to_string());
        }

        issues
    }
}

/// How generation requests are dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,

    /// Program run once per prompt (command backend).
    #[serde(default)]
    pub command: String,

    /// Arguments with `{placeholder}` substitution.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the generator process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for the generator process.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Features the generator supports.
    #[serde(default)]
    pub capabilities: Vec<BackendCapability>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            capabilities: Vec::new(),
        }
    }
}

/// Caption burn-in style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionSettings {
    /// Burn the prompt into each frame.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_font_size")]
    pub font_size: u32,

    /// Any ffmpeg color expression.
    #[serde(default = "default_font_color")]
    pub font_color: String,

    /// Distance from the top edge, in pixels.
    #[serde(default = "default_top_margin")]
    pub top_margin: u32,

    /// TrueType font; fontconfig default when unset.
    #[serde(default)]
    pub font_file: Option<String>,

    /// Outline width in pixels (0 disables).
    #[serde(default)]
    pub border_width: u32,

    #[serde(default = "default_border_color")]
    pub border_color: String,

    /// Keep the uncaptioned generator output.
    #[serde(default)]
    pub keep_raw: bool,
}

fn default_font_size() -> u32 {
    24
}

fn default_font_color() -> String {
    "black".to_string()
}

fn default_top_margin() -> u32 {
    10
}

fn default_border_color() -> String {
    "white".to_string()
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            font_size: default_font_size(),
            font_color: default_font_color(),
            top_margin: default_top_margin(),
            font_file: None,
            border_width: 0,
            border_color: default_border_color(),
            keep_raw: false,
        }
    }
}

/// Final encode settings and tool locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSettings {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,

    #[serde(default = "default_codec")]
    pub codec: String,

    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    #[serde(default = "default_crf")]
    pub crf: u32,

    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_codec() -> String {
    "libx264".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_crf() -> u32 {
    18
}

fn default_preset() -> String {
    "medium".to_string()
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            codec: default_codec(),
            pixel_format: default_pixel_format(),
            crf: default_crf(),
            preset: default_preset(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Use compact log format.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of tool output lines to show on error.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Progress update step percentage.
    #[serde(default = "default_progress_step")]
    pub progress_step: u32,
}

fn default_error_tail() -> u32 {
    20
}

fn default_progress_step() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            compact: true,
            error_tail: default_error_tail(),
            progress_step: default_progress_step(),
        }
    }
}

impl LoggingSettings {
    /// Build the run logger configuration from these settings.
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            compact: self.compact,
            progress_step: self.progress_step,
            error_tail: self.error_tail as usize,
            ..LogConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
pretrained_model_path = "./checkpoints/stable-diffusion-v1-4"
output_dir = "./outputs/dance"

[validation_data]
prompts = ["a man is dancing on the beach"]

[backend]
command = "python"
"#;

    #[test]
    fn missing_fields_use_defaults() {
        let config: RunConfig = toml::from_str(MINIMAL).unwrap();

        assert_eq!(config.destination_dir, "GeneratedVideos");
        assert_eq!(config.mixed_precision, MixedPrecision::Fp16);
        assert!(config.enable_xformers_memory_efficient_attention);
        assert_eq!(config.validation_data.video_length, 8);
        assert_eq!(config.validation_data.num_inv_steps, 50);
        assert!((config.validation_data.guidance_scale - 12.5).abs() < f64::EPSILON);
        assert!(config.caption.enabled);
        assert_eq!(config.transcode.codec, "libx264");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_precision_names() {
        let text = MINIMAL.replace(
            "output_dir = \"./outputs/dance\"",
            "output_dir = \"./outputs/dance\"\nmixed_precision = \"bf16\"",
        );
        let config: RunConfig = toml::from_str(&text).unwrap();
        assert_eq!(config.mixed_precision, MixedPrecision::Bf16);

        let text = MINIMAL.replace(
            "output_dir = \"./outputs/dance\"",
            "output_dir = \"./outputs/dance\"\nmixed_precision = \"fp8\"",
        );
        assert!(toml::from_str::<RunConfig>(&text).is_err());
    }

    #[test]
    fn missing_prompts_is_a_parse_error() {
        let text = r#"
pretrained_model_path = "a"
output_dir = "b"
"#;
        assert!(toml::from_str::<RunConfig>(text).is_err());
    }

    #[test]
    fn validate_reports_every_issue() {
        let mut config: RunConfig = toml::from_str(MINIMAL).unwrap();
        config.validation_data.prompts.push("   ".to_string());
        config.validation_data.width = 500;
        config.validation_data.fps = 0;
        config.backend.command.clear();

        let issues = config.validate();
        assert_eq!(issues.len(), 4, "{:?}", issues);
        assert!(issues.iter().any(|i| i.contains("prompts[1]")));
        assert!(issues.iter().any(|i| i.contains("width")));
        assert!(issues.iter().any(|i| i.contains("backend.command")));
    }

    #[test]
    fn missing_command_is_not_a_value_issue() {
        let mut config: RunConfig = toml::from_str(MINIMAL).unwrap();
        config.backend.kind = BackendKind::Command;
        config.backend.command.clear();

        assert!(config.validate_values().is_empty());
        let issues = config.validate();
        assert_eq!(issues.len(), 1, "{:?}", issues);
        assert!(issues[0].contains("backend.command"));
    }

    #[test]
    fn test_pattern_backend_needs_no_command() {
        let mut config: RunConfig = toml::from_str(MINIMAL).unwrap();
        config.backend.kind = BackendKind::TestPattern;
        config.backend.command.clear();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn logging_settings_map_to_log_config() {
        let settings = LoggingSettings {
            level: LogLevel::Debug,
            compact: false,
            error_tail: 7,
            progress_step: 10,
        };
        let config = settings.to_log_config();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.compact);
        assert_eq!(config.error_tail, 7);
    }
}
