//! Core types for the per-prompt pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::checkpoint::ResumePoint;
use crate::config::RunConfig;
use crate::generation::{GenerationBackend, GenerationRequest};
use crate::layout::{OutputLayout, PromptPaths};
use crate::logging::RunLogger;
use crate::media::{CaptionStyle, MediaTools, VideoProperties};
use crate::runtime::{DeviceSpec, WeightDtype};

/// Progress callback type for reporting pipeline progress.
///
/// Arguments: (step_name, percent_complete, message)
pub type ProgressCallback = Box<dyn Fn(&str, u32, &str) + Send + Sync>;

/// Everything resolved during setup that every prompt shares.
pub struct RunResources {
    pub config: Arc<RunConfig>,
    pub layout: OutputLayout,
    /// Destination folder for this run's final videos.
    pub run_dir: PathBuf,
    pub skeleton_path: PathBuf,
    pub model_root: PathBuf,
    pub resume: Option<ResumePoint>,
    pub dtype: WeightDtype,
    pub device: DeviceSpec,
    pub tools: MediaTools,
    pub backend: Arc<dyn GenerationBackend>,
    pub caption_style: CaptionStyle,
}

/// One prompt of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub index: usize,
    pub text: String,
    pub seed: u64,
}

/// Read-only context passed to pipeline steps.
///
/// Mutable state goes in `PromptState`.
pub struct Context {
    pub prompt: PromptSpec,
    pub paths: PromptPaths,
    pub resources: Arc<RunResources>,
    pub logger: Arc<RunLogger>,
    progress_callback: Option<ProgressCallback>,
}

impl Context {
    pub fn new(prompt: PromptSpec, resources: Arc<RunResources>, logger: Arc<RunLogger>) -> Self {
        let paths = PromptPaths::new(
            &resources.layout.samples_dir(),
            &resources.run_dir,
            prompt.index,
            &prompt.text,
        );
        Self {
            prompt,
            paths,
            resources,
            logger,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn report_progress(&self, step_name: &str, percent: u32, message: &str) {
        if let Some(ref callback) = self.progress_callback {
            callback(step_name, percent, message);
        }
    }

    /// Short label used in errors and the summary, e.g. `00_a_dancer`.
    pub fn label(&self) -> String {
        self.paths
            .raw
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{:02}", self.prompt.index))
    }

    pub fn config(&self) -> &RunConfig {
        &self.resources.config
    }

    /// Build the request handed to the generation backend.
    pub fn generation_request(&self) -> GenerationRequest {
        let res = &self.resources;
        GenerationRequest {
            index: self.prompt.index,
            prompt: self.prompt.text.clone(),
            seed: self.prompt.seed,
            skeleton_path: res.skeleton_path.clone(),
            output_path: self.paths.raw.clone(),
            inv_latents_dir: res.layout.inv_latents_dir(),
            validation: res.config.validation_data.clone(),
            model_root: res.model_root.clone(),
            dtype: res.dtype,
            device: res.device,
            gradient_checkpointing: res.config.gradient_checkpointing,
            checkpoint: res.resume.as_ref().map(|r| r.checkpoint_dir.clone()),
            global_step: res.resume.as_ref().map_or(0, |r| r.global_step),
        }
    }
}

/// Mutable per-prompt state filled in by the steps.
///
/// Each step writes only its own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptState {
    pub prompt_index: usize,
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate: Option<GenerateOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<CaptionOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcode: Option<TranscodeOutput>,
}

impl PromptState {
    pub fn new(prompt_index: usize) -> Self {
        Self {
            prompt_index,
            started_at: Some(chrono::Local::now().to_rfc3339()),
            ..Default::default()
        }
    }

    /// Video the final encode reads: the captioned intermediate if any,
    /// otherwise the raw sample.
    pub fn encode_input(&self) -> Option<&PathBuf> {
        self.caption
            .as_ref()
            .map(|c| &c.captioned_path)
            .or_else(|| self.generate.as_ref().map(|g| &g.raw_path))
    }
}

/// Output from the Generate step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOutput {
    pub raw_path: PathBuf,
    pub backend: String,
    pub seed: u64,
    pub elapsed_ms: u64,
    pub properties: VideoProperties,
}

/// Output from the Caption step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionOutput {
    /// MPEG-4 intermediate with the caption burned in.
    pub captioned_path: PathBuf,
    pub properties: VideoProperties,
    /// Whether the raw sample was deleted.
    pub raw_removed: bool,
}

/// Output from the Transcode step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeOutput {
    pub final_path: PathBuf,
    pub properties: VideoProperties,
}

/// Result of executing a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step completed successfully.
    Success,
    /// Step was skipped (not an error).
    Skipped(String),
}
