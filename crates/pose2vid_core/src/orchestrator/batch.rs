//! Prompt batch processing and the run summary.
//!
//! Each prompt runs through the standard pipeline on its own. A failed
//! prompt is recorded and the batch moves on to the next one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::atomic_write;
use crate::logging::RunLogger;

use super::pipeline::{CancelHandle, Pipeline, PipelineRunResult};
use super::types::{Context, PromptSpec, PromptState, RunResources};

/// File name of the summary written into the run folder.
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Result of processing a single prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
    pub index: usize,
    pub prompt: String,
    pub seed: u64,
    pub success: bool,
    /// Final captioned video (if successful).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    pub steps_completed: Vec<String>,
    pub steps_skipped: Vec<String>,
}

impl PromptResult {
    pub fn success(prompt: &PromptSpec, output_path: PathBuf, run_result: PipelineRunResult) -> Self {
        Self {
            index: prompt.index,
            prompt: prompt.text.clone(),
            seed: prompt.seed,
            success: true,
            output_path: Some(output_path),
            error: None,
            failed_step: None,
            steps_completed: run_result.steps_completed,
            steps_skipped: run_result.steps_skipped,
        }
    }

    pub fn failure(prompt: &PromptSpec, failed_step: Option<String>, error: impl Into<String>) -> Self {
        Self {
            index: prompt.index,
            prompt: prompt.text.clone(),
            seed: prompt.seed,
            success: false,
            output_path: None,
            error: Some(error.into()),
            failed_step,
            steps_completed: Vec::new(),
            steps_skipped: Vec::new(),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_name: String,
    pub run_dir: PathBuf,
    pub backend: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PathBuf>,
    pub global_step: u64,
    /// Stopped early through a cancel handle.
    pub cancelled: bool,
    pub results: Vec<PromptResult>,
}

impl BatchSummary {
    pub fn new(run_name: impl Into<String>, resources: &RunResources) -> Self {
        Self {
            run_name: run_name.into(),
            run_dir: resources.run_dir.clone(),
            backend: resources.backend.name().to_string(),
            started_at: chrono::Local::now().to_rfc3339(),
            finished_at: None,
            checkpoint: resources.resume.as_ref().map(|r| r.checkpoint_dir.clone()),
            global_step: resources.resume.as_ref().map_or(0, |r| r.global_step),
            cancelled: false,
            results: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Every prompt produced a video and nothing was cancelled.
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.success)
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(chrono::Local::now().to_rfc3339());
    }

    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        atomic_write(path, &json)
    }
}

/// Runs prompts through a pipeline, one at a time.
pub struct BatchProcessor {
    resources: Arc<RunResources>,
    logger: Arc<RunLogger>,
    pipeline: Pipeline,
}

impl BatchProcessor {
    pub fn new(resources: Arc<RunResources>, logger: Arc<RunLogger>, pipeline: Pipeline) -> Self {
        Self {
            resources,
            logger,
            pipeline,
        }
    }

    pub fn resources(&self) -> &Arc<RunResources> {
        &self.resources
    }

    /// Handle that stops the batch at the next step or prompt boundary.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.pipeline.cancel_handle()
    }

    pub fn is_cancelled(&self) -> bool {
        self.pipeline.is_cancelled()
    }

    /// Run one prompt. Never fails; errors end up in the result.
    pub fn process_prompt(&self, prompt: PromptSpec) -> PromptResult {
        let ctx = Context::new(
            prompt.clone(),
            Arc::clone(&self.resources),
            Arc::clone(&self.logger),
        );
        let mut state = PromptState::new(prompt.index);

        self.logger.clear_tail();
        match self.pipeline.run(&ctx, &mut state) {
            Ok(run_result) => {
                let output_path = state
                    .transcode
                    .as_ref()
                    .map(|t| t.final_path.clone())
                    .unwrap_or_else(|| ctx.paths.final_video.clone());
                PromptResult::success(&prompt, output_path, run_result)
            }
            Err(e) => {
                let error_msg = e.to_string();
                self.logger.error(&error_msg);
                PromptResult::failure(&prompt, e.step_name().map(str::to_string), error_msg)
            }
        }
    }

    /// Run every prompt in order, drawing each seed from `next_seed`.
    pub fn process_all<F>(&self, prompts: &[String], mut next_seed: F, summary: &mut BatchSummary)
    where
        F: FnMut() -> u64,
    {
        let total = prompts.len();
        for (index, text) in prompts.iter().enumerate() {
            if self.is_cancelled() {
                self.logger
                    .warn(&format!("Batch cancelled at prompt {}/{}", index + 1, total));
                summary.cancelled = true;
                break;
            }

            self.logger
                .section(&format!("Prompt {}/{}", index + 1, total));
            let spec = PromptSpec {
                index,
                text: text.clone(),
                seed: next_seed(),
            };
            summary.results.push(self.process_prompt(spec));
        }
        // A cancel during the last prompt surfaces as a failed result only
        if self.is_cancelled() {
            summary.cancelled = true;
        }
    }
}
