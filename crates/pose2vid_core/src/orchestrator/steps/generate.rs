//! Generate step - asks the backend for the raw video of one prompt.

use std::fs;

use crate::media::detect_properties;
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{Context, GenerateOutput, PromptState, StepOutcome};

pub struct GenerateStep;

impl GenerateStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GenerateStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for GenerateStep {
    fn name(&self) -> &str {
        "Generate"
    }

    fn description(&self) -> &str {
        "Generate raw video from prompt and skeleton"
    }

    fn validate_input(&self, ctx: &Context) -> StepResult<()> {
        if ctx.prompt.text.trim().is_empty() {
            return Err(StepError::invalid_input("Prompt is empty"));
        }
        if !ctx.resources.skeleton_path.is_file() {
            return Err(StepError::file_not_found(
                ctx.resources.skeleton_path.display().to_string(),
            ));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut PromptState) -> StepResult<StepOutcome> {
        let backend = &ctx.resources.backend;
        let request = ctx.generation_request();

        ctx.logger.info(&format!(
            "Prompt {}: \"{}\" (seed {}, backend {})",
            ctx.prompt.index,
            ctx.prompt.text,
            request.seed,
            backend.name()
        ));

        let video = backend.generate(&request)?;
        for line in &video.log_lines {
            ctx.logger.output_line(line, false);
        }

        // Unreadable generator output fails here, before any caption file exists
        let properties = match detect_properties(&ctx.resources.tools, &video.path) {
            Ok(properties) => properties,
            Err(e) => {
                if video.path.is_file() {
                    if let Err(remove_err) = fs::remove_file(&video.path) {
                        ctx.logger.warn(&format!(
                            "Failed to remove unreadable video {}: {}",
                            video.path.display(),
                            remove_err
                        ));
                    }
                }
                return Err(e.into());
            }
        };
        let v = &ctx.config().validation_data;
        if properties.width != v.width || properties.height != v.height {
            ctx.logger.warn(&format!(
                "Generator wrote {}x{}, requested {}x{}",
                properties.width, properties.height, v.width, v.height
            ));
        }
        if properties.frame_count != u64::from(v.video_length) {
            ctx.logger.warn(&format!(
                "Generator wrote {} frames, requested {}",
                properties.frame_count, v.video_length
            ));
        }

        ctx.logger.info(&format!(
            "Raw video: {} ({}) in {:.1}s",
            video.path.display(),
            properties,
            video.elapsed.as_secs_f64()
        ));

        state.generate = Some(GenerateOutput {
            raw_path: video.path,
            backend: backend.name().to_string(),
            seed: request.seed,
            elapsed_ms: video.elapsed.as_millis() as u64,
            properties,
        });

        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context, state: &PromptState) -> StepResult<()> {
        let generated = state
            .generate
            .as_ref()
            .ok_or_else(|| StepError::invalid_output("Generation results not recorded"))?;

        if !generated.raw_path.is_file() {
            return Err(StepError::invalid_output(format!(
                "Raw video not created: {}",
                generated.raw_path.display()
            )));
        }
        Ok(())
    }
}
