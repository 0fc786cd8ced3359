//! Transcode step - encodes the final H.264 video into the run folder.

use std::fs;

use crate::media::transcode_h264;
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{Context, PromptState, StepOutcome, TranscodeOutput};

pub struct TranscodeStep;

impl TranscodeStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TranscodeStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for TranscodeStep {
    fn name(&self) -> &str {
        "Transcode"
    }

    fn description(&self) -> &str {
        "Encode final H.264 video"
    }

    fn validate_input(&self, ctx: &Context) -> StepResult<()> {
        if let Some(parent) = ctx.paths.final_video.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StepError::io_error("creating run folder", e))?;
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut PromptState) -> StepResult<StepOutcome> {
        let input = state
            .encode_input()
            .cloned()
            .ok_or_else(|| StepError::precondition_failed("No video to encode"))?;
        let output = &ctx.paths.final_video;
        let settings = &ctx.config().transcode;

        ctx.logger.info(&format!(
            "Encoding {} (crf {}, preset {}) -> {}",
            settings.codec,
            settings.crf,
            settings.preset,
            output.display()
        ));

        let result = transcode_h264(&ctx.resources.tools, &input, output, settings);

        // The captioned intermediate always goes; a raw input only once encoded
        let remove_input = match state.caption {
            Some(_) => true,
            None => result.is_ok() && !ctx.config().caption.keep_raw,
        };
        if remove_input {
            if let Err(e) = fs::remove_file(&input) {
                ctx.logger.warn(&format!(
                    "Failed to remove intermediate {}: {}",
                    input.display(),
                    e
                ));
            }
        }
        let properties = result?;

        state.transcode = Some(TranscodeOutput {
            final_path: output.clone(),
            properties,
        });

        ctx.logger.success(&format!(
            "Saved: {}",
            output.file_name().unwrap_or_default().to_string_lossy()
        ));

        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, ctx: &Context, state: &PromptState) -> StepResult<()> {
        let transcode = state
            .transcode
            .as_ref()
            .ok_or_else(|| StepError::invalid_output("Transcode results not recorded"))?;

        if !transcode.final_path.is_file() {
            return Err(StepError::invalid_output(format!(
                "Output file not created: {}",
                transcode.final_path.display()
            )));
        }
        if let Some(caption) = &state.caption {
            if caption.captioned_path.exists() {
                return Err(StepError::invalid_output(format!(
                    "Intermediate still present: {}",
                    caption.captioned_path.display()
                )));
            }
        }
        if transcode.properties.codec_name != "h264" && ctx.config().transcode.codec == "libx264" {
            return Err(StepError::invalid_output(format!(
                "Expected H.264 output, got {}",
                transcode.properties.codec_name
            )));
        }
        Ok(())
    }
}
