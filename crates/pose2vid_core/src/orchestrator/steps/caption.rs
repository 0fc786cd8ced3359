//! Caption step - burns the prompt into the raw video.

use std::fs;

use crate::media::{burn_caption, intermediate_path};
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{CaptionOutput, Context, PromptState, StepOutcome};

pub struct CaptionStep;

impl CaptionStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CaptionStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for CaptionStep {
    fn name(&self) -> &str {
        "Caption"
    }

    fn description(&self) -> &str {
        "Burn prompt caption into video"
    }

    fn validate_input(&self, _ctx: &Context) -> StepResult<()> {
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut PromptState) -> StepResult<StepOutcome> {
        let settings = &ctx.config().caption;
        if !settings.enabled {
            return Ok(StepOutcome::Skipped("captions disabled".to_string()));
        }

        let raw = state
            .generate
            .as_ref()
            .map(|g| g.raw_path.clone())
            .ok_or_else(|| StepError::precondition_failed("Generate has not run"))?;
        let captioned = intermediate_path(&raw);

        let properties = burn_caption(
            &ctx.resources.tools,
            &raw,
            &captioned,
            &ctx.prompt.text,
            &ctx.resources.caption_style,
        )?;

        let raw_removed = if settings.keep_raw {
            false
        } else {
            fs::remove_file(&raw).map_err(|e| StepError::io_error("removing raw video", e))?;
            true
        };

        ctx.logger
            .info(&format!("Captioned: {} ({})", captioned.display(), properties));

        state.caption = Some(CaptionOutput {
            captioned_path: captioned,
            properties,
            raw_removed,
        });

        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context, state: &PromptState) -> StepResult<()> {
        let caption = state
            .caption
            .as_ref()
            .ok_or_else(|| StepError::invalid_output("Caption results not recorded"))?;

        if !caption.captioned_path.is_file() {
            return Err(StepError::invalid_output(format!(
                "Captioned video not created: {}",
                caption.captioned_path.display()
            )));
        }
        if let Some(generated) = &state.generate {
            if caption.raw_removed && generated.raw_path.exists() {
                return Err(StepError::invalid_output(format!(
                    "Raw video still present: {}",
                    generated.raw_path.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::test_support::TestRun;

    #[test]
    fn disabled_captions_skip() {
        let run = TestRun::configure(|config| config.caption.enabled = false);
        let ctx = run.context(0, "a dancer");

        let outcome = CaptionStep::new()
            .execute(&ctx, &mut PromptState::new(0))
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
    }

    #[test]
    fn requires_generated_video() {
        let run = TestRun::new();
        let ctx = run.context(0, "a dancer");

        let err = CaptionStep::new()
            .execute(&ctx, &mut PromptState::new(0))
            .unwrap_err();
        assert!(matches!(err, StepError::PreconditionFailed(_)));
    }
}
