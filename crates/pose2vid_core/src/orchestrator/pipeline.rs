//! Sequential step runner for one prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::errors::{PipelineError, PipelineResult, StepResult};
use super::step::PipelineStep;
use super::types::{Context, PromptState, StepOutcome};

/// Ordered list of steps run for every prompt.
///
/// A step's input is validated before it runs and its output after it
/// succeeds. The first error ends the run; cancellation is checked between
/// steps.
pub struct Pipeline {
    steps: Vec<Box<dyn PipelineStep>>,
    cancelled: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append a step.
    pub fn with_step<S: PipelineStep + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Handle that stops this pipeline (and the batch driving it) at the
    /// next step boundary.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step for the prompt in `ctx`.
    pub fn run(&self, ctx: &Context, state: &mut PromptState) -> PipelineResult<PipelineRunResult> {
        let label = ctx.label();
        let mut result = PipelineRunResult::default();
        ctx.logger.reset_progress();

        for (position, step) in self.steps.iter().enumerate() {
            let name = step.name();
            if self.is_cancelled() {
                ctx.logger
                    .warn(&format!("Cancelled before step '{}'", name));
                return Err(PipelineError::cancelled(&label));
            }

            let percent = (position * 100 / self.steps.len()) as u32;
            ctx.logger.phase(step.description());
            ctx.logger.progress(percent);
            ctx.report_progress(name, percent, step.description());

            match Self::run_step(step.as_ref(), ctx, state) {
                Ok(StepOutcome::Success) => {
                    ctx.logger.success(&format!("{} completed", name));
                    result.steps_completed.push(name.to_string());
                }
                Ok(StepOutcome::Skipped(reason)) => {
                    ctx.logger.info(&format!("{} skipped: {}", name, reason));
                    result.steps_skipped.push(name.to_string());
                }
                Err(e) => {
                    ctx.logger.error(&format!("{} failed: {}", name, e));
                    return Err(PipelineError::step_failed(&label, name, e));
                }
            }
        }

        ctx.logger.progress(100);
        ctx.report_progress("Complete", 100, "All steps finished");
        Ok(result)
    }

    fn run_step(
        step: &dyn PipelineStep,
        ctx: &Context,
        state: &mut PromptState,
    ) -> StepResult<StepOutcome> {
        ctx.logger.debug(&format!("{}: validating input", step.name()));
        step.validate_input(ctx)?;

        let outcome = step.execute(ctx, state)?;
        if outcome == StepOutcome::Success {
            ctx.logger.debug(&format!("{}: validating output", step.name()));
            step.validate_output(ctx, state)?;
        }
        Ok(outcome)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for cancelling a running pipeline.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Stop at the next step or prompt boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Step names by outcome, in run order.
#[derive(Debug, Clone, Default)]
pub struct PipelineRunResult {
    pub steps_completed: Vec<String>,
    pub steps_skipped: Vec<String>,
}

impl PipelineRunResult {
    /// No step was skipped.
    pub fn all_completed(&self) -> bool {
        self.steps_skipped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::errors::{StepError, StepResult};
    use crate::orchestrator::test_support::TestRun;
    use parking_lot::Mutex;

    struct RecordingStep {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        skip: bool,
    }

    impl RecordingStep {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                fail: false,
                skip: false,
            }
        }
    }

    impl PipelineStep for RecordingStep {
        fn name(&self) -> &str {
            self.name
        }

        fn validate_input(&self, _ctx: &Context) -> StepResult<()> {
            Ok(())
        }

        fn execute(&self, _ctx: &Context, _state: &mut PromptState) -> StepResult<StepOutcome> {
            self.log.lock().push(self.name);
            if self.fail {
                return Err(StepError::precondition_failed("boom"));
            }
            if self.skip {
                return Ok(StepOutcome::Skipped("not needed".to_string()));
            }
            Ok(StepOutcome::Success)
        }

        fn validate_output(&self, _ctx: &Context, _state: &PromptState) -> StepResult<()> {
            Ok(())
        }
    }

    #[test]
    fn runs_steps_in_order() {
        let run = TestRun::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut skipped = RecordingStep::new("B", &log);
        skipped.skip = true;
        let pipeline = Pipeline::new()
            .with_step(RecordingStep::new("A", &log))
            .with_step(skipped)
            .with_step(RecordingStep::new("C", &log));

        assert_eq!(pipeline.step_names(), vec!["A", "B", "C"]);

        let ctx = run.context(0, "a dancer");
        let result = pipeline.run(&ctx, &mut PromptState::new(0)).unwrap();

        assert_eq!(*log.lock(), vec!["A", "B", "C"]);
        assert_eq!(result.steps_completed, vec!["A", "C"]);
        assert_eq!(result.steps_skipped, vec!["B"]);
        assert!(!result.all_completed());
    }

    #[test]
    fn failure_stops_remaining_steps() {
        let run = TestRun::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = RecordingStep::new("B", &log);
        failing.fail = true;
        let pipeline = Pipeline::new()
            .with_step(RecordingStep::new("A", &log))
            .with_step(failing)
            .with_step(RecordingStep::new("C", &log));

        let ctx = run.context(1, "a dancer");
        let err = pipeline.run(&ctx, &mut PromptState::new(1)).unwrap_err();

        assert_eq!(*log.lock(), vec!["A", "B"]);
        assert_eq!(err.step_name(), Some("B"));
        assert!(err.to_string().contains("01_a_dancer"));
    }

    #[test]
    fn progress_callback_sees_each_step() {
        let run = TestRun::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with_step(RecordingStep::new("A", &log))
            .with_step(RecordingStep::new("B", &log));

        let reports: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let ctx = run
            .context(0, "a dancer")
            .with_progress_callback(Box::new(move |step, percent, _| {
                sink.lock().push((step.to_string(), percent));
            }));
        pipeline.run(&ctx, &mut PromptState::new(0)).unwrap();

        assert_eq!(
            *reports.lock(),
            vec![
                ("A".to_string(), 0),
                ("B".to_string(), 50),
                ("Complete".to_string(), 100)
            ]
        );
    }

    #[test]
    fn cancel_handle_stops_before_first_step() {
        let run = TestRun::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new().with_step(RecordingStep::new("A", &log));
        let handle = pipeline.cancel_handle();

        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(pipeline.is_cancelled());

        let ctx = run.context(0, "p");
        let err = pipeline.run(&ctx, &mut PromptState::new(0)).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
        assert!(log.lock().is_empty());
    }
}
