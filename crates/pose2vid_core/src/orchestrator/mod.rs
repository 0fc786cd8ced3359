//! Run orchestration: setup, the prompt loop and the per-prompt pipeline.
//!
//! # Architecture
//!
//! ```text
//! Session::prepare        config, checkpoint, dirs, models, backend
//! Session::run
//!     for each prompt     (failures are recorded, the batch continues)
//!         Pipeline
//!             ├── Step: Generate
//!             ├── Step: Caption
//!             └── Step: Transcode
//!     run_summary.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pose2vid_core::config::ConfigManager;
//! use pose2vid_core::orchestrator::{Session, SessionOptions};
//!
//! let mut manager = ConfigManager::new("configs/dance.toml");
//! manager.load()?;
//!
//! let mut session = Session::prepare(&manager, SessionOptions {
//!     skeleton_path: Some("pose_example/dance.mp4".into()),
//!     ..SessionOptions::default()
//! })?;
//! let summary = session.run();
//! println!("{} of {} prompts succeeded", summary.succeeded(), summary.results.len());
//! session.shutdown();
//! ```

mod batch;
mod errors;
mod pipeline;
mod session;
mod step;
pub mod steps;
mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::{BatchProcessor, BatchSummary, PromptResult, SUMMARY_FILE};
pub use errors::{PipelineError, PipelineResult, SetupError, StepError, StepResult};
pub use pipeline::{CancelHandle, Pipeline, PipelineRunResult};
pub use session::{Session, SessionOptions};
pub use step::PipelineStep;
pub use steps::{CaptionStep, GenerateStep, TranscodeStep};
pub use types::{
    CaptionOutput, Context, GenerateOutput, ProgressCallback, PromptSpec, PromptState,
    RunResources, StepOutcome, TranscodeOutput,
};

/// Create the standard per-prompt pipeline.
///
/// 1. Generate - backend writes the raw video to `samples/`
/// 2. Caption - prompt burned in, raw video removed
/// 3. Transcode - H.264 encode into the run folder, intermediate removed
pub fn create_standard_pipeline() -> Pipeline {
    Pipeline::new()
        .with_step(GenerateStep::new())
        .with_step(CaptionStep::new())
        .with_step(TranscodeStep::new())
}
