//! Run setup and the generation loop.
//!
//! [`Session::prepare`] performs every check that can abort a run before
//! the first prompt: config validation, checkpoint resume, output
//! directories, runtime context, model bundle, ffmpeg tools and backend
//! capabilities. [`Session::run`] then processes the prompts and writes the
//! run summary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;

use crate::checkpoint::resolve_resume;
use crate::config::{ConfigError, ConfigManager};
use crate::generation::{backend_from_settings, BackendCapability, GenerationBackend};
use crate::layout::{create_unique_dir, run_folder_name, OutputLayout};
use crate::logging::RunLogger;
use crate::media::{CaptionStyle, MediaTools};
use crate::models::{ModelBundle, ModelSource};
use crate::runtime::{detect_process_index, RuntimeContext};

use super::batch::{BatchProcessor, BatchSummary, SUMMARY_FILE};
use super::create_standard_pipeline;
use super::errors::SetupError;
use super::pipeline::CancelHandle;
use super::types::RunResources;

/// Options that override or extend the config file.
#[derive(Default)]
pub struct SessionOptions {
    /// Wins over `skeleton_path` in the config.
    pub skeleton_path: Option<PathBuf>,
    /// Use this backend instead of the one in `[backend]`.
    pub backend: Option<Arc<dyn GenerationBackend>>,
    /// Process rank; read from the environment when unset.
    pub process_index: Option<usize>,
}

/// A prepared run.
pub struct Session {
    runtime: RuntimeContext,
    batch: BatchProcessor,
    run_name: String,
}

impl Session {
    /// Validate the config and set up everything the prompts share.
    pub fn prepare(manager: &ConfigManager, options: SessionOptions) -> Result<Self, SetupError> {
        let mut config = manager.settings()?.clone();

        let skeleton = options
            .skeleton_path
            .or_else(|| config.skeleton_path.as_ref().map(PathBuf::from))
            .ok_or(SetupError::MissingSkeleton)?;
        if !skeleton.is_file() {
            return Err(SetupError::SkeletonNotFound(skeleton));
        }
        config.skeleton_path = Some(skeleton.to_string_lossy().to_string());

        let issues = config.validate();
        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues).into());
        }

        let process_index = options.process_index.unwrap_or_else(detect_process_index);
        let is_main = process_index == 0;

        let output_dir = PathBuf::from(&config.output_dir);
        let resume = resolve_resume(config.resume_from_checkpoint.as_deref(), &output_dir)?;
        let layout = OutputLayout::new(
            resume
                .as_ref()
                .map(|r| r.output_root.clone())
                .unwrap_or(output_dir),
        );
        if is_main {
            layout
                .create()
                .map_err(|e| SetupError::directory(layout.root(), e))?;
        }

        let started = Local::now();
        let run_name = run_folder_name(&manager.config_stem(), &started);
        let log_name = if is_main {
            run_name.clone()
        } else {
            format!("{}-rank{}", run_name, process_index)
        };
        let logger = Arc::new(
            RunLogger::new(&log_name, layout.logs_dir(), config.logging.to_log_config(), None)
                .map_err(SetupError::Logger)?,
        );
        logger.phase("Setup");
        logger.info(&format!("Config: {}", manager.path().display()));
        logger.info(&format!("Output directory: {}", layout.root().display()));
        if let Some(resume) = &resume {
            logger.info(&format!(
                "Resuming from {} (global step {})",
                resume.checkpoint_dir.display(),
                resume.global_step
            ));
        }

        let config = Arc::new(config);
        let runtime = RuntimeContext::new(Arc::clone(&config), process_index, Arc::clone(&logger))?;

        let bundle = ModelBundle::resolve(ModelSource::parse(&config.pretrained_model_path))?;
        bundle.check_steps(config.validation_data.num_inference_steps)?;
        if config.validation_data.use_inv_latent {
            bundle.check_steps(config.validation_data.num_inv_steps)?;
        }
        logger.info(&format!(
            "Model bundle: {} (scheduler {}, {} training timesteps)",
            bundle.root().display(),
            bundle
                .scheduler()
                .class_name
                .as_deref()
                .unwrap_or("unknown"),
            bundle.scheduler().num_train_timesteps
        ));
        logger.debug(&format!(
            "Training flags: validation_steps={}, train_batch_size={}, gradient_accumulation_steps={}",
            config.validation_steps, config.train_batch_size, config.gradient_accumulation_steps
        ));

        let tools = MediaTools::from_settings(&config.transcode).with_logger(Arc::clone(&logger));
        if !tools.is_available() {
            return Err(SetupError::ToolsUnavailable {
                ffmpeg: tools.ffmpeg_path().clone(),
                ffprobe: tools.ffprobe_path().clone(),
            });
        }

        let backend = options
            .backend
            .unwrap_or_else(|| backend_from_settings(&config.backend, &tools));
        check_capabilities(backend.as_ref(), &config, &logger)?;
        backend.prepare()?;

        let run_dir = if is_main {
            manager.echo_to(layout.root(), Some(&skeleton))?;
            let destination = Path::new(&config.destination_dir);
            create_unique_dir(destination, &run_name)
                .map_err(|e| SetupError::directory(destination.join(&run_name), e))?
        } else {
            PathBuf::from(&config.destination_dir).join(&run_name)
        };
        logger.info(&format!("Run folder: {}", run_dir.display()));

        let resources = Arc::new(RunResources {
            caption_style: CaptionStyle::from(&config.caption),
            config: Arc::clone(&config),
            layout,
            run_dir,
            skeleton_path: skeleton,
            model_root: bundle.root().to_path_buf(),
            resume,
            dtype: runtime.dtype(),
            device: runtime.device(),
            tools,
            backend,
        });

        let batch = BatchProcessor::new(resources, logger, create_standard_pipeline());
        Ok(Self {
            runtime,
            batch,
            run_name,
        })
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_dir(&self) -> &Path {
        &self.batch.resources().run_dir
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.batch.cancel_handle()
    }

    /// Generate every prompt and write `run_summary.json`.
    ///
    /// Non-main processes return an empty summary without generating.
    pub fn run(&mut self) -> BatchSummary {
        let resources = Arc::clone(self.batch.resources());
        let logger = Arc::clone(self.runtime.logger());
        let mut summary = BatchSummary::new(&self.run_name, &resources);

        if !self.runtime.is_main_process() {
            logger.info(&format!(
                "Process {} is not the main process; skipping generation",
                self.runtime.process_index()
            ));
            summary.finish();
            return summary;
        }

        let prompts = &resources.config.validation_data.prompts;
        logger.phase(&format!("Generating {} video(s)", prompts.len()));

        let runtime = &mut self.runtime;
        self.batch
            .process_all(prompts, || runtime.next_seed(), &mut summary);
        summary.finish();

        let summary_path = resources.run_dir.join(SUMMARY_FILE);
        if let Err(e) = summary.write_json(&summary_path) {
            logger.error(&format!("Failed to write {}: {}", summary_path.display(), e));
        }

        if summary.all_succeeded() {
            logger.success(&format!(
                "All {} video(s) saved to {}",
                summary.succeeded(),
                resources.run_dir.display()
            ));
        } else {
            logger.warn(&format!(
                "{} of {} prompt(s) failed",
                summary.failed(),
                summary.results.len()
            ));
        }

        summary
    }

    /// Flush logs and release the run context.
    pub fn shutdown(self) {
        self.runtime.shutdown();
    }
}

/// Fail if the run asks for memory-efficient attention the backend lacks.
///
/// Other missing capabilities only warn.
fn check_capabilities(
    backend: &dyn GenerationBackend,
    config: &crate::config::RunConfig,
    logger: &RunLogger,
) -> Result<(), SetupError> {
    if config.enable_xformers_memory_efficient_attention
        && !backend.supports(BackendCapability::MemoryEfficientAttention)
    {
        return Err(SetupError::MissingCapability {
            backend: backend.name().to_string(),
            capability: BackendCapability::MemoryEfficientAttention,
        });
    }
    if config.gradient_checkpointing && !backend.supports(BackendCapability::GradientCheckpointing) {
        logger.warn(&format!(
            "Backend '{}' does not declare gradient_checkpointing; the flag is passed through unchanged",
            backend.name()
        ));
    }
    Ok(())
}
