//! Shared fixtures for orchestrator unit tests.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use super::types::{Context, PromptSpec, RunResources};
use crate::config::{RunConfig, ValidationData};
use crate::generation::{
    BackendCapability, GeneratedVideo, GenerationBackend, GenerationError, GenerationRequest,
    GenerationResult, TestPatternBackend,
};
use crate::layout::OutputLayout;
use crate::logging::{LogConfig, RunLogger};
use crate::media::{CaptionStyle, MediaTools};
use crate::runtime::{DeviceSpec, WeightDtype};

/// Fails for listed prompts and renders a test pattern for the rest.
pub(crate) struct MockBackend {
    failing: Vec<String>,
    inner: TestPatternBackend,
}

impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> &[BackendCapability] {
        &[BackendCapability::MemoryEfficientAttention]
    }

    fn generate(&self, request: &GenerationRequest) -> GenerationResult<GeneratedVideo> {
        if self.failing.iter().any(|p| p == &request.prompt) {
            return Err(GenerationError::Failed {
                exit_code: 1,
                message: "mock failure".to_string(),
            });
        }
        self.inner.generate(request)
    }
}

pub(crate) struct TestRun {
    pub dir: TempDir,
    pub resources: Arc<RunResources>,
    pub logger: Arc<RunLogger>,
}

impl TestRun {
    pub fn new() -> Self {
        Self::build(|_| {}, &[])
    }

    pub fn configure(edit: impl FnOnce(&mut RunConfig)) -> Self {
        Self::build(edit, &[])
    }

    pub fn with_failing_prompts(prompts: &[&str]) -> Self {
        Self::build(|_| {}, prompts)
    }

    fn build(edit: impl FnOnce(&mut RunConfig), failing: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let run_dir = dir.path().join("dest").join("run");
        let skeleton = dir.path().join("pose.mp4");
        fs::write(&skeleton, b"skeleton").unwrap();

        let mut validation = ValidationData::with_prompts(vec!["a dancer".to_string()]);
        validation.width = 64;
        validation.height = 64;
        let mut config: RunConfig = toml::from_str(&format!(
            "pretrained_model_path = \"models\"\noutput_dir = \"{}\"\n[validation_data]\nprompts = [\"a dancer\"]\n",
            out.display()
        ))
        .unwrap();
        config.validation_data = validation;
        edit(&mut config);

        let layout = OutputLayout::new(&out);
        layout.create().unwrap();
        let logger = Arc::new(RunLogger::new("test", layout.logs_dir(), LogConfig::quiet(), None).unwrap());
        let tools = MediaTools::default();

        let resources = RunResources {
            caption_style: CaptionStyle::from(&config.caption),
            config: Arc::new(config),
            layout,
            run_dir,
            skeleton_path: skeleton,
            model_root: PathBuf::from("models"),
            resume: None,
            dtype: WeightDtype::F32,
            device: DeviceSpec::Cpu,
            backend: Arc::new(MockBackend {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                inner: TestPatternBackend::new(tools.clone()),
            }),
            tools,
        };

        Self {
            dir,
            resources: Arc::new(resources),
            logger,
        }
    }

    pub fn context(&self, index: usize, text: &str) -> Context {
        Context::new(
            PromptSpec {
                index,
                text: text.to_string(),
                seed: 7,
            },
            Arc::clone(&self.resources),
            Arc::clone(&self.logger),
        )
    }

    pub fn ffmpeg_available(&self) -> bool {
        self.resources.tools.is_available()
    }
}
