//! Synthetic backend rendering an ffmpeg test pattern.
//!
//! Produces a clip with the requested frame size, rate and length so the
//! caption and transcode path can run without a diffusion model.

use std::ffi::OsString;
use std::fs;
use std::time::Instant;

use super::{
    BackendCapability, GeneratedVideo, GenerationBackend, GenerationError, GenerationRequest,
    GenerationResult,
};
use crate::media::MediaTools;

pub struct TestPatternBackend {
    tools: MediaTools,
    capabilities: Vec<BackendCapability>,
}

impl TestPatternBackend {
    pub fn new(tools: MediaTools) -> Self {
        Self {
            tools,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<BackendCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl GenerationBackend for TestPatternBackend {
    fn name(&self) -> &str {
        "test_pattern"
    }

    fn capabilities(&self) -> &[BackendCapability] {
        &self.capabilities
    }

    fn prepare(&self) -> GenerationResult<()> {
        if self.tools.is_available() {
            Ok(())
        } else {
            Err(GenerationError::Spawn {
                program: self.tools.ffmpeg_path().display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "ffmpeg/ffprobe not available",
                ),
            })
        }
    }

    fn generate(&self, request: &GenerationRequest) -> GenerationResult<GeneratedVideo> {
        let v = &request.validation;
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| GenerationError::Io {
                operation: "creating sample directory".to_string(),
                source: e,
            })?;
        }

        let source = format!("testsrc2=size={}x{}:rate={}", v.width, v.height, v.fps);
        let args: Vec<OsString> = vec![
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            source.into(),
            "-frames:v".into(),
            v.video_length.to_string().into(),
            "-c:v".into(),
            "mpeg4".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-q:v".into(),
            "3".into(),
            request.output_path.as_os_str().to_os_string(),
        ];

        let started = Instant::now();
        self.tools.ffmpeg(args)?;

        Ok(GeneratedVideo {
            path: request.output_path.clone(),
            elapsed: started.elapsed(),
            log_lines: Vec::new(),
        })
    }
}
