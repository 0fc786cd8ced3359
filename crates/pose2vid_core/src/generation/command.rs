//! External generator process backend.
//!
//! The configured program is run once per prompt. It receives the request
//! as JSON on stdin, and `args` may reference request fields with
//! `{placeholder}` syntax. The run succeeds when the program exits 0 and
//! leaves a non-empty video at `{output}`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use super::{
    BackendCapability, GeneratedVideo, GenerationBackend, GenerationError, GenerationRequest,
    GenerationResult,
};
use crate::config::BackendSettings;

/// Lines of generator stderr kept in a failure message.
const ERROR_CONTEXT_LINES: usize = 5;

/// Placeholders accepted in `[backend] args`.
pub const PLACEHOLDERS: &[&str] = &[
    "index",
    "prompt",
    "output",
    "seed",
    "skeleton",
    "model",
    "width",
    "height",
    "video_length",
    "fps",
    "steps",
    "guidance",
    "dtype",
    "device",
    "checkpoint",
    "global_step",
    "inv_latents",
];

fn placeholder_value(name: &str, request: &GenerationRequest) -> Option<String> {
    let v = &request.validation;
    let value = match name {
        "index" => request.index.to_string(),
        "prompt" => request.prompt.clone(),
        "output" => request.output_path.display().to_string(),
        "seed" => request.seed.to_string(),
        "skeleton" => request.skeleton_path.display().to_string(),
        "model" => request.model_root.display().to_string(),
        "width" => v.width.to_string(),
        "height" => v.height.to_string(),
        "video_length" => v.video_length.to_string(),
        "fps" => v.fps.to_string(),
        "steps" => v.num_inference_steps.to_string(),
        "guidance" => v.guidance_scale.to_string(),
        "dtype" => request.dtype.as_str().to_string(),
        "device" => request.device.to_string(),
        "checkpoint" => request
            .checkpoint
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        "global_step" => request.global_step.to_string(),
        "inv_latents" => request.inv_latents_dir.display().to_string(),
        _ => return None,
    };
    Some(value)
}

/// Substitute `{placeholder}`s in each argument.
///
/// An unterminated `{` is kept literally; an unknown name is an error.
pub fn render_args(args: &[String], request: &GenerationRequest) -> GenerationResult<Vec<String>> {
    args.iter()
        .map(|arg| {
            let mut out = String::with_capacity(arg.len());
            let mut rest = arg.as_str();
            while let Some(open) = rest.find('{') {
                out.push_str(&rest[..open]);
                let after = &rest[open + 1..];
                let Some(close) = after.find('}') else {
                    out.push_str(&rest[open..]);
                    rest = "";
                    break;
                };
                let name = &after[..close];
                let value = placeholder_value(name, request)
                    .ok_or_else(|| GenerationError::UnknownPlaceholder(name.to_string()))?;
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            out.push_str(rest);
            Ok(out)
        })
        .collect()
}

/// Runs an external generator per request.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    capabilities: Vec<BackendCapability>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
            working_dir: None,
            capabilities: Vec::new(),
        }
    }

    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            program: settings.command.trim().to_string(),
            args: settings.args.clone(),
            env: settings.env.clone(),
            working_dir: settings.working_dir.as_ref().map(PathBuf::from),
            capabilities: settings.capabilities.clone(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<BackendCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn locate_program(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            let resolved = match &self.working_dir {
                Some(dir) if program.is_relative() => dir.join(program),
                _ => program.to_path_buf(),
            };
            return resolved.is_file().then_some(resolved);
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }
}

impl GenerationBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn capabilities(&self) -> &[BackendCapability] {
        &self.capabilities
    }

    fn prepare(&self) -> GenerationResult<()> {
        if self.program.is_empty() {
            return Err(GenerationError::NotConfigured);
        }
        let located = self.locate_program().ok_or_else(|| GenerationError::Spawn {
            program: self.program.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found on PATH"),
        })?;
        tracing::debug!("Generator resolved to {}", located.display());
        Ok(())
    }

    fn generate(&self, request: &GenerationRequest) -> GenerationResult<GeneratedVideo> {
        if self.program.is_empty() {
            return Err(GenerationError::NotConfigured);
        }

        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| GenerationError::Io {
                operation: "creating sample directory".to_string(),
                source: e,
            })?;
        }

        let args = render_args(&self.args, request)?;
        let payload = serde_json::to_vec(request)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!("Running generator: {} {}", self.program, args.join(" "));
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| GenerationError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        // Request goes in on its own thread while stdout and stderr drain
        let stdin = child.stdin.take();
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(&payload),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("request writer panicked")));
            (written, output)
        });

        let output = output.map_err(|e| GenerationError::Io {
            operation: "waiting for generator".to_string(),
            source: e,
        })?;
        if let Err(e) = written {
            // Generators that take everything from args may close stdin early
            if e.kind() != io::ErrorKind::BrokenPipe {
                discard(&request.output_path);
                return Err(GenerationError::Io {
                    operation: "writing request to generator".to_string(),
                    source: e,
                });
            }
        }
        let elapsed = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let log_lines: Vec<String> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();

        if !output.status.success() {
            discard(&request.output_path);
            let tail: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
            let message = if tail.is_empty() {
                "no error output".to_string()
            } else {
                tail[tail.len().saturating_sub(ERROR_CONTEXT_LINES)..].join(" | ")
            };
            return Err(GenerationError::Failed {
                exit_code: output.status.code().unwrap_or(-1),
                message,
            });
        }

        let written = fs::metadata(&request.output_path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !written {
            discard(&request.output_path);
            return Err(GenerationError::MissingOutput(request.output_path.clone()));
        }

        Ok(GeneratedVideo {
            path: request.output_path.clone(),
            elapsed,
            log_lines,
        })
    }
}

fn discard(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::sample_request;

    #[test]
    fn renders_placeholders() {
        let request = sample_request(PathBuf::from("/out/00_a.mp4"));
        let args = vec![
            "--prompt={prompt}".to_string(),
            "{output}".to_string(),
            "{width}x{height}@{fps}".to_string(),
            "--dtype".to_string(),
            "{dtype}".to_string(),
            "{ckpt".to_string(),
        ];
        let rendered = render_args(&args, &request).unwrap();
        assert_eq!(rendered[0], "--prompt=a person dancing");
        assert_eq!(rendered[1], "/out/00_a.mp4");
        assert_eq!(rendered[2], "64x64@8");
        assert_eq!(rendered[4], "float16");
        assert_eq!(rendered[5], "{ckpt");
    }

    #[test]
    fn every_placeholder_has_a_value() {
        let request = sample_request(PathBuf::from("o.mp4"));
        for name in PLACEHOLDERS {
            assert!(placeholder_value(name, &request).is_some(), "{}", name);
        }
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let request = sample_request(PathBuf::from("o.mp4"));
        let err = render_args(&["{nope}".to_string()], &request).unwrap_err();
        assert!(matches!(err, GenerationError::UnknownPlaceholder(ref n) if n == "nope"));
    }

    #[test]
    fn unconfigured_backend_fails_prepare() {
        let backend = CommandBackend::new("", Vec::new());
        assert!(matches!(backend.prepare(), Err(GenerationError::NotConfigured)));

        let backend = CommandBackend::new("definitely-not-a-generator-xyz", Vec::new());
        assert!(matches!(backend.prepare(), Err(GenerationError::Spawn { .. })));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandBackend {
        CommandBackend::new(
            "sh",
            vec!["-c".into(), script.into(), "sh".into(), "{output}".into()],
        )
    }

    #[cfg(unix)]
    #[test]
    fn successful_generator_receives_request_json() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("samples").join("00_a.mp4");
        let backend = sh(r#"cat > "$1.json"; printf video > "$1"; echo done"#);
        assert!(backend.prepare().is_ok());

        let video = backend.generate(&sample_request(output.clone())).unwrap();
        assert_eq!(video.path, output);
        assert_eq!(video.log_lines, vec!["done".to_string()]);

        let json = fs::read_to_string(output.with_extension("mp4.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["prompt"], "a person dancing");
        assert_eq!(value["validation"]["width"], 64);
        assert_eq!(value["dtype"], "float16");
        assert_eq!(value["device"], "cpu");
    }

    #[cfg(unix)]
    #[test]
    fn failing_generator_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("00_a.mp4");
        let backend = sh(r#"printf partial > "$1"; echo "CUDA out of memory" >&2; exit 3"#);

        let err = backend.generate(&sample_request(output.clone())).unwrap_err();
        match err {
            GenerationError::Failed { exit_code, message } => {
                assert_eq!(exit_code, 3);
                assert!(message.contains("CUDA out of memory"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn empty_output_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("00_a.mp4");
        let backend = sh(r#": > "$1""#);

        let err = backend.generate(&sample_request(output.clone())).unwrap_err();
        assert!(matches!(err, GenerationError::MissingOutput(_)));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn chatty_generator_that_ignores_stdin_does_not_stall() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("00_a.mp4");
        let mut request = sample_request(output.clone());
        request.prompt = "a person dancing ".repeat(16 * 1024);
        let backend = sh(r#"head -c 300000 /dev/zero | tr '\0' x >&2; printf video > "$1""#);

        let video = backend.generate(&request).unwrap();
        assert_eq!(video.path, output);
        assert_eq!(fs::read_to_string(&output).unwrap(), "video");
    }
}
