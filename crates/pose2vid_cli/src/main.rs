//! `txt2video` - pose-conditioned text-to-video generation runner.
//!
//! Exit codes: 0 when every prompt produced a video, 1 when setup failed,
//! 2 when at least one prompt failed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use pose2vid_core::config::ConfigManager;
use pose2vid_core::generation::BackendKind;
use pose2vid_core::logging::{init_tracing, LogLevel};
use pose2vid_core::orchestrator::{Session, SessionOptions};

#[derive(Parser, Debug)]
#[command(name = "txt2video", version)]
#[command(about = "Generate captioned videos from text prompts and a pose skeleton", long_about = None)]
struct Args {
    /// Run config (TOML)
    #[arg(long)]
    config: PathBuf,

    /// Skeleton (pose) video conditioning every prompt
    #[arg(long)]
    skeleton_path: PathBuf,

    /// Override `[logging] level` (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Render ffmpeg test patterns instead of calling the generator
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_level.unwrap_or(LogLevel::Info));

    let mut session = match setup(&args) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(1);
        }
    };

    let summary = session.run();
    let run_dir = session.run_dir().to_path_buf();
    session.shutdown();

    if summary.all_succeeded() {
        tracing::info!(
            "{} video(s) written to {}",
            summary.succeeded(),
            run_dir.display()
        );
        ExitCode::SUCCESS
    } else {
        for failed in summary.results.iter().filter(|r| !r.success) {
            tracing::error!(
                "Prompt {} failed: {}",
                failed.index,
                failed.error.as_deref().unwrap_or("unknown error")
            );
        }
        if summary.cancelled {
            tracing::warn!("Run was cancelled");
        }
        ExitCode::from(2)
    }
}

fn setup(args: &Args) -> anyhow::Result<Session> {
    let mut manager = ConfigManager::new(&args.config);
    manager
        .load()
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    let settings = manager.settings_mut()?;
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }
    if args.dry_run {
        settings.backend.kind = BackendKind::TestPattern;
        settings.enable_xformers_memory_efficient_attention = false;
    }

    let session = Session::prepare(
        &manager,
        SessionOptions {
            skeleton_path: Some(args.skeleton_path.clone()),
            ..SessionOptions::default()
        },
    )
    .context("Setup failed")?;

    tracing::info!(
        "Run {} ({} on {})",
        session.run_name(),
        session.runtime().dtype(),
        session.runtime().device()
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Config with no `[backend]` table whose model directory is missing,
    /// so setup gets past validation and stops at model resolution.
    fn config_without_backend(dir: &Path) -> PathBuf {
        let text = format!(
            "pretrained_model_path = \"{}\"\noutput_dir = \"{}\"\n\
             destination_dir = \"{}\"\n\n\
             [validation_data]\nprompts = [\"a man is dancing\"]\n",
            dir.join("missing-model").display(),
            dir.join("out").display(),
            dir.join("dest").display()
        );
        let path = dir.join("dance.toml");
        fs::write(&path, text).unwrap();
        fs::write(dir.join("pose.mp4"), b"pose").unwrap();
        path
    }

    fn setup_args(dir: &Path, extra: &[&str]) -> Args {
        let config = config_without_backend(dir);
        let skeleton = dir.join("pose.mp4");
        let mut argv = vec![
            "txt2video".to_string(),
            "--config".to_string(),
            config.display().to_string(),
            "--skeleton-path".to_string(),
            skeleton.display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_required_flags() {
        let args = Args::try_parse_from([
            "txt2video",
            "--config",
            "configs/dance.toml",
            "--skeleton-path",
            "pose.mp4",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("configs/dance.toml"));
        assert_eq!(args.skeleton_path, PathBuf::from("pose.mp4"));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(!args.dry_run);
    }

    #[test]
    fn skeleton_path_is_required() {
        assert!(Args::try_parse_from(["txt2video", "--config", "c.toml"]).is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let result = Args::try_parse_from([
            "txt2video",
            "--config",
            "c.toml",
            "--skeleton-path",
            "p.mp4",
            "--log-level",
            "loud",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_is_a_setup_error() {
        let args = Args::try_parse_from([
            "txt2video",
            "--config",
            "/nonexistent/config.toml",
            "--skeleton-path",
            "p.mp4",
        ])
        .unwrap();
        let err = setup(&args).err().unwrap();
        assert!(format!("{:#}", err).contains("/nonexistent/config.toml"));
    }

    #[test]
    fn dry_run_does_not_need_a_generator_command() {
        let dir = TempDir::new().unwrap();
        let args = setup_args(dir.path(), &["--dry-run"]);

        let message = format!("{:#}", setup(&args).err().unwrap());
        assert!(!message.contains("backend.command"), "{}", message);
        assert!(message.contains("Model directory not found"), "{}", message);
    }

    #[test]
    fn real_run_without_generator_command_fails_setup() {
        let dir = TempDir::new().unwrap();
        let args = setup_args(dir.path(), &[]);

        let message = format!("{:#}", setup(&args).err().unwrap());
        assert!(message.contains("backend.command"), "{}", message);
    }
}
