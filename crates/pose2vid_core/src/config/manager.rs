//! Config manager for loading the run config and echoing it for reproducibility.
//!
//! Key features:
//! - Keeps the raw file text next to the parsed settings
//! - Validation on load (all issues reported together)
//! - Echoed copy preserves comments and formatting with toml_edit
//! - Atomic writes (write to temp file, then rename)

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{value, DocumentMut};

use super::settings::RunConfig;

/// File name of the config copy written into the output directory.
pub const CONFIG_COPY_NAME: &str = "config.toml";

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to parse config for editing: {0}")]
    EditParseError(#[from] toml_edit::TomlError),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Config not loaded yet")]
    NotLoaded,
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Loads one run config file and keeps its raw text.
pub struct ConfigManager {
    config_path: PathBuf,
    raw: String,
    settings: Option<RunConfig>,
}

impl ConfigManager {
    /// Create a manager for the given config file.
    ///
    /// Does not load the config - call `load()` after.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            raw: String::new(),
            settings: None,
        }
    }

    /// Build a manager from in-memory text (the path is used for naming only).
    pub fn from_text(config_path: impl Into<PathBuf>, content: &str) -> ConfigResult<Self> {
        let mut manager = Self::new(config_path);
        manager.load_from_str(content)?;
        Ok(manager)
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Config file name without extension, used to name run folders.
    pub fn config_stem(&self) -> String {
        self.config_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "config".to_string())
    }

    /// Raw text of the loaded file.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Get the loaded settings.
    pub fn settings(&self) -> ConfigResult<&RunConfig> {
        self.settings.as_ref().ok_or(ConfigError::NotLoaded)
    }

    /// Get mutable settings (for CLI overrides).
    pub fn settings_mut(&mut self) -> ConfigResult<&mut RunConfig> {
        self.settings.as_mut().ok_or(ConfigError::NotLoaded)
    }

    /// Load the config file and check its values.
    ///
    /// Backend readiness is left to session setup, after overrides apply.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path)?;
        self.load_from_str(&content)
    }

    fn load_from_str(&mut self, content: &str) -> ConfigResult<()> {
        let settings: RunConfig = toml::from_str(content)?;

        let issues = settings.validate_values();
        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues));
        }

        tracing::debug!(
            "Loaded config {} ({} prompts)",
            self.config_path.display(),
            settings.validation_data.prompts.len()
        );

        self.raw = content.to_string();
        self.settings = Some(settings);
        Ok(())
    }

    /// Write the config into `dir` for reproducibility.
    ///
    /// The original text is kept as-is; only `skeleton_path` is stamped in
    /// when given, since the CLI flag is part of the effective configuration.
    pub fn echo_to(&self, dir: &Path, skeleton_path: Option<&Path>) -> ConfigResult<PathBuf> {
        if self.settings.is_none() {
            return Err(ConfigError::NotLoaded);
        }

        let content = match skeleton_path {
            Some(skeleton) => {
                let mut doc: DocumentMut = self.raw.parse()?;
                doc["skeleton_path"] = value(skeleton.to_string_lossy().as_ref());
                doc.to_string()
            }
            None => self.raw.clone(),
        };

        let target = dir.join(CONFIG_COPY_NAME);
        atomic_write(&target, &content)?;
        Ok(target)
    }
}

/// Write content to a file atomically.
///
/// Writes to a temp file first, then renames.
pub(crate) fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONFIG: &str = r#"# dance sample
pretrained_model_path = "./checkpoints/stable-diffusion-v1-4"
output_dir = "./outputs/dance"
seed = 33  # fixed for comparisons

[validation_data]
prompts = ["a man is dancing", "an astronaut on the moon"]

[backend]
command = "python"
"#;

    #[test]
    fn load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let mut manager = ConfigManager::new(dir.path().join("nope.toml"));
        assert!(matches!(manager.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn load_reads_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dance.toml");
        fs::write(&path, CONFIG).unwrap();

        let mut manager = ConfigManager::new(&path);
        manager.load().unwrap();

        let settings = manager.settings().unwrap();
        assert_eq!(settings.seed, Some(33));
        assert_eq!(settings.validation_data.prompts.len(), 2);
        assert_eq!(manager.config_stem(), "dance");
    }

    #[test]
    fn settings_before_load_is_an_error() {
        let manager = ConfigManager::new("x.toml");
        assert!(matches!(manager.settings(), Err(ConfigError::NotLoaded)));
    }

    #[test]
    fn invalid_values_are_reported() {
        let text = CONFIG.replace("seed = 33", "train_batch_size = 0");
        let err = ConfigManager::from_text("bad.toml", &text).err().unwrap();
        match err {
            ConfigError::Invalid(issues) => {
                assert_eq!(issues.len(), 1);
                assert!(issues[0].contains("train_batch_size"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn missing_backend_command_still_loads() {
        let text = CONFIG.replace("[backend]\ncommand = \"python\"\n", "");
        let manager = ConfigManager::from_text("dry.toml", &text).unwrap();

        let settings = manager.settings().unwrap();
        assert!(settings.backend.command.is_empty());
        assert!(settings
            .validate()
            .iter()
            .any(|i| i.contains("backend.command")));
    }

    #[test]
    fn echo_preserves_text_and_stamps_skeleton() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::from_text("dance.toml", CONFIG).unwrap();

        let target = manager
            .echo_to(dir.path(), Some(Path::new("/data/pose/dance.mp4")))
            .unwrap();

        let content = fs::read_to_string(&target).unwrap();
        assert!(content.starts_with("# dance sample"));
        assert!(content.contains("# fixed for comparisons"));
        assert!(content.contains("skeleton_path = \"/data/pose/dance.mp4\""));

        let reparsed: RunConfig = toml::from_str(&content).unwrap();
        assert_eq!(reparsed.skeleton_path.as_deref(), Some("/data/pose/dance.mp4"));
        assert!(!target.with_extension("tmp").exists());
    }

    #[test]
    fn echo_without_skeleton_is_verbatim() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::from_text("dance.toml", CONFIG).unwrap();

        let target = manager.echo_to(dir.path(), None).unwrap();
        assert_eq!(fs::read_to_string(target).unwrap(), CONFIG);
    }
}
