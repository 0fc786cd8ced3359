//! Output directory layout and file naming.
//!
//! ```text
//! <output_dir>/
//!   config.toml          echoed run config
//!   samples/             raw generator output
//!   inv_latents/         DDIM-inverted latents
//!   logs/<run>.log
//! <destination_dir>/<config-stem>-<timestamp>/
//!   NN_<prompt>_with_captions.mp4
//!   run_summary.json
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::config::CONFIG_COPY_NAME;

/// Longest prompt-derived part of a file name.
const MAX_PROMPT_CHARS: usize = 80;

/// Suffix of the final captioned video.
pub const FINAL_SUFFIX: &str = "_with_captions";

/// Directories under `output_dir`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.root.join("samples")
    }

    pub fn inv_latents_dir(&self) -> PathBuf {
        self.root.join("inv_latents")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn config_copy_path(&self) -> PathBuf {
        self.root.join(CONFIG_COPY_NAME)
    }

    /// Create the root and its subdirectories.
    pub fn create(&self) -> io::Result<()> {
        for dir in [self.samples_dir(), self.inv_latents_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Name of a run folder: `<config-stem>-<YYYY-mm-ddTHH-MM-SS>`.
pub fn run_folder_name(config_stem: &str, started: &DateTime<Local>) -> String {
    format!("{}-{}", config_stem, started.format("%Y-%m-%dT%H-%M-%S"))
}

/// Create `parent/name`, adding `-2`, `-3`, ... if it already exists.
pub fn create_unique_dir(parent: &Path, name: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(parent)?;
    let mut candidate = parent.join(name);
    let mut n = 2;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = parent.join(format!("{}-{}", name, n));
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// File stem for a prompt: `NN_<sanitized prompt>`.
///
/// Keeps ASCII letters, digits, `-` and `_`; every other run of characters
/// becomes a single `_`. The prompt part is capped at 80 characters.
pub fn prompt_file_stem(index: usize, prompt: &str) -> String {
    let mut cleaned = String::with_capacity(prompt.len().min(MAX_PROMPT_CHARS));
    for c in prompt.trim().chars() {
        if cleaned.len() >= MAX_PROMPT_CHARS {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            cleaned.push(c);
        } else if !cleaned.ends_with('_') {
            cleaned.push('_');
        }
    }
    let cleaned = cleaned.trim_matches('_');
    let cleaned = if cleaned.is_empty() { "prompt" } else { cleaned };
    format!("{:02}_{}", index, cleaned)
}

/// Paths used for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPaths {
    /// Generator output in `samples/`.
    pub raw: PathBuf,
    /// Captioned H.264 video in the run folder.
    pub final_video: PathBuf,
}

impl PromptPaths {
    pub fn new(samples_dir: &Path, run_dir: &Path, index: usize, prompt: &str) -> Self {
        let stem = prompt_file_stem(index, prompt);
        Self {
            raw: samples_dir.join(format!("{}.mp4", stem)),
            final_video: run_dir.join(format!("{}{}.mp4", stem, FINAL_SUFFIX)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn sanitizes_prompts() {
        assert_eq!(
            prompt_file_stem(0, "A man, dancing on the beach!"),
            "00_A_man_dancing_on_the_beach"
        );
        assert_eq!(prompt_file_stem(7, "  Iron-Man_flies  "), "07_Iron-Man_flies");
        assert_eq!(prompt_file_stem(12, "???"), "12_prompt");
        assert_eq!(prompt_file_stem(3, "café au lait"), "03_caf_au_lait");
    }

    #[test]
    fn long_prompts_are_capped() {
        let stem = prompt_file_stem(1, &"word ".repeat(50));
        assert!(stem.len() <= 3 + MAX_PROMPT_CHARS);
        assert!(!stem.ends_with('_'));
    }

    #[test]
    fn run_folder_uses_stem_and_timestamp() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            run_folder_name("mmpose_txt2video", &started),
            "mmpose_txt2video-2024-03-09T14-05-07"
        );
    }

    #[test]
    fn layout_creates_subdirectories() {
        let temp = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp.path().join("out"));
        layout.create().unwrap();

        assert!(layout.samples_dir().is_dir());
        assert!(layout.inv_latents_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
        assert!(layout.config_copy_path().ends_with("config.toml"));
    }

    #[test]
    fn unique_dir_avoids_collisions() {
        let temp = TempDir::new().unwrap();
        let first = create_unique_dir(temp.path(), "run").unwrap();
        let second = create_unique_dir(temp.path(), "run").unwrap();
        let third = create_unique_dir(temp.path(), "run").unwrap();

        assert!(first.ends_with("run"));
        assert!(second.ends_with("run-2"));
        assert!(third.ends_with("run-3"));
    }

    #[test]
    fn prompt_paths_split_samples_and_run_folder() {
        let paths = PromptPaths::new(Path::new("/o/samples"), Path::new("/d/run"), 2, "a cat");
        assert_eq!(paths.raw, PathBuf::from("/o/samples/02_a_cat.mp4"));
        assert_eq!(
            paths.final_video,
            PathBuf::from("/d/run/02_a_cat_with_captions.mp4")
        );
    }
}
