//! Pretrained bundle resolution.
//!
//! A bundle is a diffusers-style directory with one subfolder per
//! component. It is found either on disk or on the model hub.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::scheduler::SchedulerConfig;

/// Components every bundle must provide.
pub const REQUIRED_COMPONENTS: [Component; 5] = [
    Component::Scheduler,
    Component::Tokenizer,
    Component::TextEncoder,
    Component::Vae,
    Component::Unet,
];

/// Index file at the root of a hub bundle.
pub const MODEL_INDEX: &str = "model_index.json";

/// Scheduler config path relative to the bundle root.
pub const SCHEDULER_CONFIG: &str = "scheduler/scheduler_config.json";

/// One sub-model of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Scheduler,
    Tokenizer,
    TextEncoder,
    Vae,
    Unet,
}

impl Component {
    /// Subfolder name inside the bundle.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Component::Scheduler => "scheduler",
            Component::Tokenizer => "tokenizer",
            Component::TextEncoder => "text_encoder",
            Component::Vae => "vae",
            Component::Unet => "unet",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Model directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Model bundle {root} is missing components: {}", join(.missing))]
    MissingComponents {
        root: PathBuf,
        missing: Vec<Component>,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to fetch '{file}' from hub repo '{repo}': {message}")]
    Hub {
        repo: String,
        file: String,
        message: String,
    },

    #[error("{steps} steps not supported by a schedule of {train_timesteps} training timesteps")]
    UnsupportedSteps { steps: u32, train_timesteps: u32 },
}

fn join(components: &[Component]) -> String {
    components
        .iter()
        .map(Component::dir_name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type BundleResult<T> = Result<T, BundleError>;

/// Where a bundle comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum ModelSource {
    Local(PathBuf),
    Hub(String),
}

impl ModelSource {
    /// Interpret `pretrained_model_path`.
    ///
    /// Existing paths are local. Otherwise an `owner/name` id is a hub repo,
    /// and anything else is treated as a (missing) local path.
    pub fn parse(value: &str) -> Self {
        let path = Path::new(value);
        if path.exists() || !looks_like_repo_id(value) {
            ModelSource::Local(path.to_path_buf())
        } else {
            ModelSource::Hub(value.to_string())
        }
    }
}

fn looks_like_repo_id(value: &str) -> bool {
    let mut parts = value.split('/');
    let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let valid = |s: &str| {
        !s.is_empty()
            && !s.starts_with('.')
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    valid(owner) && valid(name)
}

/// A resolved pretrained bundle.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    source: ModelSource,
    root: PathBuf,
    scheduler: SchedulerConfig,
}

impl ModelBundle {
    /// Resolve a bundle from its source.
    pub fn resolve(source: ModelSource) -> BundleResult<Self> {
        match source {
            ModelSource::Local(root) => Self::open_local(root),
            ModelSource::Hub(repo) => Self::fetch_from_hub(&repo),
        }
    }

    /// Open a bundle directory, checking every required component exists.
    pub fn open_local(root: PathBuf) -> BundleResult<Self> {
        if !root.is_dir() {
            return Err(BundleError::NotFound(root));
        }

        let missing: Vec<Component> = REQUIRED_COMPONENTS
            .iter()
            .copied()
            .filter(|c| !root.join(c.dir_name()).is_dir())
            .collect();
        if !missing.is_empty() {
            return Err(BundleError::MissingComponents { root, missing });
        }

        let scheduler = read_scheduler_config(&root.join(SCHEDULER_CONFIG))?;
        Ok(Self {
            source: ModelSource::Local(root.clone()),
            root,
            scheduler,
        })
    }

    /// Fetch the bundle index and scheduler config from the hub.
    ///
    /// Weight files are left to the generator, which reads them from the
    /// same cache snapshot.
    pub fn fetch_from_hub(repo_id: &str) -> BundleResult<Self> {
        let hub_error = |file: &str, message: String| BundleError::Hub {
            repo: repo_id.to_string(),
            file: file.to_string(),
            message,
        };

        tracing::info!("Fetching model bundle '{}' from the hub", repo_id);
        let api = hf_hub::api::sync::Api::new().map_err(|e| hub_error(MODEL_INDEX, e.to_string()))?;
        let repo = api.model(repo_id.to_string());

        let index_path = repo
            .get(MODEL_INDEX)
            .map_err(|e| hub_error(MODEL_INDEX, e.to_string()))?;
        let root = index_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| hub_error(MODEL_INDEX, "cache path has no parent".to_string()))?;

        let index = read_json::<serde_json::Value>(&index_path)?;
        let missing: Vec<Component> = REQUIRED_COMPONENTS
            .iter()
            .copied()
            .filter(|c| index.get(c.dir_name()).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(BundleError::MissingComponents { root, missing });
        }

        let scheduler_path = repo
            .get(SCHEDULER_CONFIG)
            .map_err(|e| hub_error(SCHEDULER_CONFIG, e.to_string()))?;
        let scheduler = read_scheduler_config(&scheduler_path)?;

        Ok(Self {
            source: ModelSource::Hub(repo_id.to_string()),
            root,
            scheduler,
        })
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    /// Bundle root handed to the generator.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn component_dir(&self, component: Component) -> PathBuf {
        self.root.join(component.dir_name())
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    /// Check a step count (inference or DDIM inversion) against the schedule.
    pub fn check_steps(&self, steps: u32) -> BundleResult<()> {
        if self.scheduler.supports_steps(steps) {
            Ok(())
        } else {
            Err(BundleError::UnsupportedSteps {
                steps,
                train_timesteps: self.scheduler.num_train_timesteps,
            })
        }
    }
}

fn read_scheduler_config(path: &Path) -> BundleResult<SchedulerConfig> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> BundleResult<T> {
    let text = fs::read_to_string(path).map_err(|e| BundleError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| BundleError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}
