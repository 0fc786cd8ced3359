//! Noise scheduler configuration read from a pretrained bundle.
//!
//! Only the fields this crate checks are parsed; the scheduler itself runs
//! inside the generator.

use serde::Deserialize;

/// Subset of `scheduler/scheduler_config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "_class_name", default)]
    pub class_name: Option<String>,

    #[serde(default = "default_train_timesteps")]
    pub num_train_timesteps: u32,

    #[serde(default = "default_beta_start")]
    pub beta_start: f64,

    #[serde(default = "default_beta_end")]
    pub beta_end: f64,

    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: String,

    #[serde(default)]
    pub steps_offset: u32,

    #[serde(default = "default_prediction_type")]
    pub prediction_type: String,

    #[serde(default = "default_clip_sample")]
    pub clip_sample: bool,
}

fn default_train_timesteps() -> u32 {
    1000
}

fn default_beta_start() -> f64 {
    0.0001
}

fn default_beta_end() -> f64 {
    0.02
}

fn default_beta_schedule() -> String {
    "linear".to_string()
}

fn default_prediction_type() -> String {
    "epsilon".to_string()
}

fn default_clip_sample() -> bool {
    true
}

impl SchedulerConfig {
    /// Parse the JSON config.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Whether `steps` inference/inversion steps fit the training schedule.
    pub fn supports_steps(&self, steps: u32) -> bool {
        steps >= 1 && steps <= self.num_train_timesteps
    }
}
