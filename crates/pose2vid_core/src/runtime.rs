//! Explicit runtime context for one run.
//!
//! Holds what would otherwise be process-wide state: precision, device,
//! the seeded RNG, the process rank and the run logger. It is built once
//! during setup, passed to everything that needs it, and closed with
//! [`RuntimeContext::shutdown`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MixedPrecision, RunConfig};
use crate::logging::RunLogger;

/// Environment variable carrying the process rank under multi-process launchers.
pub const RANK_ENV: &str = "RANK";

/// Weight precision for the text encoder and VAE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightDtype {
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float16")]
    F16,
    #[serde(rename = "bfloat16")]
    Bf16,
}

impl WeightDtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightDtype::F32 => "float32",
            WeightDtype::F16 => "float16",
            WeightDtype::Bf16 => "bfloat16",
        }
    }
}

impl From<MixedPrecision> for WeightDtype {
    fn from(precision: MixedPrecision) -> Self {
        match precision {
            MixedPrecision::No => WeightDtype::F32,
            MixedPrecision::Fp16 => WeightDtype::F16,
            MixedPrecision::Bf16 => WeightDtype::Bf16,
        }
    }
}

impl fmt::Display for WeightDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute device requested for generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid device '{0}' (expected cpu, cuda or cuda:N)")]
pub struct ParseDeviceError(pub String);

impl FromStr for DeviceSpec {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "cpu" => Ok(DeviceSpec::Cpu),
            "cuda" | "gpu" => Ok(DeviceSpec::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|idx| idx.parse::<usize>().ok())
                .map(DeviceSpec::Cuda)
                .ok_or_else(|| ParseDeviceError(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => f.write_str("cpu"),
            DeviceSpec::Cuda(idx) => write!(f, "cuda:{}", idx),
        }
    }
}

impl Serialize for DeviceSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Read the process rank from the environment (0 when absent or unparseable).
pub fn detect_process_index() -> usize {
    match std::env::var(RANK_ENV) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparseable {}={:?}", RANK_ENV, value);
            0
        }),
        Err(_) => 0,
    }
}

/// Runtime state for one run.
pub struct RuntimeContext {
    config: Arc<RunConfig>,
    dtype: WeightDtype,
    device: DeviceSpec,
    process_index: usize,
    seed: Option<u64>,
    rng: StdRng,
    logger: Arc<RunLogger>,
}

impl RuntimeContext {
    /// Build the context from a validated config.
    pub fn new(
        config: Arc<RunConfig>,
        process_index: usize,
        logger: Arc<RunLogger>,
    ) -> Result<Self, ParseDeviceError> {
        let device: DeviceSpec = config.device.parse()?;
        let dtype = WeightDtype::from(config.mixed_precision);
        let seed = config.seed;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        logger.info(&format!(
            "Runtime: process {} ({}), device {}, weights {}, seed {}",
            process_index,
            if process_index == 0 { "main" } else { "worker" },
            device,
            dtype,
            seed.map(|s| s.to_string()).unwrap_or_else(|| "random".to_string())
        ));

        Ok(Self {
            config,
            dtype,
            device,
            process_index,
            seed,
            rng,
            logger,
        })
    }

    pub fn config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    pub fn dtype(&self) -> WeightDtype {
        self.dtype
    }

    pub fn device(&self) -> DeviceSpec {
        self.device
    }

    pub fn process_index(&self) -> usize {
        self.process_index
    }

    /// Only the main process writes outputs and generates samples.
    pub fn is_main_process(&self) -> bool {
        self.process_index == 0
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn logger(&self) -> &Arc<RunLogger> {
        &self.logger
    }

    /// Draw the seed for the next generation request.
    ///
    /// The RNG is seeded once, so consecutive prompts get different but
    /// reproducible seeds.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.random()
    }

    /// Flush and close the run logger.
    pub fn shutdown(self) {
        self.logger.info("Runtime shut down");
        self.logger.close();
    }
}
