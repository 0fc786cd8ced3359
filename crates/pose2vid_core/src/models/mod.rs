//! Pretrained model bundle handling.
//!
//! The sub-models (VAE, text encoder, tokenizer, 3D UNet, schedulers) are
//! loaded by the generator; this module locates the bundle, checks it is
//! complete and reads the scheduler config used for step validation.

mod bundle;
mod scheduler;

pub use bundle::{
    BundleError, BundleResult, Component, ModelBundle, ModelSource, MODEL_INDEX,
    REQUIRED_COMPONENTS, SCHEDULER_CONFIG,
};
pub use scheduler::SchedulerConfig;

#[cfg(test)]
pub(crate) use bundle::tests::write_bundle;
