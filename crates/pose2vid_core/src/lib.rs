//! pose2vid core - orchestration for pose-conditioned text-to-video runs.
//!
//! This crate contains all run logic with no CLI dependencies: config
//! loading, checkpoint resume, model bundle checks, the generation loop and
//! caption/transcode post-processing. Diffusion sampling itself is done by
//! an external generator behind [`generation::GenerationBackend`].

pub mod checkpoint;
pub mod config;
pub mod generation;
pub mod layout;
pub mod logging;
pub mod media;
pub mod models;
pub mod orchestrator;
pub mod runtime;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
