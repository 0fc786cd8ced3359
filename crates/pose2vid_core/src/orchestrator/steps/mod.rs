//! Pipeline step implementations.
//!
//! Each prompt runs Generate, then Caption, then Transcode.

mod caption;
mod generate;
mod transcode;

pub use caption::CaptionStep;
pub use generate::GenerateStep;
pub use transcode::TranscodeStep;
