//! Video post-processing through ffmpeg and ffprobe.
//!
//! - `probe`: property detection (size, rate, frame count, codec)
//! - `caption`: prompt burn-in with `drawtext` to an MPEG-4 intermediate
//! - `transcode`: final H.264 encode
//!
//! Every stage checks its output against its input's geometry.

mod caption;
mod error;
mod ffmpeg;
mod probe;
mod transcode;

pub use caption::{burn_caption, drawtext_filter, escape_filter_value, CaptionStyle};
pub use error::{MediaError, MediaResult};
pub use ffmpeg::MediaTools;
pub use probe::{detect_properties, parse_ffprobe_json, parse_fps_fraction, VideoProperties};
pub use transcode::{intermediate_path, transcode_h264, INTERMEDIATE_SUFFIX};
