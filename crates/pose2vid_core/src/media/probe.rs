//! Video property detection with ffprobe.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{MediaError, MediaResult};
use super::ffmpeg::MediaTools;

/// Properties of the first video stream of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProperties {
    pub width: u32,
    pub height: u32,
    /// Frame rate as (numerator, denominator).
    pub fps_fraction: (u32, u32),
    pub frame_count: u64,
    pub codec_name: String,
    /// Container codec tag, e.g. `mp4v` or `avc1`.
    #[serde(default)]
    pub codec_tag: Option<String>,
    #[serde(default)]
    pub pixel_format: Option<String>,
    pub duration_secs: f64,
}

impl VideoProperties {
    pub fn fps(&self) -> f64 {
        let (num, den) = self.fps_fraction;
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }

    /// Same width, height, frame rate and frame count.
    pub fn same_geometry(&self, other: &VideoProperties) -> bool {
        let (a_num, a_den) = self.fps_fraction;
        let (b_num, b_den) = other.fps_fraction;
        self.width == other.width
            && self.height == other.height
            && a_num as u64 * b_den as u64 == b_num as u64 * a_den as u64
            && self.frame_count == other.frame_count
    }
}

impl fmt::Display for VideoProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {}/{} fps, {} frames",
            self.width, self.height, self.fps_fraction.0, self.fps_fraction.1, self.frame_count
        )
    }
}

/// Parse an ffprobe frame rate such as `"30000/1001"` or `"8"`.
pub fn parse_fps_fraction(value: &str) -> Option<(u32, u32)> {
    let (num, den) = match value.split_once('/') {
        Some((num, den)) => (num.trim().parse().ok()?, den.trim().parse().ok()?),
        None => (value.trim().parse().ok()?, 1),
    };
    if num == 0 || den == 0 {
        return None;
    }
    Some((num, den))
}

/// Parse `ffprobe -of json` output for the first video stream.
pub fn parse_ffprobe_json(path: &Path, json: &str) -> MediaResult<VideoProperties> {
    let data: serde_json::Value = serde_json::from_str(json).map_err(|e| MediaError::ProbeFailed {
        path: path.to_path_buf(),
        message: format!("invalid ffprobe JSON: {}", e),
    })?;

    let stream = data
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|streams| {
            streams.iter().find(|s| {
                s.get("codec_type")
                    .and_then(|t| t.as_str())
                    .map_or(true, |t| t == "video")
            })
        })
        .ok_or_else(|| MediaError::NoVideoStream(path.to_path_buf()))?;

    let str_field = |name: &str| {
        stream
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|v| *v != "N/A")
    };
    let count_field = |name: &str| str_field(name).and_then(|v| v.parse::<u64>().ok());

    let width = stream.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(MediaError::ProbeFailed {
            path: path.to_path_buf(),
            message: "video stream has no frame size".to_string(),
        });
    }

    // r_frame_rate is the more reliable of the two for constant-rate video
    let fps_fraction = str_field("r_frame_rate")
        .and_then(parse_fps_fraction)
        .or_else(|| str_field("avg_frame_rate").and_then(parse_fps_fraction))
        .ok_or_else(|| MediaError::ProbeFailed {
            path: path.to_path_buf(),
            message: "video stream has no frame rate".to_string(),
        })?;

    let duration_secs = str_field("duration")
        .or_else(|| {
            data.get("format")
                .and_then(|f| f.get("duration"))
                .and_then(|v| v.as_str())
                .filter(|v| *v != "N/A")
        })
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);

    let mut props = VideoProperties {
        width,
        height,
        fps_fraction,
        frame_count: 0,
        codec_name: str_field("codec_name").unwrap_or("unknown").to_string(),
        codec_tag: str_field("codec_tag_string").map(str::to_string),
        pixel_format: str_field("pix_fmt").map(str::to_string),
        duration_secs,
    };

    // Decoded count first, then the container's count, then an estimate
    props.frame_count = count_field("nb_read_frames")
        .or_else(|| count_field("nb_frames"))
        .unwrap_or_else(|| (duration_secs * props.fps()).round() as u64);

    Ok(props)
}

/// Probe a file with ffprobe, decoding it fully to count frames.
///
/// A missing file, an unreadable file and a file without a video stream
/// are all errors.
pub fn detect_properties(tools: &MediaTools, path: &Path) -> MediaResult<VideoProperties> {
    if !path.is_file() {
        return Err(MediaError::InputNotFound(path.to_path_buf()));
    }

    let args: Vec<OsString> = vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "v:0".into(),
        "-count_frames".into(),
        "-show_entries".into(),
        "stream=codec_type,codec_name,codec_tag_string,pix_fmt,width,height,r_frame_rate,avg_frame_rate,nb_frames,nb_read_frames,duration:format=duration".into(),
        "-of".into(),
        "json".into(),
        path.as_os_str().to_os_string(),
    ];

    let output = tools.ffprobe(args).map_err(|e| match e {
        MediaError::CommandFailed { message, .. } => MediaError::ProbeFailed {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })?;

    let props = parse_ffprobe_json(path, &String::from_utf8_lossy(&output.stdout))?;
    tracing::debug!("Probed {}: {}", path.display(), props);
    Ok(props)
}
