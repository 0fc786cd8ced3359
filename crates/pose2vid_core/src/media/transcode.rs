//! Final H.264 encode of the captioned intermediate.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::caption::{remove_partial, verify_geometry};
use super::error::MediaResult;
use super::ffmpeg::MediaTools;
use super::probe::{detect_properties, VideoProperties};
use crate::config::TranscodeSettings;

/// Suffix of the captioned intermediate file.
pub const INTERMEDIATE_SUFFIX: &str = "_captioned_mp4v";

/// Re-encode `input` to `output` with the configured codec.
///
/// `output` must match `input` in frame size, rate and count; it is removed
/// if encoding fails or the check does not hold. The input is left in place.
pub fn transcode_h264(
    tools: &MediaTools,
    input: &Path,
    output: &Path,
    settings: &TranscodeSettings,
) -> MediaResult<VideoProperties> {
    let source = detect_properties(tools, input)?;

    let args: Vec<OsString> = vec![
        "-i".into(),
        input.as_os_str().to_os_string(),
        "-c:v".into(),
        settings.codec.clone().into(),
        "-pix_fmt".into(),
        settings.pixel_format.clone().into(),
        "-crf".into(),
        settings.crf.to_string().into(),
        "-preset".into(),
        settings.preset.clone().into(),
        "-movflags".into(),
        "+faststart".into(),
        "-an".into(),
        output.as_os_str().to_os_string(),
    ];

    if let Err(e) = tools.ffmpeg(args) {
        remove_partial(output);
        return Err(e);
    }

    verify_geometry(tools, &source, output)
}

/// Path of the captioned intermediate for `input`, in the same directory.
pub fn intermediate_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    input.with_file_name(format!("{}{}.mp4", stem, INTERMEDIATE_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaError;

    #[test]
    fn intermediate_sits_next_to_input() {
        assert_eq!(
            intermediate_path(Path::new("/out/samples/00_a_dancer.mp4")),
            PathBuf::from("/out/samples/00_a_dancer_captioned_mp4v.mp4")
        );
    }

    #[test]
    fn missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.mp4");
        let output = dir.path().join("final.mp4");

        let err = transcode_h264(
            &MediaTools::default(),
            &input,
            &output,
            &TranscodeSettings::default(),
        )
        .unwrap_err();

        assert!(matches!(err, MediaError::InputNotFound(_)));
        assert!(!output.exists());
    }
}
