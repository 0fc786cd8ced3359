//! Caption burn-in with the ffmpeg `drawtext` filter.
//!
//! The caption is written to a text file next to the output and read with
//! `textfile=` and `expansion=none`, so prompt text reaches the frame
//! unchanged whatever characters it contains. Only option values that go
//! into the filter graph (paths, colors) need escaping.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{MediaError, MediaResult};
use super::ffmpeg::MediaTools;
use super::probe::{detect_properties, VideoProperties};
use crate::config::CaptionSettings;

/// Appearance of the burned-in caption.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionStyle {
    pub font_size: u32,
    pub font_color: String,
    pub top_margin: u32,
    pub font_file: Option<PathBuf>,
    pub border_width: u32,
    pub border_color: String,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self::from(&CaptionSettings::default())
    }
}

impl From<&CaptionSettings> for CaptionStyle {
    fn from(settings: &CaptionSettings) -> Self {
        Self {
            font_size: settings.font_size,
            font_color: settings.font_color.clone(),
            top_margin: settings.top_margin,
            font_file: settings.font_file.as_ref().map(PathBuf::from),
            border_width: settings.border_width,
            border_color: settings.border_color.clone(),
        }
    }
}

/// Escape a value for an unquoted filter option.
///
/// Two levels apply: the option parser (`\ ' :`) and then the filter graph
/// parser (`\ ' , ; [ ]`).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => out.push_str(r"\\\\"),
            '\'' => out.push_str(r"\\\'"),
            ':' => out.push_str(r"\\:"),
            ',' | ';' | '[' | ']' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Build the `drawtext` filter for a caption stored in `text_file`.
///
/// The text is centred horizontally and placed `top_margin` pixels from
/// the top of every frame.
pub fn drawtext_filter(text_file: &Path, style: &CaptionStyle) -> String {
    let mut filter = format!(
        "drawtext=textfile={}:expansion=none:fontsize={}:fontcolor={}:x=(w-text_w)/2:y={}",
        escape_filter_value(&text_file.to_string_lossy()),
        style.font_size,
        escape_filter_value(&style.font_color),
        style.top_margin
    );
    if let Some(font) = &style.font_file {
        filter.push_str(":fontfile=");
        filter.push_str(&escape_filter_value(&font.to_string_lossy()));
    }
    if style.border_width > 0 {
        filter.push_str(&format!(
            ":borderw={}:bordercolor={}",
            style.border_width,
            escape_filter_value(&style.border_color)
        ));
    }
    filter
}

/// Caption text as drawtext should render it.
fn caption_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim_end_matches('\n')
        .to_string()
}

/// Burn `text` into every frame of `input`, writing an MPEG-4 (`mp4v`)
/// video to `output`.
///
/// The input is probed first; if it cannot be read nothing is written.
/// The output must keep the input's frame size, rate and count, otherwise
/// it is removed and [`MediaError::GeometryMismatch`] is returned. The
/// input is left in place.
pub fn burn_caption(
    tools: &MediaTools,
    input: &Path,
    output: &Path,
    text: &str,
    style: &CaptionStyle,
) -> MediaResult<VideoProperties> {
    let source = detect_properties(tools, input)?;

    let text_file = output.with_extension("caption.txt");
    fs::write(&text_file, caption_text(text))
        .map_err(|e| MediaError::io("writing caption text", e))?;

    let args: Vec<OsString> = vec![
        "-i".into(),
        input.as_os_str().to_os_string(),
        "-vf".into(),
        drawtext_filter(&text_file, style).into(),
        "-c:v".into(),
        "mpeg4".into(),
        "-tag:v".into(),
        "mp4v".into(),
        "-q:v".into(),
        "2".into(),
        "-an".into(),
        output.as_os_str().to_os_string(),
    ];
    let result = tools.ffmpeg(args);
    let _ = fs::remove_file(&text_file);

    if let Err(e) = result {
        remove_partial(output);
        return Err(e);
    }

    verify_geometry(tools, &source, output)
}

/// Probe `output` and require it to match `source`; remove it otherwise.
pub(crate) fn verify_geometry(
    tools: &MediaTools,
    source: &VideoProperties,
    output: &Path,
) -> MediaResult<VideoProperties> {
    let actual = match detect_properties(tools, output) {
        Ok(props) => props,
        Err(e) => {
            remove_partial(output);
            return Err(e);
        }
    };

    if !source.same_geometry(&actual) {
        remove_partial(output);
        return Err(MediaError::GeometryMismatch {
            path: output.to_path_buf(),
            expected: source.clone(),
            actual,
        });
    }

    Ok(actual)
}

pub(crate) fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_both_parser_levels() {
        assert_eq!(escape_filter_value("plain"), "plain");
        assert_eq!(escape_filter_value("a:b"), r"a\\:b");
        assert_eq!(escape_filter_value("it's"), r"it\\\'s");
        assert_eq!(escape_filter_value(r"C:\tmp"), r"C\\:\\\\tmp");
        assert_eq!(escape_filter_value("a,b;[c]"), r"a\,b\;\[c\]");
    }

    #[test]
    fn filter_centres_text_at_top_margin() {
        let style = CaptionStyle::default();
        let filter = drawtext_filter(Path::new("/tmp/cap.txt"), &style);

        assert!(filter.starts_with("drawtext=textfile=/tmp/cap.txt:expansion=none"));
        assert!(filter.contains(":fontsize=24:fontcolor=black"));
        assert!(filter.contains(":x=(w-text_w)/2:y=10"));
        assert!(!filter.contains("fontfile"));
        assert!(!filter.contains("borderw"));
    }

    #[test]
    fn filter_includes_font_and_border() {
        let style = CaptionStyle {
            font_file: Some(PathBuf::from("/fonts/Dejavu Sans.ttf")),
            border_width: 2,
            border_color: "white@0.5".to_string(),
            ..CaptionStyle::default()
        };
        let filter = drawtext_filter(Path::new("out/cap.txt"), &style);
        assert!(filter.contains(":fontfile=/fonts/Dejavu Sans.ttf"));
        assert!(filter.ends_with(":borderw=2:bordercolor=white@0.5"));
    }

    #[test]
    fn caption_text_normalizes_line_endings() {
        assert_eq!(caption_text("a\r\nb\r\n"), "a\nb");
        assert_eq!(caption_text("50% of 'it': done\n"), "50% of 'it': done");
    }

    #[test]
    fn missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let tools = MediaTools::default();

        let err = burn_caption(
            &tools,
            &dir.path().join("missing.mp4"),
            &output,
            "hello",
            &CaptionStyle::default(),
        )
        .unwrap_err();

        assert!(matches!(err, MediaError::InputNotFound(_)));
        assert!(!output.exists());
        assert!(!output.with_extension("caption.txt").exists());
    }
}
