//! Shaping of raw extractor metadata into the `/info` response, and
//! translation of requested format ids into extractor selectors.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize, Serializer};

pub const DEFAULT_VIDEO_SELECTOR: &str = "bestvideo+bestaudio/best";
pub const AUDIO_SELECTOR: &str = "bestaudio/best";
pub const AUDIO_FORMAT_ID: &str = "mp3";
const MISSING_TITLE: &str = "No Title Found";
const LISTED_VIDEO_EXTENSIONS: [&str; 2] = ["mp4", "webm"];
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Deserialize)]
pub struct RawMediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawFormat {
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    pub tbr: Option<f64>,
    pub abr: Option<f64>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub description: Option<String>,
    pub formats: Vec<FormatSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatSummary {
    pub format_id: String,
    pub filesize_mb: FileSizeMb,
    pub ext: String,
}

/// Size estimate in MiB, serialized as a number or the string `"N/A"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileSizeMb {
    Known(f64),
    Unknown,
}

impl Serialize for FileSizeMb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(megabytes) => serializer.serialize_f64(*megabytes),
            Self::Unknown => serializer.serialize_str("N/A"),
        }
    }
}

impl FileSizeMb {
    fn from_bytes(bytes: Option<f64>) -> Self {
        match bytes {
            Some(bytes) if bytes > 0.0 => Self::Known((bytes / BYTES_PER_MB * 100.0).round() / 100.0),
            _ => Self::Unknown,
        }
    }
}

pub fn summarize(raw: RawMediaInfo) -> MediaInfo {
    let mut formats = Vec::new();
    let mut seen = Vec::new();

    for format in &raw.formats {
        let Some(height) = format.height.filter(|height| *height > 0) else {
            continue;
        };
        if !has_video(format) || !is_listed_video_ext(format) {
            continue;
        }

        let format_id = format!("{height}p");
        if seen.contains(&format_id) {
            continue;
        }
        seen.push(format_id.clone());

        formats.push(FormatSummary {
            format_id,
            filesize_mb: FileSizeMb::from_bytes(estimated_bytes(format, raw.duration, format.tbr)),
            ext: format.ext.clone().unwrap_or_else(|| "mp4".to_string()),
        });
    }

    if let Some(audio) = best_audio(&raw.formats) {
        formats.push(FormatSummary {
            format_id: AUDIO_FORMAT_ID.to_string(),
            filesize_mb: FileSizeMb::from_bytes(estimated_bytes(audio, raw.duration, audio.abr)),
            ext: "mp3".to_string(),
        });
    }

    // unknown sizes first, then largest to smallest
    formats.sort_by(|a, b| match (a.filesize_mb, b.filesize_mb) {
        (FileSizeMb::Unknown, FileSizeMb::Unknown) => Ordering::Equal,
        (FileSizeMb::Unknown, FileSizeMb::Known(_)) => Ordering::Less,
        (FileSizeMb::Known(_), FileSizeMb::Unknown) => Ordering::Greater,
        (FileSizeMb::Known(left), FileSizeMb::Known(right)) => {
            right.partial_cmp(&left).unwrap_or(Ordering::Equal)
        }
    });

    MediaInfo {
        title: raw
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| MISSING_TITLE.to_string()),
        thumbnail_url: raw.thumbnail,
        description: raw.description,
        formats,
    }
}

/// Reported size, or `bitrate (kbps) * duration` when the extractor gave none.
fn estimated_bytes(format: &RawFormat, duration: Option<f64>, bitrate: Option<f64>) -> Option<f64> {
    let reported = format
        .filesize
        .filter(|size| *size > 0.0)
        .or(format.filesize_approx.filter(|size| *size > 0.0));
    if reported.is_some() {
        return reported;
    }

    match (duration, bitrate) {
        (Some(duration), Some(bitrate)) if duration > 0.0 && bitrate > 0.0 => {
            Some((bitrate * 1000.0 / 8.0 * duration).trunc())
        }
        _ => None,
    }
}

/// Highest `abr` among formats carrying audio; ties keep listing order.
fn best_audio(formats: &[RawFormat]) -> Option<&RawFormat> {
    let mut best: Option<&RawFormat> = None;
    for format in formats.iter().filter(|format| has_audio(format)) {
        let bitrate = format.abr.unwrap_or_default();
        if best.is_none_or(|current| bitrate > current.abr.unwrap_or_default()) {
            best = Some(format);
        }
    }
    best
}

fn has_video(format: &RawFormat) -> bool {
    format.vcodec.as_deref() != Some("none")
}

fn has_audio(format: &RawFormat) -> bool {
    format.acodec.as_deref() != Some("none")
}

fn is_listed_video_ext(format: &RawFormat) -> bool {
    format
        .ext
        .as_deref()
        .is_some_and(|ext| LISTED_VIDEO_EXTENSIONS.contains(&ext))
}

/// What the generic download route asks the extractor for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatChoice {
    pub selector: String,
    pub audio_only: bool,
}

/// Turns a format id as listed by `/info` (`"720p"`, `"mp3"`) into an
/// extractor selector. Unrecognized ids are passed through verbatim.
pub fn resolve_selector(format_id: Option<&str>, audio_only: bool) -> FormatChoice {
    let requested = format_id.map(str::trim).filter(|value| !value.is_empty());

    if audio_only || requested.is_some_and(|value| value.eq_ignore_ascii_case(AUDIO_FORMAT_ID)) {
        return FormatChoice {
            selector: AUDIO_SELECTOR.to_string(),
            audio_only: true,
        };
    }

    let selector = match requested {
        None => DEFAULT_VIDEO_SELECTOR.to_string(),
        Some(value) if value.eq_ignore_ascii_case("best") => DEFAULT_VIDEO_SELECTOR.to_string(),
        Some(value) => match parse_height(value) {
            Some(height) => {
                format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
            }
            None => value.to_string(),
        },
    };

    FormatChoice {
        selector,
        audio_only: false,
    }
}

fn parse_height(value: &str) -> Option<u32> {
    value
        .strip_suffix('p')
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}
