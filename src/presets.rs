//! Named download routes (`/download/{preset}`), each pinning a selector,
//! audio mode and how the finished file is handed back.

use crate::formats::AUDIO_SELECTOR;

const FHD_MP4_SELECTOR: &str =
    "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080][ext=mp4]";
const BEST_MP4_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// JSON body pointing at `/cache/<id>.<ext>`.
    Link,
    /// The file itself as the response body.
    Stream {
        media_type: &'static str,
        extension: &'static str,
        fallback_name: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPreset {
    pub name: &'static str,
    pub selector: &'static str,
    pub audio_only: bool,
    pub quality: Option<&'static str>,
    pub delivery: Delivery,
}

impl DownloadPreset {
    pub fn media_kind(&self) -> &'static str {
        if self.audio_only { "audio" } else { "video" }
    }
}

pub const PRESETS: [DownloadPreset; 8] = [
    DownloadPreset {
        name: "ytmp4fhd",
        selector: FHD_MP4_SELECTOR,
        audio_only: false,
        quality: Some("best <=1080p"),
        delivery: Delivery::Link,
    },
    DownloadPreset {
        name: "ytmp3",
        selector: AUDIO_SELECTOR,
        audio_only: true,
        quality: Some("320kbps"),
        delivery: Delivery::Link,
    },
    DownloadPreset {
        name: "facebook",
        selector: BEST_MP4_SELECTOR,
        audio_only: false,
        quality: None,
        delivery: Delivery::Link,
    },
    DownloadPreset {
        name: "facebookmp3",
        selector: AUDIO_SELECTOR,
        audio_only: true,
        quality: Some("320kbps"),
        delivery: Delivery::Link,
    },
    DownloadPreset {
        name: "instagram",
        selector: BEST_MP4_SELECTOR,
        audio_only: false,
        quality: Some("best"),
        delivery: Delivery::Link,
    },
    DownloadPreset {
        name: "instagrammp3",
        selector: AUDIO_SELECTOR,
        audio_only: true,
        quality: Some("320kbps"),
        delivery: Delivery::Link,
    },
    DownloadPreset {
        name: "tiktok",
        selector: BEST_MP4_SELECTOR,
        audio_only: false,
        quality: None,
        delivery: Delivery::Stream {
            media_type: "video/mp4",
            extension: "mp4",
            fallback_name: "tiktok_video",
        },
    },
    DownloadPreset {
        name: "tiktokmp3",
        selector: AUDIO_SELECTOR,
        audio_only: true,
        quality: None,
        delivery: Delivery::Stream {
            media_type: "audio/mpeg",
            extension: "mp3",
            fallback_name: "tiktok_audio",
        },
    },
];

pub fn find(name: &str) -> Option<&'static DownloadPreset> {
    PRESETS.iter().find(|preset| preset.name.eq_ignore_ascii_case(name))
}
