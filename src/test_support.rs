use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    error::ExtractError,
    extractor::{DownloadRequest, DownloadedMedia, Extractor},
    formats::{FileSizeMb, FormatSummary, MediaInfo},
};

/// In-process stand-in for yt-dlp. URLs containing `fail` error out, URLs
/// containing `panic` panic, everything else writes `<last segment>.<ext>`
/// into the cache directory, back-dated by a year when the URL contains `stale`. A gate, when set, holds every download until
/// the test adds permits.
pub struct ScriptedExtractor {
    cache_dir: PathBuf,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(cache_dir: impl Into<PathBuf>, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(cache_dir)
        }
    }

    /// URLs passed to `download`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("extractor was not called in time");
    }
}

pub fn media_id(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("media")
        .to_string()
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn fetch_info(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if url.contains("fail") {
            return Err(ExtractError::Failed(format!("Unsupported URL: {url}")));
        }

        Ok(MediaInfo {
            title: format!("Title {}", media_id(url)),
            thumbnail_url: Some(format!("https://img.example/{}.jpg", media_id(url))),
            description: None,
            formats: vec![FormatSummary {
                format_id: "720p".to_string(),
                filesize_mb: FileSizeMb::Known(12.5),
                ext: "mp4".to_string(),
            }],
        })
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadedMedia, ExtractError> {
        self.calls.lock().unwrap().push(request.url.clone());

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| ExtractError::Worker("gate closed".to_string()))?
                .forget();
        }

        if request.url.contains("fail") {
            return Err(ExtractError::Failed(format!(
                "Unable to download {}",
                request.url
            )));
        }
        if request.url.contains("panic") {
            panic!("scripted panic for {}", request.url);
        }

        let id = media_id(&request.url);
        let ext = if request.audio_only { "mp3" } else { "mp4" };
        let file_path = self.cache_dir.join(format!("{id}.{ext}"));
        tokio::fs::write(&file_path, format!("media for {}", request.url))
            .await
            .map_err(|error| ExtractError::Failed(error.to_string()))?;
        if request.url.contains("stale") {
            // server-provided Last-Modified one year back
            std::fs::File::options()
                .write(true)
                .open(&file_path)
                .and_then(|file| file.set_modified(SystemTime::now() - Duration::from_secs(365 * 24 * 3600)))
                .map_err(|error| ExtractError::Failed(error.to_string()))?;
        }

        Ok(DownloadedMedia {
            title: Some(format!("Title {id}")),
            thumbnail: Some(format!("https://img.example/{id}.jpg")),
            file_path,
            ext: ext.to_string(),
            id,
        })
    }
}
