use std::{io::ErrorKind, path::PathBuf, process::Output, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};

use crate::{
    cache::CacheStore,
    config::ServiceConfig,
    error::ExtractError,
    formats::{AUDIO_SELECTOR, MediaInfo, RawMediaInfo, summarize},
};

const AUDIO_CODEC: &str = "mp3";
const AUDIO_QUALITY: &str = "320K";
const DOWNLOAD_REPORT_TEMPLATE: &str = "after_move:%(.{id,title,thumbnail,ext,filepath})j";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format_selector: String,
    pub audio_only: bool,
}

/// A finished download sitting in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub id: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub file_path: PathBuf,
    pub ext: String,
}

impl DownloadedMedia {
    /// Name of the file inside the cache directory, as served by `/cache/`.
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{}.{}", self.id, self.ext))
    }
}

/// The external tool that resolves media URLs.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch_info(&self, url: &str) -> Result<MediaInfo, ExtractError>;

    /// Downloads into the cache directory as `<id>.<ext>`.
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadedMedia, ExtractError>;
}

/// Drives the `yt-dlp` binary as a subprocess.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    cache: CacheStore,
    cookie_file: PathBuf,
    timeout: Option<Duration>,
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct DownloadReport {
    id: String,
    title: Option<String>,
    thumbnail: Option<String>,
    ext: Option<String>,
    filepath: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(config: &ServiceConfig, cache: CacheStore) -> Self {
        Self {
            binary: config.yt_dlp_bin.clone(),
            cache,
            cookie_file: config.cookie_file.clone(),
            timeout: config.yt_dlp_timeout,
            verbose: config.debug,
        }
    }

    async fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string()];

        if tokio::fs::try_exists(&self.cookie_file).await.unwrap_or(false) {
            args.push("--cookies".to_string());
            args.push(self.cookie_file.to_string_lossy().into_owned());
        }

        if self.verbose {
            args.push("--verbose".to_string());
        } else {
            args.push("--no-warnings".to_string());
        }
        args
    }

    pub async fn info_args(&self, url: &str) -> Vec<String> {
        let mut args = vec!["-J".to_string()];
        args.extend(self.common_args().await);
        args.push(url.to_string());
        args
    }

    pub async fn download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let output_template = format!("{}/%(id)s.%(ext)s", self.cache.dir().to_string_lossy());
        let selector = if request.audio_only {
            AUDIO_SELECTOR.to_string()
        } else {
            request.format_selector.clone()
        };

        let mut args = self.common_args().await;
        args.extend([
            "-f".to_string(),
            selector,
            "-o".to_string(),
            output_template,
            "--no-mtime".to_string(),
            "--print".to_string(),
            DOWNLOAD_REPORT_TEMPLATE.to_string(),
        ]);

        if request.audio_only {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                AUDIO_CODEC.to_string(),
                "--audio-quality".to_string(),
                AUDIO_QUALITY.to_string(),
            ]);
        }

        args.push(request.url.clone());
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, ExtractError> {
        debug!("Running {} {:?}", self.binary, args);
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => timeout(limit, command.output())
                .await
                .map_err(|_| ExtractError::TimedOut(limit.as_secs()))?,
            None => command.output().await,
        }
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ExtractError::ToolMissing(self.binary.clone())
            } else {
                ExtractError::Failed(format!("could not run {}: {error}", self.binary))
            }
        })?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            let line = line.trim();
            if !line.is_empty() {
                debug!(target: "yt_dlp", "{line}");
            }
        }

        if !output.status.success() {
            return Err(ExtractError::Failed(run_error_message(&output.stderr)));
        }

        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn fetch_info(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        info!("Fetching info for {url:?}");
        let output = self.run(self.info_args(url).await).await?;
        let raw: RawMediaInfo = serde_json::from_slice(&output.stdout)
            .map_err(|error| ExtractError::InvalidOutput(error.to_string()))?;

        info!("Got info for {url:?}");
        Ok(summarize(raw))
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadedMedia, ExtractError> {
        info!(
            "Starting {} download for {:?} with selector {:?}",
            if request.audio_only { "audio" } else { "video" },
            request.url,
            request.format_selector
        );
        let output = self.run(self.download_args(request).await).await?;
        let media = report_into_media(
            parse_download_report(&output.stdout)?,
            request.audio_only,
            &self.cache,
        );
        info!("Download complete, file saved at {:?}", media.file_path);
        Ok(media)
    }
}

/// Prefers the path yt-dlp reports, since it sanitizes ids when naming files.
fn report_into_media(report: DownloadReport, audio_only: bool, cache: &CacheStore) -> DownloadedMedia {
    let reported_path = report
        .filepath
        .filter(|path| !path.as_os_str().is_empty());
    let reported_ext = reported_path
        .as_deref()
        .and_then(|path| path.extension())
        .and_then(|ext| ext.to_str())
        .map(ToString::to_string);

    let ext = if audio_only {
        AUDIO_CODEC.to_string()
    } else {
        reported_ext
            .or(report.ext)
            .unwrap_or_else(|| "mp4".to_string())
    };
    let file_path = reported_path.unwrap_or_else(|| cache.path_for(&report.id, &ext));

    DownloadedMedia {
        id: report.id,
        title: report.title,
        thumbnail: report.thumbnail,
        file_path,
        ext,
    }
}

fn parse_download_report(stdout: &[u8]) -> Result<DownloadReport, ExtractError> {
    let line = String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
        .ok_or_else(|| ExtractError::InvalidOutput("download produced no report".to_string()))?;

    serde_json::from_str(&line).map_err(|error| ExtractError::InvalidOutput(error.to_string()))
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string();

    if message.to_ascii_lowercase().contains("unsupported url") {
        format!("Unsupported or invalid URL: {message}")
    } else {
        message
    }
}
