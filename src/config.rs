use std::{path::PathBuf, time::Duration};

pub const DEFAULT_PORT: u16 = 10_000;
pub const DEFAULT_CACHE_DIR: &str = "cache";
pub const DEFAULT_MAX_CACHE_FILES: usize = 10;
pub const DEFAULT_WORKER_THREADS: usize = 3;
pub const DEFAULT_COOKIE_FILE: &str = "cookies.txt";
pub const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
pub const DEFAULT_LOG_FILE: &str = "logs.txt";

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub cache_dir: PathBuf,
    pub max_cache_files: usize,
    pub worker_threads: usize,
    pub cookie_file: PathBuf,
    pub yt_dlp_bin: String,
    /// `None` leaves timing entirely to the extraction tool.
    pub yt_dlp_timeout: Option<Duration>,
    pub log_file: PathBuf,
    pub debug: bool,
    /// Empty means any origin is accepted.
    pub allowed_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str| lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string));

        let bind_addr = text("APP_ADDR").unwrap_or_else(|| {
            let port = text("PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT);
            format!("0.0.0.0:{port}")
        });

        let allowed_origins = text("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            bind_addr,
            cache_dir: text("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            max_cache_files: read_usize(&lookup, "MAX_CACHE_FILES")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CACHE_FILES),
            worker_threads: read_usize(&lookup, "WORKER_THREADS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_WORKER_THREADS),
            cookie_file: text("COOKIE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIE_FILE)),
            yt_dlp_bin: text("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            yt_dlp_timeout: read_usize(&lookup, "YT_DLP_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(|seconds| Duration::from_secs(seconds as u64)),
            log_file: text("LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            debug: read_bool(&lookup, "DEBUG").unwrap_or(false),
            allowed_origins,
        }
    }

    pub fn default_log_filter(&self) -> String {
        let level = if self.debug { "debug" } else { "info" };
        format!("media_downloader_api={level},yt_dlp={level},tower_http={level}")
    }
}

fn read_bool<F>(lookup: &F, name: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_usize<F>(lookup: &F, name: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|value| value.trim().parse::<usize>().ok())
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
