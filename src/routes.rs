use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as UrlPath, Query, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::non_empty,
    dispatcher::DispatcherContext,
    error::{ApiError, success},
    extractor::{DownloadRequest, DownloadedMedia},
    formats::resolve_selector,
    presets::{self, Delivery},
};

const SERVICE_NAME: &str = "Universal Media Downloader API";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: DispatcherContext,
    pub log_file: Arc<PathBuf>,
}

impl AppState {
    pub fn new(dispatcher: DispatcherContext, log_file: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher,
            log_file: Arc::new(log_file.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub url: String,
    pub format_id: Option<String>,
    pub audio_only: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadLink {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'static str>,
    title: Option<String>,
    thumbnail: Option<String>,
    download_url: String,
}

impl DownloadLink {
    fn new(
        media: DownloadedMedia,
        kind: &'static str,
        quality: Option<&'static str>,
        base_url: &str,
    ) -> Self {
        Self {
            kind,
            quality,
            download_url: format!("{base_url}/cache/{}", media.file_name()),
            title: media.title,
            thumbnail: media.thumbnail,
        }
    }
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/health", get(health))
        .route("/info", get(get_info))
        .route("/download", get(download))
        .route("/download/{preset}", get(download_preset))
        .route("/cache/{filename}", get(serve_cache))
        .route("/logs", get(get_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn landing() -> Response {
    let presets: Vec<String> = presets::PRESETS
        .iter()
        .map(|preset| format!("/download/{}", preset.name))
        .collect();

    success(serde_json::json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "routes": {
            "info": "/info?url=<media url>",
            "download": "/download?url=<media url>&format_id=<id>&audio_only=<bool>",
            "presets": presets,
            "cache": "/cache/{filename}",
            "logs": "/logs",
        }
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn get_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> Result<Response, ApiError> {
    let url = required_url(&query.url)?;

    match state.dispatcher.fetch_info(url.clone()).await {
        Ok(info) => Ok(success(info)),
        Err(error) => {
            error!("/info failed for {url:?}: {error}");
            Err(error.into())
        }
    }
}

pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let url = required_url(&query.url)?;
    let audio_only = query.audio_only.as_deref().is_some_and(is_truthy);
    let choice = resolve_selector(query.format_id.as_deref(), audio_only);
    info!(
        "Received download request for {url:?} with selector {:?}",
        choice.selector
    );

    let media = state
        .dispatcher
        .download(DownloadRequest {
            url: url.clone(),
            format_selector: choice.selector,
            audio_only: choice.audio_only,
        })
        .await
        .map_err(|error| {
            error!("Download failed for {url:?}: {error}");
            ApiError::from(error)
        })?;

    let kind = if choice.audio_only { "audio" } else { "video" };
    Ok(success(DownloadLink::new(
        media,
        kind,
        None,
        &public_base_url(&headers),
    )))
}

pub async fn download_preset(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
    Query(query): Query<InfoQuery>,
) -> Result<Response, ApiError> {
    let preset = presets::find(&name)
        .ok_or_else(|| ApiError::not_found(format!("Unknown download route: {name}")))?;
    let url = required_url(&query.url)?;
    info!("Received {} download request for {url:?}", preset.name);

    let media = state
        .dispatcher
        .download(DownloadRequest {
            url: url.clone(),
            format_selector: preset.selector.to_string(),
            audio_only: preset.audio_only,
        })
        .await
        .map_err(|error| {
            error!("{} download failed for {url:?}: {error}", preset.name);
            ApiError::from(error)
        })?;

    match preset.delivery {
        Delivery::Link => Ok(success(DownloadLink::new(
            media,
            preset.media_kind(),
            preset.quality,
            &public_base_url(&headers),
        ))),
        Delivery::Stream {
            media_type,
            extension,
            fallback_name,
        } => {
            if !tokio::fs::try_exists(&media.file_path).await.unwrap_or(false) {
                error!("Downloaded file not found in cache for {url:?}");
                return Err(ApiError::not_found("Downloaded file not found in cache."));
            }

            let title = media
                .title
                .as_deref()
                .and_then(non_empty)
                .unwrap_or(fallback_name);
            file_response(&media.file_path, media_type, &format!("{title}.{extension}")).await
        }
    }
}

pub async fn serve_cache(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, ApiError> {
    let path = state
        .dispatcher
        .cache()
        .resolve(&filename)
        .await
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    file_response(&path, "application/octet-stream", &filename).await
}

pub async fn get_logs(State(state): State<AppState>) -> Result<Response, ApiError> {
    let path = state.log_file.as_path();
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("logs.txt")
        .to_string();

    file_response(path, "text/plain; charset=utf-8", &filename).await
}

async fn file_response(
    path: &Path,
    content_type: &'static str,
    filename: &str,
) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(path).await.map_err(|error| {
        if error.kind() == ErrorKind::NotFound {
            ApiError::not_found("File not found")
        } else {
            ApiError::internal(format!("Could not open {}: {error}", path.display()))
        }
    })?;
    let metadata = file
        .metadata()
        .await
        .map_err(|error| ApiError::internal(format!("Could not read file metadata: {error}")))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

/// Query values may arrive URL-encoded a second time; decode once more.
fn decode_url(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn required_url(raw: &str) -> Result<String, ApiError> {
    let decoded = decode_url(raw.trim());
    non_empty(&decoded)
        .map(ToString::to_string)
        .ok_or_else(|| ApiError::bad_request("Provide a media URL in the `url` query parameter."))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(non_empty)
}

/// Public origin of this service as seen by the client, honoring proxy headers.
fn public_base_url(headers: &HeaderMap) -> String {
    let host = header_value(headers, "x-forwarded-host")
        .or_else(|| header_value(headers, "host"))
        .unwrap_or("localhost");
    let scheme = header_value(headers, "x-forwarded-proto").unwrap_or("http");
    format!("{scheme}://{host}")
}

pub fn build_cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, ApiError> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]);

    if allowed_origins.is_empty() {
        info!("ALLOWED_ORIGINS not set; accepting requests from any origin.");
        return Ok(base.allow_origin(Any));
    }

    let normalized_origins = allowed_origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        normalized_origins.len(),
        normalized_origins
    );

    let normalized_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| normalized_origins.contains(value));
        if !allowed {
            debug!("CORS rejected origin {:?}", origin);
        }
        allowed
    });

    Ok(base.allow_origin(allow_origin))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        warn!("Filename {:?} has no printable characters", value);
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
