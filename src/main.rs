use std::sync::Arc;

use media_downloader_api::{
    cache::CacheStore,
    config::ServiceConfig,
    dispatcher::DispatcherContext,
    error::ApiError,
    extractor::{Extractor, YtDlp},
    logging,
    pool::WorkerPool,
    routes::{self, AppState},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let config = ServiceConfig::from_env();

    if let Err(error) = logging::init(&config) {
        warn!(
            "Could not open log file {}: {error}; logging to stdout only",
            config.log_file.display()
        );
    }

    if let Err(error) = run(config).await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run(config: ServiceConfig) -> Result<(), ApiError> {
    let cache = CacheStore::new(&config.cache_dir, config.max_cache_files);
    cache.ensure_dir().await.map_err(|error| {
        ApiError::internal(format!(
            "Could not create cache directory {}: {error}",
            config.cache_dir.display()
        ))
    })?;

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlp::new(&config, cache.clone()));
    let pool = WorkerPool::new(config.worker_threads);
    info!(
        "Worker pool ready with {} worker(s); cache keeps at most {} file(s) in {}",
        pool.width(),
        cache.max_files(),
        cache.dir().display()
    );

    let (dispatcher, dispatcher_handle) = DispatcherContext::start(cache, pool, extractor);
    let shutdown = dispatcher.shutdown_token();

    let cors = routes::build_cors_layer(&config.allowed_origins)?;
    let app = routes::router(AppState::new(dispatcher, config.log_file.clone()), cors);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Media downloader listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))?;

    if let Err(error) = dispatcher_handle.await {
        warn!("Dispatcher task ended abnormally: {error}");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and stops the download dispatcher.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received; stopping dispatcher");
    token.cancel();
}
