use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    cache::CacheStore,
    error::ExtractError,
    extractor::{DownloadRequest, Extractor},
    formats::MediaInfo,
    pool::WorkerPool,
    queue::{DownloadOutcome, DownloadTask, ResultSlot, TaskQueue, TaskReceiver, task_queue},
};

/// Everything a request handler needs to reach the download machinery.
/// Built once at startup and cloned into each handler.
#[derive(Clone)]
pub struct DispatcherContext {
    queue: TaskQueue,
    pool: WorkerPool,
    cache: CacheStore,
    extractor: Arc<dyn Extractor>,
    shutdown: CancellationToken,
}

impl DispatcherContext {
    /// Creates the queue and spawns the dispatcher loop on the current runtime.
    pub fn start(
        cache: CacheStore,
        pool: WorkerPool,
        extractor: Arc<dyn Extractor>,
    ) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = task_queue();
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher {
            receiver,
            pool: pool.clone(),
            cache: cache.clone(),
            extractor: Arc::clone(&extractor),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(dispatcher.run());

        let context = Self {
            queue,
            pool,
            cache,
            extractor,
            shutdown,
        };
        (context, handle)
    }

    /// Runs a metadata lookup directly on the pool, bypassing the queue.
    pub async fn fetch_info(&self, url: String) -> Result<MediaInfo, ExtractError> {
        let extractor = Arc::clone(&self.extractor);
        self.pool
            .run(async move { extractor.fetch_info(&url).await })
            .await
    }

    pub fn enqueue(&self, request: DownloadRequest) -> ResultSlot {
        self.queue.enqueue(request)
    }

    /// Trims the cache, queues the download and waits for its outcome.
    pub async fn download(&self, request: DownloadRequest) -> DownloadOutcome {
        self.cache.evict().await;
        self.enqueue(request).wait().await
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

struct Dispatcher {
    receiver: TaskReceiver,
    pool: WorkerPool,
    cache: CacheStore,
    extractor: Arc<dyn Extractor>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self) {
        info!("Download dispatcher started");

        loop {
            let task = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.receiver.next() => match next {
                    Some(task) => task,
                    None => break,
                },
            };
            self.process(task).await;
        }

        // queued tasks are dropped with the receiver; their slots read as stopped
        self.receiver.close();
        info!("Download dispatcher stopped");
    }

    /// One task at a time: the next one is not taken until this one resolves.
    async fn process(&self, task: DownloadTask) {
        let DownloadTask {
            id,
            request,
            enqueued_at,
            slot,
        } = task;

        let waited = Utc::now() - enqueued_at;
        info!(
            "Task {id} running after {}ms in queue: {}",
            waited.num_milliseconds(),
            request.url
        );

        let url = request.url.clone();
        let extractor = Arc::clone(&self.extractor);
        let job = self
            .pool
            .run(async move { extractor.download(&request).await });

        let outcome = tokio::select! {
            biased;
            // dropping the job aborts its pool task and kills the child process
            _ = self.shutdown.cancelled() => {
                warn!("Task {id} abandoned during shutdown: {url}");
                return;
            }
            outcome = job => outcome,
        };

        match &outcome {
            Ok(media) => info!("Task {id} succeeded: {:?}", media.file_path),
            Err(error) => error!("Task {id} failed for {url}: {error}"),
        }

        let produced = outcome.as_ref().ok().map(|media| media.file_path.as_path());
        self.cache.evict_keeping(produced).await;
        slot.complete(outcome);
    }
}
