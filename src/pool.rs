use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;
use tokio_util::task::AbortOnDropHandle;
use tracing::error;

use crate::error::ExtractError;

/// Bounded set of workers for extraction calls. Each job holds one permit
/// for its whole run, so at most `width` jobs execute at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `job` on a worker once one is free and waits for its result.
    /// A panicking job is reported as [`ExtractError::Worker`]. Dropping the
    /// returned future aborts the job and frees its worker.
    pub async fn run<F, T>(&self, job: F) -> Result<T, ExtractError>
    where
        F: Future<Output = Result<T, ExtractError>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExtractError::Worker("worker pool is closed".to_string()))?;

        let handle = AbortOnDropHandle::new(tokio::spawn(async move {
            let _permit = permit;
            job.await
        }));

        match handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                error!("Worker job panicked");
                Err(ExtractError::Worker("job panicked".to_string()))
            }
            Err(join_error) => Err(ExtractError::Worker(join_error.to_string())),
        }
    }
}
