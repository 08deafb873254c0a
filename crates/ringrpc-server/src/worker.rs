use std::sync::Arc;
use tokio::sync::Semaphore;

use ringrpc_common::{Result, RingrpcError};

/// Bounded pool for running service methods off the I/O tasks.
///
/// At most `size` jobs run at once, each on tokio's blocking thread pool;
/// further jobs wait for a permit.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `job` once a permit is free.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::InvalidRequest`] if the job panicked or the
    /// pool was closed.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| RingrpcError::InvalidRequest(format!("Failed to acquire worker: {}", e)))?;

        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await;

        outcome.map_err(|e| RingrpcError::InvalidRequest(format!("Worker task failed: {}", e)))
    }
}
