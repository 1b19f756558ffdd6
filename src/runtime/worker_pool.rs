use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task;

use crate::error::{ForecastError, Result};

/// Fixed-size pool for blocking work (model inference, upstream fetches).
///
/// At most `size` closures run at once; further callers queue on the semaphore. Work that has
/// been handed to the pool always runs to completion even if the caller stops waiting.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run an inference job. A job that panics surfaces as [`ForecastError::Model`].
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_as(ForecastError::Model, job).await
    }

    /// Run `job`, reporting a panicked or cancelled job through `kind`.
    pub async fn run_as<T, F>(&self, kind: fn(String) -> ForecastError, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| kind("worker pool closed".to_string()))?;
        task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| kind(format!("worker task failed: {e}")))?
    }
}
