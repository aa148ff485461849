#![forbid(unsafe_code)]

use crate::error::{SessionError, TaskError};
use cv_storage::{SqliteStore, StoreError, StorePool};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

/// Bounded pool of store jobs. Each job runs on the blocking pool with its own pooled
/// connection, which is released when the job returns or unwinds.
#[derive(Clone, Debug)]
pub struct TaskRunner {
    pool: StorePool,
    permits: Arc<Semaphore>,
    workers: usize,
    next_id: Arc<AtomicU64>,
    handle: Handle,
}

impl TaskRunner {
    /// Must be called from inside a tokio runtime; the runner keeps that runtime's handle.
    pub fn new(pool: StorePool, workers: usize) -> Result<Self, SessionError> {
        let handle = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let workers = workers.max(1);
        Ok(Self {
            pool,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            next_id: Arc::new(AtomicU64::new(0)),
            handle,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Queues `job` and returns at once. Failures, including panics, are confined to the
    /// returned handle.
    pub fn submit<T, F>(&self, label: &'static str, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let permits = Arc::clone(&self.permits);
        let pool = self.pool.clone();
        let span = tracing::debug_span!("task", task_id = id, label);

        let join = self.handle.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Err(TaskError::Shutdown);
                };
                tracing::debug!("task started");
                let outcome = tokio::task::spawn_blocking(move || {
                    let mut store = pool.acquire()?;
                    job(&mut *store)
                })
                .await;
                match outcome {
                    Ok(Ok(value)) => {
                        tracing::debug!("task finished");
                        Ok(value)
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(code = err.code(), error = %err, "task failed");
                        Err(TaskError::from(err))
                    }
                    Err(err) => {
                        let err = join_failure(err);
                        tracing::warn!(error = %err, "task aborted");
                        Err(err)
                    }
                }
            }
            .instrument(span),
        );

        TaskHandle { id, label, join }
    }

    /// Stops admitting queued jobs; running jobs finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[derive(Debug)]
pub struct TaskHandle<T> {
    id: u64,
    label: &'static str,
    join: JoinHandle<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> Result<T, TaskError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(join_failure(err)),
        }
    }
}

fn join_failure(err: JoinError) -> TaskError {
    match err.try_into_panic() {
        Ok(payload) => TaskError::Panicked(panic_message(payload.as_ref())),
        Err(_) => TaskError::Shutdown,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
