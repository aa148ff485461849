#![forbid(unsafe_code)]

use crate::config::RuntimeConfig;
use crate::coordinator::QueryCoordinator;
use crate::debouncer::Debouncer;
use crate::error::SessionError;
use crate::presenter::Presenter;
use crate::runner::{TaskHandle, TaskRunner};
use cv_storage::{SqliteStore, StoreError, StorePool};

/// One open library: the pool, the runner that uses it, the coordinator that reports to
/// `P`, and the debouncer that triggers the consolidated refresh.
pub struct Session<P> {
    config: RuntimeConfig,
    runner: TaskRunner,
    coordinator: QueryCoordinator<P>,
    debouncer: Debouncer,
}

impl<P: Presenter> Session<P> {
    /// Must be called from inside a tokio runtime.
    pub fn open<F>(config: RuntimeConfig, presenter: P, refresh: F) -> Result<Self, SessionError>
    where
        F: FnMut() + Send + 'static,
    {
        config.validate()?;
        let pool = StorePool::open(&config.storage_dir, config.store.clone())?;
        let runner = TaskRunner::new(pool, config.workers)?;
        let coordinator = QueryCoordinator::new(runner.clone(), presenter);
        let debouncer = Debouncer::spawn(config.coalesce_window, refresh);
        tracing::info!(
            storage_dir = %config.storage_dir.display(),
            workers = config.workers,
            max_connections = config.store.max_connections,
            coalesce_ms = config.coalesce_ms(),
            "session opened"
        );
        Ok(Self {
            config,
            runner,
            coordinator,
            debouncer,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn pool(&self) -> &StorePool {
        self.runner.pool()
    }

    pub fn coordinator(&mut self) -> &mut QueryCoordinator<P> {
        &mut self.coordinator
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Runs `job` on the runner as the debounced operation `name`: it is registered now and
    /// completes when the job ends, whether it succeeded, failed or panicked.
    pub fn run_tracked<T, F>(&self, name: impl Into<String>, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let guard = self.debouncer.track(name);
        self.runner.submit("tracked", move |store| {
            let _guard = guard;
            job(store)
        })
    }
}
