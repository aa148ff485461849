#![forbid(unsafe_code)]

use cv_storage::StoreError;
use std::sync::Arc;
use thiserror::Error;

/// Why a runner task produced no value. Cloneable so one failure can be handed to the
/// presenter and logged without re-running the task.
#[derive(Clone, Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Store(Arc<StoreError>),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task runner shut down")]
    Shutdown,
}

impl TaskError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::Panicked(_) => "TASK_PANICKED",
            Self::Shutdown => "RUNNER_SHUTDOWN",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::Panicked(_) | Self::Shutdown => false,
        }
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        Self::Store(Arc::new(err))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: expected a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} must be at least 1")]
    Zero { var: &'static str },
    #[error("workers ({workers}) must not exceed max_connections ({max_connections})")]
    WorkersExceedConnections {
        workers: usize,
        max_connections: usize,
    },
}

/// Everything that can stop a [`crate::Session`] from starting.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no tokio runtime is running")]
    NoRuntime,
}
