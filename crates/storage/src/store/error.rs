#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("snapshot codec: {0}")]
    SnapshotCodec(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("store unavailable (in_use={in_use}, limit={limit})")]
    Unavailable { in_use: usize, limit: usize },
    #[error("store unavailable: cannot open connection: {0}")]
    ConnectFailed(#[source] Box<StoreError>),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("cluster not found: {key}")]
    ClusterNotFound { key: String },
    #[error("self merge rejected: {key}")]
    SelfMergeRejected { key: String },
    #[error("transaction aborted: {0}")]
    TransactionAborted(#[source] rusqlite::Error),
    #[error(
        "snapshot not found: {}",
        .snapshot_id.map_or_else(|| "latest".to_string(), |id| id.to_string())
    )]
    SnapshotNotFound { snapshot_id: Option<i64> },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQLITE",
            Self::SnapshotCodec(_) => "SNAPSHOT_CODEC",
            Self::InvalidInput(message) if message.starts_with("RESET_REQUIRED") => {
                "RESET_REQUIRED"
            }
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Unavailable { .. } | Self::ConnectFailed(_) => "STORE_UNAVAILABLE",
            Self::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            Self::ClusterNotFound { .. } => "CLUSTER_NOT_FOUND",
            Self::SelfMergeRejected { .. } => "SELF_MERGE_REJECTED",
            Self::TransactionAborted(_) => "TRANSACTION_ABORTED",
            Self::SnapshotNotFound { .. } => "SNAPSHOT_NOT_FOUND",
        }
    }

    /// Whether repeating the same call later can succeed without any state change by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::ConnectFailed(_) => true,
            Self::Sql(err) | Self::TransactionAborted(err) => is_busy(err),
            _ => false,
        }
    }

    /// Rewrites a raw SQL failure raised inside a merge or undo transaction.
    pub(crate) fn into_aborted(self) -> Self {
        match self {
            Self::Sql(err) => Self::TransactionAborted(err),
            other => other,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}
