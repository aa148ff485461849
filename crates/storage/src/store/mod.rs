#![forbid(unsafe_code)]

mod associations;
mod clusters;
mod error;
mod filter;
mod members;
mod merge;
mod parents;
mod pool;
mod requests;
mod schema;
mod types;

pub use error::StoreError;
pub use merge::{AssociationMove, MemberKeySnapshot, MergeSnapshotPayload};
pub use pool::{PooledStore, StorePool};
pub use requests::*;
pub use types::*;

use cv_core::ids::{ClusterKey, ProjectId};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_FILE_NAME: &str = "clusterview.db";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on simultaneously open pooled connections.
    pub max_connections: usize,
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// One SQLite connection. Never shared between concurrent callers; hand each worker its own
/// through [`StorePool`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(storage_dir, &StoreConfig::default())
    }

    pub fn open_with(
        storage_dir: impl AsRef<Path>,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let store = Self::connect(&storage_dir, config)?;
        schema::preflight_gate(&store.conn)?;
        schema::install_schema(&store.conn)?;
        Ok(store)
    }

    /// Opens a connection to an already-installed database.
    pub(crate) fn connect(storage_dir: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(storage_dir.join(DB_FILE_NAME))?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        Ok(Self {
            conn,
            storage_dir: storage_dir.to_path_buf(),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn project_init(&mut self, project: &ProjectId) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        ensure_project_tx(&tx, project, now_ms())?;
        tx.commit()?;
        Ok(())
    }

    pub fn project_exists(&self, project: &ProjectId) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM projects WHERE project=?1",
                params![project.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }
}

fn ensure_project_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    now_ms: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO projects(project, created_at_ms) VALUES (?1, ?2)",
        params![project.as_str(), now_ms],
    )?;
    Ok(())
}

fn cluster_exists_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &str,
) -> Result<bool, StoreError> {
    Ok(tx
        .query_row(
            "SELECT 1 FROM clusters WHERE project=?1 AND cluster_key=?2",
            params![project.as_str(), key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn ensure_cluster_exists_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &ClusterKey,
) -> Result<(), StoreError> {
    if cluster_exists_tx(tx, project, key.as_str())? {
        Ok(())
    } else {
        Err(StoreError::ClusterNotFound {
            key: key.as_str().to_string(),
        })
    }
}

/// Recomputes and persists the cached distinct-parent count of one cluster.
fn refresh_cluster_count_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &str,
    now_ms: i64,
) -> Result<i64, StoreError> {
    let count = tx.query_row(
        "SELECT COUNT(DISTINCT pa.parent_id) \
         FROM parent_associations pa \
         JOIN parents p ON p.project = pa.project AND p.parent_id = pa.parent_id \
         WHERE pa.project=?1 AND pa.cluster_key=?2",
        params![project.as_str(), key],
        |row| row.get::<_, i64>(0),
    )?;
    tx.execute(
        "UPDATE clusters SET count=?3, updated_at_ms=?4 WHERE project=?1 AND cluster_key=?2",
        params![project.as_str(), key, count, now_ms],
    )?;
    Ok(count)
}

fn map_constraint(err: rusqlite::Error) -> StoreError {
    if is_constraint_violation(&err) {
        let message = match &err {
            rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
            other => other.to_string(),
        };
        return StoreError::ConstraintViolation(message);
    }
    StoreError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

/// Primary-key or unique collisions only; foreign-key failures are not duplicates.
fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
