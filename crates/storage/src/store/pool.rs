#![forbid(unsafe_code)]

use super::{SqliteStore, StoreConfig, StoreError};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out one exclusive connection per caller. Connections are opened on demand and closed
/// when the returned guard is dropped; nothing is cached or shared.
#[derive(Clone, Debug)]
pub struct StorePool {
    storage_dir: PathBuf,
    config: StoreConfig,
    in_use: Arc<AtomicUsize>,
}

impl StorePool {
    /// Installs the schema once and returns a pool over the same directory.
    pub fn open(storage_dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        if config.max_connections == 0 {
            return Err(StoreError::InvalidInput(
                "max_connections must be at least 1",
            ));
        }
        let storage_dir = storage_dir.as_ref().to_path_buf();
        drop(SqliteStore::open_with(&storage_dir, &config)?);
        Ok(Self {
            storage_dir,
            config,
            in_use: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Fails fast with [`StoreError::Unavailable`] when every slot is taken. A connection that
    /// cannot be opened is reported as [`StoreError::ConnectFailed`]; both carry the
    /// `STORE_UNAVAILABLE` code.
    pub fn acquire(&self) -> Result<PooledStore, StoreError> {
        let limit = self.config.max_connections;
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return Err(StoreError::Unavailable {
                    in_use: current,
                    limit,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let slot = Slot {
            in_use: self.in_use.clone(),
        };
        let store = SqliteStore::connect(&self.storage_dir, &self.config).map_err(|err| {
            tracing::warn!(error = %err, "store connection failed");
            StoreError::ConnectFailed(Box::new(err))
        })?;
        tracing::trace!(in_use = self.in_use(), limit, "store connection acquired");
        Ok(PooledStore { store, _slot: slot })
    }
}

/// Releases its pool slot on drop, whether or not opening the connection succeeded.
#[derive(Debug)]
struct Slot {
    in_use: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct PooledStore {
    store: SqliteStore,
    _slot: Slot,
}

impl Deref for PooledStore {
    type Target = SqliteStore;

    fn deref(&self) -> &SqliteStore {
        &self.store
    }
}

impl DerefMut for PooledStore {
    fn deref_mut(&mut self) -> &mut SqliteStore {
        &mut self.store
    }
}
