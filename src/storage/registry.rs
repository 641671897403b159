//! Process-wide registry of open storage engines
//!
//! Several grid handles in one process that point at the same work directory
//! share a single engine, the same way several nodes of a cluster share one
//! store. The engine is closed when its last lease is released.

use crate::config::StorageConfig;
use crate::storage::sqlite::SqliteEngine;
use crate::storage::traits::StorageEngine;
use crate::{GridError, GridResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// A shared handle on a registered engine
#[derive(Clone)]
pub struct EngineLease {
    key: PathBuf,
    engine: Arc<SqliteEngine>,
}

impl EngineLease {
    pub fn engine(&self) -> Arc<SqliteEngine> {
        self.engine.clone()
    }

    /// Directory this lease is keyed on
    pub fn key(&self) -> &Path {
        &self.key
    }
}

/// Registry of engines keyed by canonical work directory
#[derive(Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<PathBuf, (Arc<SqliteEngine>, usize)>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every grid in this process
    pub fn global() -> Arc<EngineRegistry> {
        static GLOBAL: OnceLock<Arc<EngineRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(EngineRegistry::new())).clone()
    }

    /// Returns the engine for `work_dir`, opening it on first use
    ///
    /// Ephemeral configurations are keyed the same way, so grids in one
    /// process can still share an in-memory store.
    pub fn acquire(&self, work_dir: &Path, config: &StorageConfig) -> GridResult<EngineLease> {
        let key = registry_key(work_dir, config)?;

        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((engine, leases)) = engines.get_mut(&key) {
            if !engine.is_closed() {
                *leases += 1;
                tracing::debug!("Sharing storage engine for {} ({} leases)", key.display(), leases);
                return Ok(EngineLease {
                    key,
                    engine: engine.clone(),
                });
            }
        }

        let engine = Arc::new(SqliteEngine::open(work_dir, config)?);
        engines.insert(key.clone(), (engine.clone(), 1));
        Ok(EngineLease { key, engine })
    }

    /// Releases a lease, closing the engine when no lease remains
    pub fn release(&self, lease: EngineLease) -> GridResult<()> {
        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((engine, leases)) = engines.get_mut(&lease.key) else {
            return Ok(());
        };
        if !Arc::ptr_eq(engine, &lease.engine) {
            // The registered engine was replaced after this lease's engine closed
            return lease.engine.close();
        }

        *leases -= 1;
        if *leases > 0 {
            return Ok(());
        }

        engines.remove(&lease.key);
        drop(engines);
        lease.engine.close()
    }

    /// Number of engines currently open through this registry
    pub fn open_engines(&self) -> usize {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn registry_key(work_dir: &Path, config: &StorageConfig) -> GridResult<PathBuf> {
    if config.ephemeral {
        if work_dir.is_absolute() {
            return Ok(work_dir.to_path_buf());
        }
        return Ok(std::env::current_dir()?.join(work_dir));
    }
    std::fs::create_dir_all(work_dir).map_err(|source| GridError::StorageIo {
        path: work_dir.to_path_buf(),
        source,
    })?;
    work_dir.canonicalize().map_err(|source| GridError::StorageIo {
        path: work_dir.to_path_buf(),
        source,
    })
}
