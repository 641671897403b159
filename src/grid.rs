//! Grid composition root
//!
//! A `Grid` is one node's view of the grid: the shared storage engine for its
//! work directory, plus a compute and a pipeline executor bound to its node
//! name. Several grids on the same work directory in one process share one
//! engine and behave like the nodes of a cluster.

use crate::compute::ComputeExecutor;
use crate::config::{validate_grid_config, validate_storage_config, Config, GridConfig, StorageConfig};
use crate::pipeline::PipelineExecutor;
use crate::storage::{EngineLease, EngineRegistry, GridStorage, StorageEngine};
use crate::GridResult;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// One node of a grid
pub struct Grid {
    node_name: String,
    registry: Arc<EngineRegistry>,
    lease: Mutex<Option<EngineLease>>,
    storage: GridStorage,
    compute: ComputeExecutor,
    pipeline: PipelineExecutor,
}

impl Grid {
    /// Connects to the grid stored under `work_dir` with default node settings
    pub fn connect(work_dir: impl AsRef<Path>, storage: &StorageConfig) -> GridResult<Self> {
        let grid = GridConfig::new(work_dir.as_ref().to_string_lossy());
        Self::connect_with(&grid, storage, EngineRegistry::global())
    }

    /// Connects using a loaded configuration file
    pub fn from_config(config: &Config) -> GridResult<Self> {
        Self::connect_with(&config.grid, &config.storage, EngineRegistry::global())
    }

    /// Connects through a specific engine registry
    ///
    /// # Arguments
    ///
    /// * `grid` - Work directory, node name and polling settings
    /// * `storage` - Storage engine options, used when the engine is first opened
    /// * `registry` - Registry sharing engines between grids on the same directory
    ///
    /// # Returns
    ///
    /// * `Ok(Grid)` - Connected node
    /// * `Err(GridError)` - Invalid options, or the store could not be opened
    pub fn connect_with(
        grid: &GridConfig,
        storage: &StorageConfig,
        registry: Arc<EngineRegistry>,
    ) -> GridResult<Self> {
        validate_grid_config(grid)?;
        validate_storage_config(storage)?;

        let node_name = grid.resolved_node_name();
        let lease = registry.acquire(Path::new(&grid.work_dir), storage)?;
        let engine: Arc<dyn StorageEngine> = lease.engine();

        let storage = GridStorage::new(engine);
        let compute = ComputeExecutor::new(&storage, node_name.clone(), grid.poll_interval())?;
        let pipeline = PipelineExecutor::new(&storage, compute.clone())?;

        tracing::info!(
            "Grid node '{}' connected to {}",
            node_name,
            lease.key().display()
        );

        Ok(Self {
            node_name,
            registry,
            lease: Mutex::new(Some(lease)),
            storage,
            compute,
            pipeline,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn storage(&self) -> &GridStorage {
        &self.storage
    }

    pub fn compute(&self) -> &ComputeExecutor {
        &self.compute
    }

    pub fn pipeline(&self) -> &PipelineExecutor {
        &self.pipeline
    }

    /// Drops every collection and deletes the store, then recreates the grid's
    /// own bookkeeping collections
    ///
    /// Other users of the same engine must be quiesced first. Returns true if
    /// there was at least one collection.
    pub fn clean(&self) -> GridResult<bool> {
        let had_collections = self.storage.clean()?;
        self.compute.reopen()?;
        self.pipeline.reopen()?;
        Ok(had_collections)
    }

    pub fn is_closed(&self) -> bool {
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Disconnects this node. The engine closes when its last node disconnects.
    ///
    /// Idempotent.
    pub fn close(&self) -> GridResult<()> {
        let lease = self
            .lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(lease) = lease else {
            return Ok(());
        };

        tracing::info!("Grid node '{}' disconnecting", self.node_name);
        self.registry.release(lease)
    }
}

impl Drop for Grid {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Grid node '{}' did not close cleanly: {}", self.node_name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunPolicy;
    use crate::GridError;
    use tempfile::TempDir;

    fn node(dir: &TempDir, name: &str, registry: &Arc<EngineRegistry>) -> Grid {
        let mut config = GridConfig::new(dir.path().to_string_lossy());
        config.node_name = Some(name.to_string());
        config.poll_interval_ms = 5;
        Grid::connect_with(&config, &StorageConfig::default(), registry.clone()).unwrap()
    }

    #[test]
    fn test_nodes_share_storage() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(EngineRegistry::new());
        let a = node(&dir, "a", &registry);
        let b = node(&dir, "b", &registry);

        a.storage().get_map::<u32>("m").unwrap().put("k", &1).unwrap();
        assert_eq!(b.storage().get_map::<u32>("m").unwrap().get("k").unwrap(), Some(1));
        assert_eq!(registry.open_engines(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(EngineRegistry::new());
        let a = node(&dir, "a", &registry);
        let b = node(&dir, "b", &registry);

        a.close().unwrap();
        a.close().unwrap();
        assert!(a.is_closed());
        assert!(b.storage().collection_names().is_ok());

        b.close().unwrap();
        assert!(matches!(b.storage().collection_names(), Err(GridError::Closed)));
        assert_eq!(registry.open_engines(), 0);
    }

    #[test]
    fn test_clean_keeps_grid_usable() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(EngineRegistry::new());
        let grid = node(&dir, "a", &registry);

        grid.compute().run_on_one_once("setup", |_| Ok(())).unwrap();
        grid.storage().get_set("seen").unwrap().add("x").unwrap();

        assert!(grid.clean().unwrap());
        assert!(grid
            .compute()
            .get_job_state("setup", RunPolicy::OneOnce)
            .unwrap()
            .is_none());

        grid.compute().run_on_one_once("setup", |_| Ok(())).unwrap();
        assert!(grid
            .compute()
            .get_job_state("setup", RunPolicy::OneOnce)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_rejects_invalid_options() {
        let dir = TempDir::new().unwrap();
        let storage = StorageConfig {
            compress: Some(9),
            ..Default::default()
        };
        assert!(matches!(
            Grid::connect(dir.path(), &storage),
            Err(GridError::Config(_))
        ));
    }
}
