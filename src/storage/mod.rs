//! Storage module for the grid's persistent collections
//!
//! This module handles everything the grid keeps on disk:
//! - SQLite store initialization, tuning and crash recovery
//! - The collection catalog and its type registry
//! - Typed map, set and queue handles over the store
//! - Sharing one engine between grids on the same work directory

mod collection;
mod registry;
mod schema;
mod sqlite;
mod traits;

pub use collection::{GridMap, GridQueue, GridSet};
pub use registry::{EngineLease, EngineRegistry};
pub use schema::get_schema_version;
pub use sqlite::{SqliteEngine, STORE_DIR_NAME, STORE_FILE_NAME};
pub use traits::{CollectionInfo, CollectionKind, RawMerge, StorageEngine};

use crate::GridResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Name of the reserved map of host-wide string settings
pub const GLOBALS_COLLECTION: &str = "grid_globals";

/// Prefix reserved for the grid's own collections
pub const RESERVED_PREFIX: &str = "grid_";

/// Entry point to the grid's named collections
#[derive(Clone)]
pub struct GridStorage {
    engine: Arc<dyn StorageEngine>,
}

impl GridStorage {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Opens (or creates) a map holding values of type `V`
    ///
    /// # Returns
    ///
    /// * `Ok(GridMap<V>)` - Handle on the collection
    /// * `Err(GridError::TypeMismatch)` - The name is bound to another value type
    /// * `Err(GridError::KindMismatch)` - The name is bound to a set or queue
    pub fn get_map<V>(&self, name: &str) -> GridResult<GridMap<V>>
    where
        V: Serialize + DeserializeOwned,
    {
        GridMap::open(self.engine.clone(), name)
    }

    pub fn get_set(&self, name: &str) -> GridResult<GridSet> {
        GridSet::open(self.engine.clone(), name)
    }

    pub fn get_queue<V>(&self, name: &str) -> GridResult<GridQueue<V>>
    where
        V: Serialize + DeserializeOwned,
    {
        GridQueue::open(self.engine.clone(), name)
    }

    /// Host-wide string settings shared by every node
    pub fn globals(&self) -> GridResult<GridMap<String>> {
        self.get_map(GLOBALS_COLLECTION)
    }

    pub fn collection_names(&self) -> GridResult<Vec<String>> {
        self.engine.list_collection_names()
    }

    pub fn collection_info(&self, name: &str) -> GridResult<Option<CollectionInfo>> {
        self.engine.collection_info(name)
    }

    pub fn has_collection(&self, name: &str) -> GridResult<bool> {
        self.engine.has_collection(name)
    }

    pub fn drop_collection(&self, name: &str) -> GridResult<bool> {
        self.engine.drop_collection(name)
    }

    /// Drops every collection and deletes the on-disk store
    ///
    /// Returns true if there was at least one collection.
    pub fn clean(&self) -> GridResult<bool> {
        self.engine.clean()
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }
}

/// True for collections created by the grid itself rather than by a session
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}
