//! Storage engine trait and catalog types
//!
//! This module defines the contract every grid storage backend upholds. The
//! typed collections in `collection.rs` are thin views over these raw string
//! operations, so a clustered backend only needs to implement this trait.

use crate::GridResult;
use std::fmt;

/// The kind of a named collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Map,
    Set,
    Queue,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Set => "set",
            Self::Queue => "queue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "map" => Some(Self::Map),
            "set" => Some(Self::Set),
            "queue" => Some(Self::Queue),
            _ => None,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog entry describing a user collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub kind: CollectionKind,
    pub value_type: String,
}

/// Merge function applied by [`StorageEngine::update`]
///
/// Receives the current raw value (if any) and returns the new raw value,
/// or `None` to remove the entry.
pub type RawMerge<'a> = dyn FnOnce(Option<String>) -> GridResult<Option<String>> + 'a;

/// Trait for grid storage backends
///
/// Structural operations (open, rename, drop, clean, close) are serialized by
/// the engine. Content operations on a collection that was dropped or cleaned
/// underneath an open handle never fail: reads behave as if the collection
/// were empty and writes are discarded.
pub trait StorageEngine: Send + Sync {
    // ===== Engine Lifecycle =====

    /// Random identifier of this engine instance, regenerated on every open
    fn session_id(&self) -> &str;

    /// Drops every collection, including the type registry, and deletes the
    /// on-disk store directory. The engine stays usable afterwards.
    ///
    /// Returns true if there was at least one user collection.
    fn clean(&self) -> GridResult<bool>;

    /// Flushes, compacts and closes the store. Idempotent.
    fn close(&self) -> GridResult<()>;

    fn is_closed(&self) -> bool;

    // ===== Collection Catalog =====

    /// Creates or opens a collection, recording its kind and value type
    ///
    /// Reopening an existing name with a different kind or value type is
    /// rejected.
    fn open_collection(&self, name: &str, kind: CollectionKind, value_type: &str)
        -> GridResult<()>;

    /// Renames a collection, preserving its content and registry entry
    ///
    /// A collection already named `new_name` is replaced. Returns true if one
    /// existed.
    fn rename_collection(&self, name: &str, new_name: &str) -> GridResult<bool>;

    /// Drops a collection. Returns true if it existed.
    fn drop_collection(&self, name: &str) -> GridResult<bool>;

    fn has_collection(&self, name: &str) -> GridResult<bool>;

    /// Gets the registry entry of a user collection
    fn collection_info(&self, name: &str) -> GridResult<Option<CollectionInfo>>;

    /// Lists all user collection names (the type registry is never listed)
    fn list_collection_names(&self) -> GridResult<Vec<String>>;

    // ===== Content =====

    fn get(&self, collection: &str, key: &str) -> GridResult<Option<String>>;

    fn put(&self, collection: &str, key: &str, value: &str) -> GridResult<()>;

    /// Inserts only if the key is absent. Returns true if inserted.
    fn put_if_absent(&self, collection: &str, key: &str, value: &str) -> GridResult<bool>;

    /// Removes a key. Returns true if it was present.
    fn remove(&self, collection: &str, key: &str) -> GridResult<bool>;

    fn contains(&self, collection: &str, key: &str) -> GridResult<bool>;

    fn count(&self, collection: &str) -> GridResult<u64>;

    fn clear(&self, collection: &str) -> GridResult<()>;

    /// Atomic read-modify-write of a single key
    ///
    /// No update is lost under concurrent callers on the same key. The merge
    /// function runs while the engine is locked and must not call back into
    /// the engine. It is not called at all if the collection no longer
    /// exists. Returns the value written (or `None` if removed).
    fn update(&self, collection: &str, key: &str, merge: Box<RawMerge<'_>>)
        -> GridResult<Option<String>>;

    /// Returns every entry in insertion order
    fn entries(&self, collection: &str) -> GridResult<Vec<(String, String)>>;

    /// Returns the oldest entry
    fn first(&self, collection: &str) -> GridResult<Option<(String, String)>>;

    /// Removes and returns the oldest entry
    fn pop_first(&self, collection: &str) -> GridResult<Option<(String, String)>>;
}
