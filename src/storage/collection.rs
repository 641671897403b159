//! Typed collection handles
//!
//! Handles are cheap to clone and hold no data themselves; every call goes
//! through the shared storage engine. Values are stored as JSON.

use crate::storage::traits::{CollectionKind, StorageEngine};
use crate::{GridError, GridResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

fn decode<V: DeserializeOwned>(raw: &str) -> GridResult<V> {
    Ok(serde_json::from_str(raw)?)
}

fn decode_opt<V: DeserializeOwned>(raw: Option<String>) -> GridResult<Option<V>> {
    raw.map(|r| decode(&r)).transpose()
}

/// A persistent map from string keys to values of type `V`
pub struct GridMap<V> {
    engine: Arc<dyn StorageEngine>,
    name: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for GridMap<V> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V> std::fmt::Debug for GridMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridMap").field("name", &self.name).finish()
    }
}

impl<V> GridMap<V>
where
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn open(engine: Arc<dyn StorageEngine>, name: &str) -> GridResult<Self> {
        engine.open_collection(name, CollectionKind::Map, std::any::type_name::<V>())?;
        Ok(Self {
            engine,
            name: name.to_string(),
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> GridResult<Option<V>> {
        decode_opt(self.engine.get(&self.name, key)?)
    }

    pub fn put(&self, key: &str, value: &V) -> GridResult<()> {
        let raw = serde_json::to_string(value)?;
        self.engine.put(&self.name, key, &raw)
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&self, key: &str) -> GridResult<bool> {
        self.engine.remove(&self.name, key)
    }

    pub fn contains(&self, key: &str) -> GridResult<bool> {
        self.engine.contains(&self.name, key)
    }

    pub fn size(&self) -> GridResult<u64> {
        self.engine.count(&self.name)
    }

    pub fn is_empty(&self) -> GridResult<bool> {
        Ok(self.size()? == 0)
    }

    pub fn clear(&self) -> GridResult<()> {
        self.engine.clear(&self.name)
    }

    /// Atomically replaces the value of `key` with `f(current)`
    ///
    /// This is the only mutation that is race-free under concurrent callers
    /// on the same key. `f` runs while the store is locked and must not use
    /// the grid. Returns the new value.
    pub fn update<F>(&self, key: &str, f: F) -> GridResult<V>
    where
        F: FnOnce(Option<V>) -> V,
    {
        let mut pending = Some(f);
        let mut written = None;

        self.engine.update(
            &self.name,
            key,
            Box::new(|raw: Option<String>| -> GridResult<Option<String>> {
                let current = decode_opt(raw)?;
                let Some(f) = pending.take() else {
                    return Ok(None);
                };
                let value = f(current);
                let encoded = serde_json::to_string(&value)?;
                written = Some(value);
                Ok(Some(encoded))
            }),
        )?;

        if let Some(value) = written {
            return Ok(value);
        }
        // Collection was dropped underneath this handle: nothing was stored
        pending
            .take()
            .map(|f| f(None))
            .ok_or_else(|| GridError::UnknownCollection(self.name.clone()))
    }

    /// Atomically replaces the value of `key` with `f(current)`, removing the
    /// entry when `f` returns `None`
    pub fn compute<F>(&self, key: &str, f: F) -> GridResult<Option<V>>
    where
        F: FnOnce(Option<V>) -> Option<V>,
    {
        let mut pending = Some(f);
        let mut written = None;

        self.engine.update(
            &self.name,
            key,
            Box::new(|raw: Option<String>| -> GridResult<Option<String>> {
                let current = decode_opt(raw)?;
                let Some(f) = pending.take() else {
                    return Ok(None);
                };
                let value = f(current);
                let encoded = value.as_ref().map(serde_json::to_string).transpose()?;
                written = Some(value);
                Ok(encoded)
            }),
        )?;

        match (written, pending) {
            (Some(value), _) => Ok(value),
            (None, Some(f)) => Ok(f(None)),
            (None, None) => Ok(None),
        }
    }

    pub fn keys(&self) -> GridResult<Vec<String>> {
        Ok(self
            .engine
            .entries(&self.name)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Returns every entry in insertion order
    pub fn entries(&self) -> GridResult<Vec<(String, V)>> {
        self.engine
            .entries(&self.name)?
            .into_iter()
            .map(|(key, raw)| Ok((key, decode(&raw)?)))
            .collect()
    }

    /// Visits entries in insertion order until `f` returns false
    ///
    /// The entries are read up front, so `f` may use the grid freely.
    pub fn for_each<F>(&self, mut f: F) -> GridResult<()>
    where
        F: FnMut(&str, V) -> bool,
    {
        for (key, value) in self.entries()? {
            if !f(&key, value) {
                break;
            }
        }
        Ok(())
    }

    /// Returns the oldest entry
    pub fn first(&self) -> GridResult<Option<(String, V)>> {
        self.engine
            .first(&self.name)?
            .map(|(key, raw)| Ok((key, decode(&raw)?)))
            .transpose()
    }

    /// Renames the underlying collection; this handle follows the new name
    ///
    /// Returns true if a collection named `new_name` existed and was replaced.
    pub fn rename(&mut self, new_name: &str) -> GridResult<bool> {
        let existed = self.engine.rename_collection(&self.name, new_name)?;
        self.name = new_name.to_string();
        Ok(existed)
    }
}

/// A persistent set of strings
#[derive(Clone)]
pub struct GridSet {
    engine: Arc<dyn StorageEngine>,
    name: String,
}

impl std::fmt::Debug for GridSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridSet").field("name", &self.name).finish()
    }
}

impl GridSet {
    pub(crate) fn open(engine: Arc<dyn StorageEngine>, name: &str) -> GridResult<Self> {
        engine.open_collection(name, CollectionKind::Set, std::any::type_name::<String>())?;
        Ok(Self {
            engine,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a member. Returns true if it was not already present.
    pub fn add(&self, member: &str) -> GridResult<bool> {
        self.engine.put_if_absent(&self.name, member, "")
    }

    /// Removes a member. Returns true if it was present.
    pub fn remove(&self, member: &str) -> GridResult<bool> {
        self.engine.remove(&self.name, member)
    }

    pub fn contains(&self, member: &str) -> GridResult<bool> {
        self.engine.contains(&self.name, member)
    }

    pub fn size(&self) -> GridResult<u64> {
        self.engine.count(&self.name)
    }

    pub fn is_empty(&self) -> GridResult<bool> {
        Ok(self.size()? == 0)
    }

    pub fn clear(&self) -> GridResult<()> {
        self.engine.clear(&self.name)
    }

    /// Visits members in insertion order until `f` returns false
    pub fn for_each<F>(&self, mut f: F) -> GridResult<()>
    where
        F: FnMut(&str) -> bool,
    {
        for (member, _) in self.engine.entries(&self.name)? {
            if !f(&member) {
                break;
            }
        }
        Ok(())
    }

    pub fn rename(&mut self, new_name: &str) -> GridResult<bool> {
        let existed = self.engine.rename_collection(&self.name, new_name)?;
        self.name = new_name.to_string();
        Ok(existed)
    }
}

/// A persistent FIFO queue of values of type `V`
pub struct GridQueue<V> {
    engine: Arc<dyn StorageEngine>,
    name: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for GridQueue<V> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V> GridQueue<V>
where
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn open(engine: Arc<dyn StorageEngine>, name: &str) -> GridResult<Self> {
        engine.open_collection(name, CollectionKind::Queue, std::any::type_name::<V>())?;
        Ok(Self {
            engine,
            name: name.to_string(),
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&self, value: &V) -> GridResult<()> {
        let raw = serde_json::to_string(value)?;
        self.engine
            .put(&self.name, &Uuid::new_v4().to_string(), &raw)
    }

    /// Removes and returns the oldest value
    pub fn poll(&self) -> GridResult<Option<V>> {
        self.engine
            .pop_first(&self.name)?
            .map(|(_, raw)| decode(&raw))
            .transpose()
    }

    /// Returns the oldest value without removing it
    pub fn peek(&self) -> GridResult<Option<V>> {
        self.engine
            .first(&self.name)?
            .map(|(_, raw)| decode(&raw))
            .transpose()
    }

    pub fn size(&self) -> GridResult<u64> {
        self.engine.count(&self.name)
    }

    pub fn is_empty(&self) -> GridResult<bool> {
        Ok(self.size()? == 0)
    }

    pub fn clear(&self) -> GridResult<()> {
        self.engine.clear(&self.name)
    }
}
