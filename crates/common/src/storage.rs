//! Durable Ordered Storage Contract
//!
//! The engine only requires a durable ordered map with
//! init/get/delete/has/keys/entries/values semantics; persistence
//! infrastructure itself is an external collaborator. [`MemoryMap`] is
//! the in-process implementation backing tests and single-node use.
//!
//! Iteration is always in ascending key order, and the iterators are
//! restartable: each call walks the map from the start.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::errors::{EngineError, EngineResult};

/// A durable ordered map: keys unique, iteration in ascending key order.
pub trait DurableMap<K: Ord + Debug, V> {
    /// Insert a fresh entry; fails if the key already exists.
    fn init(&mut self, key: K, value: V) -> EngineResult<()>;

    /// Look up an entry; fails if the key is absent.
    fn get(&self, key: &K) -> EngineResult<&V>;

    /// Remove and return an entry; fails if the key is absent.
    fn delete(&mut self, key: &K) -> EngineResult<V>;

    fn has(&self, key: &K) -> bool;

    /// Keys in ascending order
    fn keys(&self) -> Box<dyn Iterator<Item = &K> + '_>;

    /// Values in ascending key order
    fn values(&self) -> Box<dyn Iterator<Item = &V> + '_>;

    /// Entries in ascending key order
    fn entries(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`DurableMap`] over a `BTreeMap`
#[derive(Debug, Default)]
pub struct MemoryMap<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K: Ord + Debug, V> MemoryMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Debug, V> DurableMap<K, V> for MemoryMap<K, V> {
    fn init(&mut self, key: K, value: V) -> EngineResult<()> {
        if self.inner.contains_key(&key) {
            return Err(EngineError::DuplicateKey {
                key: format!("{key:?}"),
            });
        }
        self.inner.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &K) -> EngineResult<&V> {
        self.inner.get(key).ok_or_else(|| EngineError::KeyNotFound {
            key: format!("{key:?}"),
        })
    }

    fn delete(&mut self, key: &K) -> EngineResult<V> {
        self.inner
            .remove(key)
            .ok_or_else(|| EngineError::KeyNotFound {
                key: format!("{key:?}"),
            })
    }

    fn has(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    fn keys(&self) -> Box<dyn Iterator<Item = &K> + '_> {
        Box::new(self.inner.keys())
    }

    fn values(&self) -> Box<dyn Iterator<Item = &V> + '_> {
        Box::new(self.inner.values())
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(self.inner.iter())
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
