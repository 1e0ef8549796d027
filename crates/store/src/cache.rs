use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fuxi_core::Keyed;
use rustc_hash::FxHashMap;

/// Last delivered snapshot of every live object, by key.
///
/// Only the dispatcher writes here (through [`crate::DeltaFifo::pop_and_apply`]);
/// everyone else reads.
pub struct Cache<K> {
    items: RwLock<FxHashMap<String, K>>,
}

impl<K> Default for Cache<K> {
    fn default() -> Self { Self { items: RwLock::new(FxHashMap::default()) } }
}

impl<K: Keyed + Clone> Cache<K> {
    pub fn new() -> Self { Self::default() }

    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<String, K>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<String, K>> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize { self.read().len() }
    pub fn is_empty(&self) -> bool { self.read().is_empty() }

    pub fn get_by_key(&self, key: &str) -> Option<K> { self.read().get(key).cloned() }

    pub fn contains_key(&self, key: &str) -> bool { self.read().contains_key(key) }

    pub fn list_keys(&self) -> Vec<String> { self.read().keys().cloned().collect() }

    /// Key/object pairs as of one consistent read.
    pub fn snapshot(&self) -> Vec<(String, K)> {
        self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn add(&self, obj: K) { self.upsert(obj); }

    /// Insert or replace, returning the previous snapshot for the key.
    pub fn upsert(&self, obj: K) -> Option<K> { self.write().insert(obj.key(), obj) }

    pub fn delete_by_key(&self, key: &str) -> Option<K> { self.write().remove(key) }

    pub fn replace(&self, objs: Vec<K>) {
        let next: FxHashMap<String, K> = objs.into_iter().map(|o| (o.key(), o)).collect();
        *self.write() = next;
    }
}
