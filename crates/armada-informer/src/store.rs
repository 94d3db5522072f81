//! Local mirrors of watched collections
//!
//! An [`ObjectStore`] is the read half of a watched collection: a local copy
//! of remote objects that is updated asynchronously by a background watch.
//! Readers must assume the copy lags the remote state.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;

use kube::runtime::reflector::{ObjectRef, Store};
use kube::Resource;
use parking_lot::RwLock;

use armada_common::Result;

use crate::key::{key_for, QualifiedName};

/// Read access to a locally mirrored collection
pub trait ObjectStore<K>: Send + Sync {
    /// All objects currently in the mirror
    fn list(&self) -> Vec<Arc<K>>;

    /// Object stored under `key`, if present
    ///
    /// Errors only when the key itself is malformed.
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>>;
}

/// [`ObjectStore`] over a kube-runtime reflector store
pub struct ReflectorStore<K>
where
    K: Resource + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
    dyntype: K::DynamicType,
}

impl<K> ReflectorStore<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    /// Wrap a reflector reader; `dyntype` is needed to build lookup refs
    pub fn new(store: Store<K>, dyntype: K::DynamicType) -> Self {
        Self { store, dyntype }
    }
}

impl<K> ObjectStore<K> for ReflectorStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>> {
        let qn: QualifiedName = key.parse()?;
        let mut obj_ref = ObjectRef::<K>::new_with(&qn.name, self.dyntype.clone());
        if let Some(ns) = &qn.namespace {
            obj_ref = obj_ref.within(ns);
        }
        Ok(self.store.get(&obj_ref))
    }
}

/// In-process mirror keyed by store key, listed in key order
///
/// Useful for collections fed by something other than a kube watcher.
pub struct MemoryStore<K> {
    objects: RwLock<BTreeMap<String, Arc<K>>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Resource> MemoryStore<K> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, returning the previous version
    pub fn apply(&self, obj: K) -> Option<Arc<K>> {
        let key = key_for(&obj);
        self.objects.write().insert(key, Arc::new(obj))
    }

    /// Remove the object under `key`, returning it
    pub fn delete(&self, key: &str) -> Option<Arc<K>> {
        self.objects.write().remove(key)
    }

    /// Replace the whole contents
    pub fn replace(&self, objs: impl IntoIterator<Item = K>) {
        let fresh = objs
            .into_iter()
            .map(|obj| (key_for(&obj), Arc::new(obj)))
            .collect();
        *self.objects.write() = fresh;
    }

    /// Number of objects in the store
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl<K: Resource + Send + Sync> ObjectStore<K> for MemoryStore<K> {
    fn list(&self) -> Vec<Arc<K>> {
        self.objects.read().values().cloned().collect()
    }

    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>> {
        key.parse::<QualifiedName>()?;
        Ok(self.objects.read().get(key).cloned())
    }
}
