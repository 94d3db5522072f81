//! Object identity and store keys
//!
//! Every mirror in this crate is keyed the same way: `namespace/name` for
//! namespaced objects and `name` for cluster-scoped ones. Delete notifications
//! may arrive as a tombstone rather than the object itself, so keying must not
//! require the final object state.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use kube::{Resource, ResourceExt};

use armada_common::Error;

/// Namespace + name identity of an object
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl QualifiedName {
    /// Identity of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Identity of a cluster-scoped object
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Identity of an existing object
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().filter(|ns| !ns.is_empty()),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for QualifiedName {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster_scoped(*name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::namespaced(*ns, *name)),
            [_] | [_, _] => Err(Error::invalid_key(key, "empty namespace or name")),
            _ => Err(Error::invalid_key(key, "expected name or namespace/name")),
        }
    }
}

/// Marker for an object whose deletion was observed without its final state
///
/// Produced when a relist shows an object vanished while the watch was down.
/// The key is recorded so the deletion can still be addressed.
#[derive(Clone, Debug)]
pub struct DeletedFinalStateUnknown<K> {
    /// Store key of the deleted object
    pub key: String,
    /// Last state this mirror had for the object
    pub obj: Option<Arc<K>>,
}

/// Anything a store key can be derived from
pub trait StoreKey {
    /// The key this item is (or was) stored under
    fn store_key(&self) -> String;
}

impl<K: Resource> StoreKey for K {
    fn store_key(&self) -> String {
        QualifiedName::of(self).to_string()
    }
}

impl<K> StoreKey for DeletedFinalStateUnknown<K> {
    fn store_key(&self) -> String {
        self.key.clone()
    }
}

/// Key under which `item` is put in a mirror store
pub fn key_for<T: StoreKey + ?Sized>(item: &T) -> String {
    item.store_key()
}
