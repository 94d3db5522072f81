//! Read-only overlay across member watches
//!
//! Each call takes a point-in-time copy of the active member set and then
//! reads the member mirrors without holding the informer lock. Members come
//! and go concurrently, so every answer may be stale by the time the caller
//! sees it: a cluster reported synced can lose its watch immediately after.

use std::collections::BTreeSet;
use std::sync::Arc;

use armada_common::{Error, Result};

use crate::informer::Shared;
use crate::key::{key_for as store_key_for, StoreKey};

/// An object together with the member it was mirrored from
#[derive(Debug)]
pub struct FederatedObject<K> {
    /// Member cluster name
    pub cluster_name: String,
    /// The mirrored object
    pub object: Arc<K>,
}

impl<K> Clone for FederatedObject<K> {
    fn clone(&self) -> Self {
        Self {
            cluster_name: self.cluster_name.clone(),
            object: Arc::clone(&self.object),
        }
    }
}

/// Fan-out reads over every active member watch
pub struct FederatedStore<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for FederatedStore<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> FederatedStore<K> {
    pub(crate) fn new(shared: Arc<Shared<K>>) -> Self {
        Self { shared }
    }

    /// Every mirrored object from every member
    ///
    /// Member order is unspecified; objects keep their mirror order within a member.
    pub fn list(&self) -> Vec<FederatedObject<K>> {
        self.shared
            .collections()
            .into_iter()
            .flat_map(|(cluster_name, collection)| {
                collection
                    .store
                    .list()
                    .into_iter()
                    .map(move |object| FederatedObject {
                        cluster_name: cluster_name.clone(),
                        object,
                    })
            })
            .collect()
    }

    /// Mirrored objects of one member; empty if it has no active watch
    pub fn list_from_cluster(&self, cluster: &str) -> Vec<Arc<K>> {
        self.shared
            .collection(cluster)
            .map(|c| c.store.list())
            .unwrap_or_default()
    }

    /// Object under `key` in one member's mirror
    ///
    /// Errors if the member has no active watch.
    pub fn get_by_key(&self, cluster: &str, key: &str) -> Result<Option<Arc<K>>> {
        let collection = self
            .shared
            .collection(cluster)
            .ok_or_else(|| Error::cluster_not_found(cluster))?;
        collection.store.get_by_key(key)
    }

    /// Object under `key` from every member whose mirror holds it
    ///
    /// Fails on the first member lookup error.
    pub fn get_from_all_clusters(&self, key: &str) -> Result<Vec<FederatedObject<K>>> {
        let mut found = Vec::new();
        for (cluster_name, collection) in self.shared.collections() {
            if let Some(object) = collection.store.get_by_key(key)? {
                found.push(FederatedObject {
                    cluster_name,
                    object,
                });
            }
        }
        Ok(found)
    }

    /// True only if the active members are exactly `clusters` and all have synced
    pub fn clusters_synced<S: AsRef<str>>(&self, clusters: &[S]) -> bool {
        let collections = self.shared.collections();
        let expected: BTreeSet<&str> = clusters.iter().map(AsRef::as_ref).collect();
        if collections.len() != clusters.len() || expected.len() != clusters.len() {
            return false;
        }
        collections.iter().all(|(name, collection)| {
            expected.contains(name.as_str()) && collection.controller.has_synced()
        })
    }

    /// Object under `key` in one member's mirror, or `None` if that member has
    /// no watch or its watch has not synced
    ///
    /// Sync state and lookup come from the same watch, so a watch removed
    /// between the two cannot turn into an error.
    pub(crate) fn get_if_synced(
        &self,
        cluster: &str,
        key: &str,
    ) -> Result<Option<Option<Arc<K>>>> {
        match self.shared.collection(cluster) {
            Some(collection) if collection.controller.has_synced() => {
                collection.store.get_by_key(key).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Whether one member's watch has synced; false if it has none
    pub fn cluster_synced(&self, cluster: &str) -> bool {
        self.shared
            .collection(cluster)
            .map(|c| c.controller.has_synced())
            .unwrap_or(false)
    }

    /// Key under which `item` is stored in member mirrors
    pub fn key_for<T: StoreKey + ?Sized>(&self, item: &T) -> String {
        store_key_for(item)
    }
}
