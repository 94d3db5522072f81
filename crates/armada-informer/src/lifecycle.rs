//! Cluster availability hooks and update classification

use std::fmt;
use std::sync::Arc;

use armada_common::crd::FederatedCluster;

/// Hook fired when a cluster becomes available
pub type AvailableFn = Arc<dyn Fn(&FederatedCluster) + Send + Sync>;

/// Hook fired when a cluster becomes unavailable, with its last mirrored objects
pub type UnavailableFn<K> = Arc<dyn Fn(&FederatedCluster, Vec<Arc<K>>) + Send + Sync>;

/// Optional availability hooks
///
/// An absent `on_unavailable` hook also skips the snapshot listing that
/// would have been handed to it.
pub struct ClusterLifecycleHandlers<K> {
    /// Fired after a ready cluster is added or recreated
    pub on_available: Option<AvailableFn>,
    /// Fired when a cluster is deleted, marked for deletion, loses readiness or changes
    pub on_unavailable: Option<UnavailableFn<K>>,
}

impl<K> Default for ClusterLifecycleHandlers<K> {
    fn default() -> Self {
        Self {
            on_available: None,
            on_unavailable: None,
        }
    }
}

impl<K> Clone for ClusterLifecycleHandlers<K> {
    fn clone(&self) -> Self {
        Self {
            on_available: self.on_available.clone(),
            on_unavailable: self.on_unavailable.clone(),
        }
    }
}

impl<K> fmt::Debug for ClusterLifecycleHandlers<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterLifecycleHandlers")
            .field("on_available", &self.on_available.is_some())
            .field("on_unavailable", &self.on_unavailable.is_some())
            .finish()
    }
}

impl<K> ClusterLifecycleHandlers<K> {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the availability hook
    pub fn with_available(mut self, f: impl Fn(&FederatedCluster) + Send + Sync + 'static) -> Self {
        self.on_available = Some(Arc::new(f));
        self
    }

    /// Set the unavailability hook
    pub fn with_unavailable(
        mut self,
        f: impl Fn(&FederatedCluster, Vec<Arc<K>>) + Send + Sync + 'static,
    ) -> Self {
        self.on_unavailable = Some(Arc::new(f));
        self
    }
}

/// What a registry update means for a cluster's watch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterTransition {
    /// Deletion timestamp newly set: notify, but keep the watch
    MarkedForDeletion,
    /// Readiness flipped or connection-relevant fields changed: tear down, maybe rebuild
    Recreate,
    /// Nothing that affects the watch changed
    Unchanged,
}

/// Classify an update, checking the cases in priority order
///
/// Marking for deletion deliberately leaves the watch running. The delete
/// that follows still needs the mirrored objects, and a cluster that is only
/// marked has not gone anywhere yet.
pub fn classify_update(old: &FederatedCluster, new: &FederatedCluster) -> ClusterTransition {
    if !old.is_marked_for_deletion() && new.is_marked_for_deletion() {
        ClusterTransition::MarkedForDeletion
    } else if old.is_ready() != new.is_ready() || old.connection_changed(new) {
        ClusterTransition::Recreate
    } else {
        ClusterTransition::Unchanged
    }
}
