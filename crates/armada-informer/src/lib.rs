//! Federated informer for Armada
//!
//! Keeps one watched collection per ready member cluster of the federation
//! and exposes a single read-only view across all of them:
//!
//! - the cluster registry watch drives everything: clusters that become
//!   ready get a member watch, clusters that go away lose theirs
//! - [`FederatedStore`] fans reads out over the member mirrors
//! - [`FederatedInformer::client_for_cluster`] hands out cached per-member clients
//! - [`get_cluster_object`] reads from a mirror when it is synced and from
//!   the member API server when it is not
//!
//! Reads are eventually consistent. Member watches start and stop
//! concurrently with readers, and callers must tolerate answers that are
//! already stale.

#![deny(missing_docs)]

use std::time::Duration;

pub mod client;
pub mod config;
pub mod federated_store;
pub mod fetch;
pub mod informer;
pub mod key;
pub mod lifecycle;
pub mod registry;
pub mod store;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientFactory, ClusterClient, KubeClientFactory, KubeClusterClient};
pub use config::{ClusterConfigFactory, InformerConfig, SecretConfigFactory};
pub use federated_store::{FederatedObject, FederatedStore};
pub use fetch::get_cluster_object;
pub use informer::{FederatedInformer, FederatedInformerParts};
pub use key::{key_for, DeletedFinalStateUnknown, QualifiedName};
pub use lifecycle::{classify_update, ClusterLifecycleHandlers, ClusterTransition};
pub use registry::{ClusterEvent, ClusterEventHandler, ClusterWatch, KubeClusterWatch};
pub use store::{MemoryStore, ObjectStore, ReflectorStore};
pub use watch::{
    managed_resource_factory, ReflectorWatch, TargetInformerFactory, TriggerFn, WatchController,
    WatchedCollection,
};

/// How often the cluster registry redelivers every known cluster
pub const CLUSTER_SYNC_PERIOD: Duration = Duration::from_secs(10 * 60);
