//! The federated informer
//!
//! Owns one watched collection per ready member cluster and keeps that set in
//! step with the cluster registry. Registry events are dispatched one at a
//! time by the registry task; every other entry point only reads.
//!
//! All mutable state sits behind a single mutex whose critical sections are
//! map bookkeeping only. Config resolution, client construction and watch
//! startup all happen outside it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use armada_common::crd::FederatedCluster;
use armada_common::{Error, Result};

use crate::client::{ClientFactory, ClusterClient};
use crate::config::ClusterConfigFactory;
use crate::federated_store::FederatedStore;
use crate::lifecycle::{classify_update, ClusterLifecycleHandlers, ClusterTransition};
use crate::registry::{ClusterEvent, ClusterEventHandler, ClusterWatch};
use crate::watch::{TargetInformerFactory, WatchedCollection};

/// Collaborators a [`FederatedInformer`] is built from
pub struct FederatedInformerParts<K> {
    /// Watch over registered clusters
    pub registry: Arc<dyn ClusterWatch>,
    /// Resolves member connection configs
    pub config_factory: Arc<dyn ClusterConfigFactory>,
    /// Builds cached member clients
    pub client_factory: Arc<dyn ClientFactory>,
    /// Builds the per-member watched collection
    pub target_factory: TargetInformerFactory<K>,
    /// Optional availability hooks
    pub lifecycle: ClusterLifecycleHandlers<K>,
}

/// Live watch for one member
struct TargetInformer<K> {
    collection: WatchedCollection<K>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct BackgroundTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct State<K> {
    target_informers: HashMap<String, TargetInformer<K>>,
    cluster_clients: HashMap<String, Arc<dyn ClusterClient>>,
    /// Bumped on every client eviction so in-flight builds can tell they are stale
    evictions: HashMap<String, u64>,
    registry_task: Option<BackgroundTask>,
    started: bool,
    stopped: bool,
}

impl<K> Default for State<K> {
    fn default() -> Self {
        Self {
            target_informers: HashMap::new(),
            cluster_clients: HashMap::new(),
            evictions: HashMap::new(),
            registry_task: None,
            started: false,
            stopped: false,
        }
    }
}

impl<K> State<K> {
    fn eviction_generation(&self, name: &str) -> u64 {
        self.evictions.get(name).copied().unwrap_or_default()
    }

    fn evict_client(&mut self, name: &str) {
        self.cluster_clients.remove(name);
        *self.evictions.entry(name.to_string()).or_default() += 1;
    }
}

pub(crate) struct Shared<K> {
    state: Mutex<State<K>>,
    registry: Arc<dyn ClusterWatch>,
    config_factory: Arc<dyn ClusterConfigFactory>,
    client_factory: Arc<dyn ClientFactory>,
    target_factory: TargetInformerFactory<K>,
    lifecycle: ClusterLifecycleHandlers<K>,
}

/// Watches a resource type across every ready member cluster
///
/// Cheap to clone; clones share the same state.
pub struct FederatedInformer<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for FederatedInformer<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: Send + Sync + 'static> FederatedInformer<K> {
    /// Assemble an informer; nothing runs until [`start`](Self::start)
    pub fn new(parts: FederatedInformerParts<K>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                registry: parts.registry,
                config_factory: parts.config_factory,
                client_factory: parts.client_factory,
                target_factory: parts.target_factory,
                lifecycle: parts.lifecycle,
            }),
        }
    }

    /// Start the registry watch; member watches follow from its events
    ///
    /// Must be called within a tokio runtime. Starting twice, or after
    /// [`stop`](Self::stop), does nothing.
    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        if state.started || state.stopped {
            warn!(stopped = state.stopped, "Federated informer already started");
            return;
        }
        state.started = true;

        let cancel = CancellationToken::new();
        let registry = Arc::clone(&self.shared.registry);
        let handler = Arc::clone(&self.shared) as Arc<dyn ClusterEventHandler>;
        let token = cancel.clone();
        let task = tokio::spawn(
            async move { registry.run(handler, token).await }.instrument(info_span!("cluster_registry")),
        );
        state.registry_task = Some(BackgroundTask { cancel, task });
        info!("Federated informer started");
    }

    /// Stop the registry watch and every member watch, then wait for them to exit
    ///
    /// Idempotent. Must not be awaited from inside a registry event handler.
    pub async fn stop(&self) {
        let tasks = self.shared.stop_all();
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Watch task panicked");
                }
            }
        }
    }

    /// Returns true once [`start`](Self::start) has run
    pub fn has_started(&self) -> bool {
        self.shared.state.lock().started
    }

    /// Client for a ready member, built on first use and cached until the member becomes unavailable
    ///
    /// A client whose build raced with the member becoming unavailable is
    /// returned to the caller but not cached.
    pub async fn client_for_cluster(&self, name: &str) -> Result<Arc<dyn ClusterClient>> {
        let generation = {
            let state = self.shared.state.lock();
            if let Some(client) = state.cluster_clients.get(name) {
                return Ok(Arc::clone(client));
            }
            state.eviction_generation(name)
        };

        let cluster = self
            .ready_cluster(name)?
            .ok_or_else(|| Error::cluster_not_found(name))?;
        let config = self.shared.config_factory.config_for(&cluster).await?;
        let client = self.shared.client_factory.build(name, config)?;
        debug!(cluster = %name, "Built member client");

        let mut state = self.shared.state.lock();
        if state.stopped || state.eviction_generation(name) != generation {
            debug!(cluster = %name, "Member evicted during client build, not caching");
            return Ok(client);
        }
        Ok(Arc::clone(
            state
                .cluster_clients
                .entry(name.to_string())
                .or_insert(client),
        ))
    }

    // =========================================================================
    // Registry View
    // =========================================================================

    fn registered(&self) -> Vec<Arc<FederatedCluster>> {
        self.shared.registry.store().list()
    }

    /// Registered clusters that are not ready
    pub fn unready_clusters(&self) -> Vec<Arc<FederatedCluster>> {
        self.registered().into_iter().filter(|c| !c.is_ready()).collect()
    }

    /// Registered clusters that are ready
    pub fn ready_clusters(&self) -> Vec<Arc<FederatedCluster>> {
        self.registered().into_iter().filter(|c| c.is_ready()).collect()
    }

    /// Registered clusters that have joined, ready or not
    pub fn joined_clusters(&self) -> Vec<Arc<FederatedCluster>> {
        self.registered().into_iter().filter(|c| c.is_joined()).collect()
    }

    /// Registered cluster by name
    pub fn cluster(&self, name: &str) -> Result<Option<Arc<FederatedCluster>>> {
        self.shared.registry.store().get_by_key(name)
    }

    /// Registered cluster by name, only if it is ready
    pub fn ready_cluster(&self, name: &str) -> Result<Option<Arc<FederatedCluster>>> {
        Ok(self.cluster(name)?.filter(|c| c.is_ready()))
    }

    /// Returns true once the registry has mirrored its initial list
    pub fn clusters_synced(&self) -> bool {
        self.shared.registry.has_synced()
    }

    /// Read-only view across every member watch
    pub fn target_store(&self) -> FederatedStore<K> {
        FederatedStore::new(Arc::clone(&self.shared))
    }
}

#[cfg(test)]
impl<K: Send + Sync + 'static> FederatedInformer<K> {
    /// Event handler the registry task would drive
    pub(crate) fn dispatcher(&self) -> Arc<dyn ClusterEventHandler> {
        Arc::clone(&self.shared) as Arc<dyn ClusterEventHandler>
    }
}

impl<K> Shared<K> {
    /// Current member watches as (cluster, collection) pairs
    pub(crate) fn collections(&self) -> Vec<(String, WatchedCollection<K>)> {
        self.state
            .lock()
            .target_informers
            .iter()
            .map(|(name, t)| (name.clone(), t.collection.clone()))
            .collect()
    }

    /// Member watch for one cluster
    pub(crate) fn collection(&self, name: &str) -> Option<WatchedCollection<K>> {
        self.state
            .lock()
            .target_informers
            .get(name)
            .map(|t| t.collection.clone())
    }

    fn snapshot(&self, name: &str) -> Vec<Arc<K>> {
        self.collection(name)
            .map(|c| c.store.list())
            .unwrap_or_default()
    }

    fn remove_handle(&self, name: &str) {
        let removed = {
            let mut state = self.state.lock();
            state.evict_client(name);
            state.target_informers.remove(name)
        };
        if let Some(target) = removed {
            target.cancel.cancel();
            info!(cluster = %name, "Stopped member watch");
        }
    }

    /// Cancel everything and hand back the tasks to await
    fn stop_all(&self) -> Vec<JoinHandle<()>> {
        let (registry, targets) = {
            let mut state = self.state.lock();
            if state.stopped {
                return Vec::new();
            }
            state.stopped = true;
            state.cluster_clients.clear();
            (
                state.registry_task.take(),
                std::mem::take(&mut state.target_informers),
            )
        };

        let mut tasks = Vec::with_capacity(targets.len() + 1);
        if let Some(registry) = registry {
            registry.cancel.cancel();
            tasks.push(registry.task);
        }
        info!(count = targets.len(), "Stopping member watches");
        for (_, target) in targets {
            target.cancel.cancel();
            tasks.push(target.task);
        }
        tasks
    }
}

impl<K: Send + Sync + 'static> Shared<K> {
    /// Resolve config, build and start a watch for `cluster`, replacing any existing one
    ///
    /// Returns false when nothing was installed. A failed install is not
    /// retried until another registry event for the cluster asks again.
    async fn install_handle(&self, cluster: &FederatedCluster) -> bool {
        let name = cluster.name_any();
        let config = match self.config_factory.config_for(cluster).await {
            Ok(config) => config,
            Err(e) => {
                error!(cluster = %name, error = %e, "Failed to resolve member config, watch not started");
                return false;
            }
        };
        let collection = match (self.target_factory)(cluster, config) {
            Ok(collection) => collection,
            Err(e) => {
                error!(cluster = %name, error = %e, "Failed to build member watch");
                return false;
            }
        };

        let mut state = self.state.lock();
        if state.stopped {
            debug!(cluster = %name, "Informer stopped, discarding member watch");
            return false;
        }
        if let Some(previous) = state.target_informers.remove(&name) {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let controller = Arc::clone(&collection.controller);
        let token = cancel.clone();
        let task = tokio::spawn(
            async move { controller.run(token).await }
                .instrument(info_span!("member_watch", cluster = %name)),
        );
        state.target_informers.insert(
            name.clone(),
            TargetInformer {
                collection,
                cancel,
                task,
            },
        );
        info!(cluster = %name, "Started member watch");
        true
    }

    async fn on_add(&self, cluster: &FederatedCluster) {
        let name = cluster.name_any();
        if !cluster.is_ready() {
            info!(cluster = %name, "Cluster not added, it is not ready");
            return;
        }
        self.install_handle(cluster).await;
        info!(cluster = %name, "Cluster is ready");
        if let Some(on_available) = &self.lifecycle.on_available {
            on_available(cluster);
        }
    }

    async fn on_update(&self, old: &FederatedCluster, new: &FederatedCluster) {
        let name = old.name_any();
        match classify_update(old, new) {
            ClusterTransition::MarkedForDeletion => {
                debug!(cluster = %name, "Cluster marked for deletion");
                if let Some(on_unavailable) = &self.lifecycle.on_unavailable {
                    on_unavailable(old, self.snapshot(&name));
                }
            }
            ClusterTransition::Recreate => {
                info!(cluster = %name, ready = new.is_ready(), "Cluster changed, recreating member watch");
                let data = self
                    .lifecycle
                    .on_unavailable
                    .as_ref()
                    .map(|_| self.snapshot(&name));
                self.remove_handle(&name);
                if let (Some(on_unavailable), Some(data)) = (&self.lifecycle.on_unavailable, data) {
                    on_unavailable(old, data);
                }
                if new.is_ready() {
                    self.install_handle(new).await;
                    if let Some(on_available) = &self.lifecycle.on_available {
                        on_available(new);
                    }
                }
            }
            ClusterTransition::Unchanged => {}
        }
    }

    fn on_delete(&self, cluster: &FederatedCluster) {
        let name = cluster.name_any();
        let data = self
            .lifecycle
            .on_unavailable
            .as_ref()
            .map(|_| self.snapshot(&name));
        self.remove_handle(&name);
        info!(cluster = %name, "Cluster deleted");
        if let (Some(on_unavailable), Some(data)) = (&self.lifecycle.on_unavailable, data) {
            on_unavailable(cluster, data);
        }
    }
}

#[async_trait]
impl<K: Send + Sync + 'static> ClusterEventHandler for Shared<K> {
    async fn handle(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::Added(cluster) => self.on_add(&cluster).await,
            ClusterEvent::Updated { old, new } => self.on_update(&old, &new).await,
            ClusterEvent::Deleted(cluster) => self.on_delete(&cluster),
        }
    }
}
