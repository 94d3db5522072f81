//! Watched collections: a mirror store plus the background task feeding it
//!
//! The informer never talks to the watch protocol directly. It receives a
//! [`WatchedCollection`] from a [`TargetInformerFactory`], spawns the
//! controller's [`WatchController::run`] under a cancellation token, and reads
//! through the store.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use armada_common::crd::FederatedCluster;
use armada_common::{Error, Result, MANAGED_LABEL_SELECTOR};

use crate::store::{ObjectStore, ReflectorStore};

/// Callback invoked for every object a watch observes
pub type TriggerFn<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// Builds the watched collection for one member cluster from its resolved config
pub type TargetInformerFactory<K> =
    Arc<dyn Fn(&FederatedCluster, kube::Config) -> Result<WatchedCollection<K>> + Send + Sync>;

/// Background half of a watched collection
#[async_trait]
pub trait WatchController: Send + Sync {
    /// Returns true once the initial list has been mirrored
    fn has_synced(&self) -> bool;

    /// Mirror the collection until `cancel` fires
    ///
    /// In-flight work completes before returning; there is no preemption.
    async fn run(&self, cancel: CancellationToken);
}

/// A mirror store and the controller that keeps it current
pub struct WatchedCollection<K> {
    /// Read side
    pub store: Arc<dyn ObjectStore<K>>,
    /// Background side
    pub controller: Arc<dyn WatchController>,
}

impl<K> Clone for WatchedCollection<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            controller: Arc::clone(&self.controller),
        }
    }
}

/// kube-runtime backed controller: `watcher` + `reflector` with default backoff
pub struct ReflectorWatch<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    config: watcher::Config,
    writer: Mutex<Option<Writer<K>>>,
    synced: AtomicBool,
    trigger: TriggerFn<K>,
}

impl<K> ReflectorWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    /// Build a watched collection mirroring `api`
    pub fn collection(
        api: Api<K>,
        dyntype: K::DynamicType,
        config: watcher::Config,
        trigger: TriggerFn<K>,
    ) -> WatchedCollection<K> {
        let writer = Writer::new(dyntype.clone());
        let store = ReflectorStore::new(writer.as_reader(), dyntype);
        let controller = Self {
            api,
            config,
            writer: Mutex::new(Some(writer)),
            synced: AtomicBool::new(false),
            trigger,
        };
        WatchedCollection {
            store: Arc::new(store),
            controller: Arc::new(controller),
        }
    }

    fn observe(&self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Init => {}
            watcher::Event::InitDone => {
                if !self.synced.swap(true, Ordering::SeqCst) {
                    debug!("Initial list mirrored");
                }
            }
            watcher::Event::Apply(obj)
            | watcher::Event::InitApply(obj)
            | watcher::Event::Delete(obj) => (self.trigger)(obj),
        }
    }
}

#[async_trait]
impl<K> WatchController for ReflectorWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn run(&self, cancel: CancellationToken) {
        let Some(writer) = self.writer.lock().take() else {
            warn!("Watch already started, ignoring second run");
            return;
        };

        let mut stream = reflector::reflector(
            writer,
            watcher::watcher(self.api.clone(), self.config.clone()).default_backoff(),
        )
        .boxed();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Watch cancelled");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => self.observe(&event),
                    Some(Err(e)) => warn!(error = %e, "Watch error, backing off"),
                    None => {
                        debug!("Watch stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Factory for watches on objects the federation manages in member clusters
///
/// Each member gets its own client from the resolved config, scoped to
/// `target_namespace` (or all namespaces), and only sees objects carrying the
/// management label.
pub fn managed_resource_factory(
    api_resource: ApiResource,
    target_namespace: Option<String>,
    trigger: TriggerFn<DynamicObject>,
) -> TargetInformerFactory<DynamicObject> {
    Arc::new(
        move |cluster: &FederatedCluster,
              config: kube::Config|
              -> Result<WatchedCollection<DynamicObject>> {
            let client = Client::try_from(config)
                .map_err(|e| Error::client_creation(cluster.name_any(), e.to_string()))?;
            let api: Api<DynamicObject> = match &target_namespace {
                Some(ns) => Api::namespaced_with(client, ns, &api_resource),
                None => Api::all_with(client, &api_resource),
            };
            let watcher_config = watcher::Config::default().labels(MANAGED_LABEL_SELECTOR);
            Ok(ReflectorWatch::collection(
                api,
                api_resource.clone(),
                watcher_config,
                Arc::clone(&trigger),
            ))
        },
    )
}
