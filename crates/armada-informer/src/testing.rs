//! Test fixtures: cluster builders and in-memory collaborators

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use armada_common::crd::{
    ClusterCondition, ClusterConditionType, ConditionStatus, FederatedCluster,
    FederatedClusterSpec, FederatedClusterStatus, LocalSecretReference,
};
use armada_common::{Error, Result};

use crate::registry::{ClusterEvent, ClusterEventHandler, ClusterWatch};
use crate::store::{MemoryStore, ObjectStore};
use crate::watch::{TargetInformerFactory, WatchController, WatchedCollection};

// =============================================================================
// Cluster Builders
// =============================================================================

fn condition(type_: ClusterConditionType, on: bool) -> ClusterCondition {
    let status = if on {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    ClusterCondition::new(type_, status)
}

pub(crate) fn cluster(name: &str, ready: bool, joined: bool) -> FederatedCluster {
    let spec = FederatedClusterSpec {
        api_endpoint: format!("https://{}.example.com:6443", name),
        insecure: false,
        use_service_account_token: true,
        secret_ref: LocalSecretReference {
            name: format!("{}-creds", name),
        },
    };
    let mut c = FederatedCluster::new(name, spec);
    c.status = Some(FederatedClusterStatus {
        conditions: vec![
            condition(ClusterConditionType::Joined, joined),
            condition(ClusterConditionType::Ready, ready),
        ],
    });
    c
}

pub(crate) fn ready_cluster(name: &str) -> FederatedCluster {
    cluster(name, true, true)
}

pub(crate) fn unready_cluster(name: &str) -> FederatedCluster {
    cluster(name, false, true)
}

pub(crate) fn member_config() -> kube::Config {
    kube::Config::new("https://127.0.0.1:6443".parse().unwrap())
}

// =============================================================================
// Watch Controller
// =============================================================================

/// Controller whose sync flag is set by the test and whose shutdown is observable
#[derive(Default)]
pub(crate) struct FakeController {
    synced: AtomicBool,
    runs: AtomicUsize,
    stopped: CancellationToken,
}

impl FakeController {
    pub(crate) fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Resolves once `run` has observed its cancellation
    pub(crate) async fn wait_stopped(&self) {
        self.stopped.cancelled().await
    }
}

#[async_trait]
impl WatchController for FakeController {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn run(&self, cancel: CancellationToken) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        self.stopped.cancel();
    }
}

// =============================================================================
// Target Informer Factory
// =============================================================================

/// Mirror that counts full listings
struct CountingStore<K> {
    inner: Arc<MemoryStore<K>>,
    lists: Arc<AtomicUsize>,
}

impl<K: Resource + Send + Sync> ObjectStore<K> for CountingStore<K> {
    fn list(&self) -> Vec<Arc<K>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list()
    }

    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>> {
        self.inner.get_by_key(key)
    }
}

/// One collection handed out by [`FakeTargets`]
pub(crate) struct FakeMember<K> {
    pub(crate) store: Arc<MemoryStore<K>>,
    pub(crate) controller: Arc<FakeController>,
    lists: Arc<AtomicUsize>,
}

impl<K> FakeMember<K> {
    /// Full listings taken through the informer's view of this mirror
    pub(crate) fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

impl<K> Clone for FakeMember<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            controller: Arc::clone(&self.controller),
            lists: Arc::clone(&self.lists),
        }
    }
}

/// Records every collection it builds, seeding stores with per-cluster objects
pub(crate) struct FakeTargets<K> {
    built: Mutex<Vec<(String, FakeMember<K>)>>,
    seed: Mutex<HashMap<String, Vec<K>>>,
    failing: Mutex<HashSet<String>>,
}

impl<K> Default for FakeTargets<K> {
    fn default() -> Self {
        Self {
            built: Mutex::new(Vec::new()),
            seed: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }
}

impl<K> FakeTargets<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Objects every future collection for `cluster` starts with
    pub(crate) fn seed(&self, cluster: &str, objects: Vec<K>) {
        self.seed.lock().insert(cluster.to_string(), objects);
    }

    /// Make construction for `cluster` fail
    pub(crate) fn fail(&self, cluster: &str) {
        self.failing.lock().insert(cluster.to_string());
    }

    /// Number of collections built for `cluster`
    pub(crate) fn built_for(&self, cluster: &str) -> usize {
        self.built.lock().iter().filter(|(n, _)| n == cluster).count()
    }

    /// Every collection built for `cluster`, oldest first
    pub(crate) fn all_for(&self, cluster: &str) -> Vec<FakeMember<K>> {
        self.built
            .lock()
            .iter()
            .filter(|(n, _)| n == cluster)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Most recent collection built for `cluster`
    pub(crate) fn latest(&self, cluster: &str) -> Option<FakeMember<K>> {
        self.all_for(cluster).pop()
    }

    pub(crate) fn factory(self: &Arc<Self>) -> TargetInformerFactory<K> {
        let targets = Arc::clone(self);
        Arc::new(
            move |cluster: &FederatedCluster, _config: kube::Config| -> Result<WatchedCollection<K>> {
                let name = cluster.name_any();
                if targets.failing.lock().contains(&name) {
                    return Err(Error::client_creation(&name, "injected failure"));
                }
                let store = Arc::new(MemoryStore::new());
                if let Some(objects) = targets.seed.lock().get(&name) {
                    store.replace(objects.iter().cloned());
                }
                let member = FakeMember {
                    store,
                    controller: Arc::new(FakeController::default()),
                    lists: Arc::new(AtomicUsize::new(0)),
                };
                targets.built.lock().push((name, member.clone()));
                let counted = CountingStore {
                    inner: member.store,
                    lists: member.lists,
                };
                Ok(WatchedCollection {
                    store: Arc::new(counted) as Arc<dyn ObjectStore<K>>,
                    controller: member.controller as Arc<dyn WatchController>,
                })
            },
        )
    }
}

// =============================================================================
// Cluster Registry
// =============================================================================

type Delivery = (ClusterEvent, oneshot::Sender<()>);

/// Registry fed by the test; `send` resolves once the handler has finished
pub(crate) struct FakeClusterWatch {
    store: Arc<MemoryStore<FederatedCluster>>,
    synced: AtomicBool,
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
}

impl FakeClusterWatch {
    pub(crate) fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            store: Arc::new(MemoryStore::new()),
            synced: AtomicBool::new(false),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    pub(crate) fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    /// Mirror the event into the registry store, as a reflector would
    pub(crate) fn apply(&self, event: &ClusterEvent) {
        match event {
            ClusterEvent::Added(c) | ClusterEvent::Updated { new: c, .. } => {
                self.store.apply(FederatedCluster::clone(c));
            }
            ClusterEvent::Deleted(c) => {
                self.store.delete(&c.name_any());
            }
        }
    }

    /// Deliver through a running watch and wait for the handler
    pub(crate) async fn send(&self, event: ClusterEvent) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send((event, ack_tx)).unwrap();
        ack_rx.await.unwrap();
    }
}

#[async_trait]
impl ClusterWatch for FakeClusterWatch {
    fn store(&self) -> Arc<dyn ObjectStore<FederatedCluster>> {
        Arc::clone(&self.store) as Arc<dyn ObjectStore<FederatedCluster>>
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn run(&self, handler: Arc<dyn ClusterEventHandler>, cancel: CancellationToken) {
        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = rx.recv() => match delivery {
                    Some((event, ack)) => {
                        self.apply(&event);
                        handler.handle(event).await;
                        let _ = ack.send(());
                    }
                    None => break,
                }
            }
        }
    }
}
