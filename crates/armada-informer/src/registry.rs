//! Cluster registry watcher
//!
//! Mirrors `FederatedCluster` objects from the host API server and turns the
//! raw watch stream into ordered add/update/delete notifications for the
//! lifecycle dispatcher. The dispatcher is the only consumer that makes
//! availability decisions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use armada_common::crd::FederatedCluster;

use crate::store::{ObjectStore, ReflectorStore};

/// A change to the set of registered clusters
#[derive(Clone, Debug)]
pub enum ClusterEvent {
    /// A cluster was seen for the first time
    Added(Arc<FederatedCluster>),
    /// A known cluster changed, or was redelivered by a resync
    Updated {
        /// Previously delivered state
        old: Arc<FederatedCluster>,
        /// Current state
        new: Arc<FederatedCluster>,
    },
    /// A cluster was removed; carries the last state seen
    Deleted(Arc<FederatedCluster>),
}

impl ClusterEvent {
    /// Name of the cluster this event is about
    pub fn cluster_name(&self) -> String {
        match self {
            Self::Added(c) | Self::Deleted(c) => c.name_any(),
            Self::Updated { new, .. } => new.name_any(),
        }
    }
}

/// Receives registry events, one at a time, in order
#[async_trait]
pub trait ClusterEventHandler: Send + Sync {
    /// Handle one event; the next event is not delivered until this returns
    async fn handle(&self, event: ClusterEvent);
}

/// Watched collection of registered clusters
#[async_trait]
pub trait ClusterWatch: Send + Sync {
    /// Local mirror of the registry
    fn store(&self) -> Arc<dyn ObjectStore<FederatedCluster>>;

    /// Returns true once the initial list has been mirrored
    fn has_synced(&self) -> bool;

    /// Deliver events to `handler` until `cancel` fires
    async fn run(&self, handler: Arc<dyn ClusterEventHandler>, cancel: CancellationToken);
}

/// Turns raw watcher events into cluster lifecycle events
///
/// Holds the last delivered state per cluster so updates carry a before
/// snapshot and deletes carry the final known state. A relist is buffered
/// until it completes, then diffed against what was delivered before it.
#[derive(Default)]
pub(crate) struct EventTranslator {
    seen: BTreeMap<String, Arc<FederatedCluster>>,
    relist: Option<BTreeMap<String, Arc<FederatedCluster>>>,
}

impl EventTranslator {
    pub(crate) fn translate(&mut self, event: watcher::Event<FederatedCluster>) -> Vec<ClusterEvent> {
        match event {
            watcher::Event::Apply(cluster) => {
                let new = Arc::new(cluster);
                let event = match self.seen.insert(new.name_any(), Arc::clone(&new)) {
                    Some(old) => ClusterEvent::Updated { old, new },
                    None => ClusterEvent::Added(new),
                };
                vec![event]
            }
            watcher::Event::Delete(cluster) => {
                let last = self
                    .seen
                    .remove(&cluster.name_any())
                    .unwrap_or_else(|| Arc::new(cluster));
                vec![ClusterEvent::Deleted(last)]
            }
            watcher::Event::Init => {
                self.relist = Some(BTreeMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(cluster) => {
                self.relist
                    .get_or_insert_with(BTreeMap::new)
                    .insert(cluster.name_any(), Arc::new(cluster));
                Vec::new()
            }
            watcher::Event::InitDone => {
                let fresh = self.relist.take().unwrap_or_default();
                let previous = std::mem::replace(&mut self.seen, fresh);

                let mut events: Vec<ClusterEvent> = previous
                    .iter()
                    .filter(|(name, _)| !self.seen.contains_key(*name))
                    .map(|(_, last)| ClusterEvent::Deleted(Arc::clone(last)))
                    .collect();
                for (name, new) in &self.seen {
                    events.push(match previous.get(name) {
                        Some(old) => ClusterEvent::Updated {
                            old: Arc::clone(old),
                            new: Arc::clone(new),
                        },
                        None => ClusterEvent::Added(Arc::clone(new)),
                    });
                }
                events
            }
        }
    }

    /// Redeliver every known cluster unchanged
    pub(crate) fn resync(&self) -> Vec<ClusterEvent> {
        self.seen
            .values()
            .map(|c| ClusterEvent::Updated {
                old: Arc::clone(c),
                new: Arc::clone(c),
            })
            .collect()
    }
}

/// Registry watcher backed by a kube-runtime reflector
pub struct KubeClusterWatch {
    api: Api<FederatedCluster>,
    writer: Mutex<Option<Writer<FederatedCluster>>>,
    store: Arc<ReflectorStore<FederatedCluster>>,
    synced: AtomicBool,
    resync_period: Duration,
}

impl KubeClusterWatch {
    /// Watch all `FederatedCluster` objects visible to `client`
    pub fn new(client: Client, resync_period: Duration) -> Self {
        let writer = Writer::default();
        let store = Arc::new(ReflectorStore::new(writer.as_reader(), ()));
        Self {
            api: Api::all(client),
            writer: Mutex::new(Some(writer)),
            store,
            synced: AtomicBool::new(false),
            resync_period,
        }
    }

    async fn deliver(handler: &Arc<dyn ClusterEventHandler>, events: Vec<ClusterEvent>) {
        for event in events {
            handler.handle(event).await;
        }
    }
}

#[async_trait]
impl ClusterWatch for KubeClusterWatch {
    fn store(&self) -> Arc<dyn ObjectStore<FederatedCluster>> {
        Arc::clone(&self.store) as Arc<dyn ObjectStore<FederatedCluster>>
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn run(&self, handler: Arc<dyn ClusterEventHandler>, cancel: CancellationToken) {
        let Some(writer) = self.writer.lock().take() else {
            warn!("Cluster registry watch already started, ignoring second run");
            return;
        };

        let mut stream = reflector::reflector(
            writer,
            watcher::watcher(self.api.clone(), watcher::Config::default()).default_backoff(),
        )
        .boxed();

        let mut resync = interval_at(Instant::now() + self.resync_period, self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut translator = EventTranslator::default();

        info!(resync_period = ?self.resync_period, "Watching cluster registry");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cluster registry watch cancelled");
                    break;
                }
                _ = resync.tick() => {
                    let events = translator.resync();
                    debug!(count = events.len(), "Resyncing cluster registry");
                    Self::deliver(&handler, events).await;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if matches!(event, watcher::Event::InitDone)
                            && !self.synced.swap(true, Ordering::SeqCst)
                        {
                            info!("Cluster registry synced");
                        }
                        Self::deliver(&handler, translator.translate(event)).await;
                    }
                    Some(Err(e)) => warn!(error = %e, "Cluster registry watch error, backing off"),
                    None => {
                        debug!("Cluster registry stream ended");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cluster, ready_cluster};

    fn names(events: &[ClusterEvent]) -> Vec<(String, &'static str)> {
        events
            .iter()
            .map(|e| {
                let kind = match e {
                    ClusterEvent::Added(_) => "added",
                    ClusterEvent::Updated { .. } => "updated",
                    ClusterEvent::Deleted(_) => "deleted",
                };
                (e.cluster_name(), kind)
            })
            .collect()
    }

    // =========================================================================
    // Live Events
    // =========================================================================

    #[test]
    fn test_first_apply_is_added_then_updated() {
        let mut translator = EventTranslator::default();

        let events = translator.translate(watcher::Event::Apply(cluster("a", false, true)));
        assert_eq!(names(&events), vec![("a".to_string(), "added")]);

        let events = translator.translate(watcher::Event::Apply(ready_cluster("a")));
        match &events[..] {
            [ClusterEvent::Updated { old, new }] => {
                assert!(!old.is_ready());
                assert!(new.is_ready());
            }
            other => panic!("expected one update, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_carries_last_seen_state() {
        let mut translator = EventTranslator::default();
        translator.translate(watcher::Event::Apply(ready_cluster("a")));

        // The delete notification itself carries a stale, unready copy.
        let events = translator.translate(watcher::Event::Delete(cluster("a", false, false)));
        match &events[..] {
            [ClusterEvent::Deleted(last)] => assert!(last.is_ready()),
            other => panic!("expected one delete, got {:?}", other),
        }
        assert!(translator.resync().is_empty());
    }

    #[test]
    fn test_delete_of_unknown_cluster_uses_event_copy() {
        let mut translator = EventTranslator::default();
        let events = translator.translate(watcher::Event::Delete(ready_cluster("ghost")));
        assert_eq!(names(&events), vec![("ghost".to_string(), "deleted")]);
    }

    // =========================================================================
    // Relist Diffing
    // =========================================================================

    #[test]
    fn test_initial_list_delivers_adds_on_completion() {
        let mut translator = EventTranslator::default();
        assert!(translator.translate(watcher::Event::Init).is_empty());
        assert!(translator
            .translate(watcher::Event::InitApply(ready_cluster("b")))
            .is_empty());
        assert!(translator
            .translate(watcher::Event::InitApply(ready_cluster("a")))
            .is_empty());

        let events = translator.translate(watcher::Event::InitDone);
        assert_eq!(
            names(&events),
            vec![("a".to_string(), "added"), ("b".to_string(), "added")]
        );
    }

    #[test]
    fn test_relist_reports_vanished_clusters_as_deleted() {
        let mut translator = EventTranslator::default();
        translator.translate(watcher::Event::Apply(ready_cluster("a")));
        translator.translate(watcher::Event::Apply(ready_cluster("b")));

        translator.translate(watcher::Event::Init);
        translator.translate(watcher::Event::InitApply(ready_cluster("b")));
        translator.translate(watcher::Event::InitApply(ready_cluster("c")));
        let events = translator.translate(watcher::Event::InitDone);

        assert_eq!(
            names(&events),
            vec![
                ("a".to_string(), "deleted"),
                ("b".to_string(), "updated"),
                ("c".to_string(), "added"),
            ]
        );
    }

    #[test]
    fn test_resync_redelivers_identical_snapshots() {
        let mut translator = EventTranslator::default();
        translator.translate(watcher::Event::Apply(ready_cluster("a")));

        match &translator.resync()[..] {
            [ClusterEvent::Updated { old, new }] => assert!(Arc::ptr_eq(old, new)),
            other => panic!("expected one update, got {:?}", other),
        }
    }
}
