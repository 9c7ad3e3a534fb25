//! Service change notifications routed to the owning rollout.

use metrics::counter;
use switchyard_core::{RolloutKey, RoutingTarget};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ownership::owners_of;
use crate::ClusterOps;

/// Typed Service callbacks. Each observed Service change resolves its owner and,
/// when there is exactly one, enqueues that rollout for reconciliation.
pub struct ServiceEventRouter<C> {
    ops: C,
    queue: mpsc::Sender<RolloutKey>,
}

impl<C: ClusterOps> ServiceEventRouter<C> {
    pub fn new(ops: C, queue: mpsc::Sender<RolloutKey>) -> Self {
        Self { ops, queue }
    }

    /// Service added (or seen on relist).
    pub async fn on_add(&self, svc: &RoutingTarget) -> Option<RolloutKey> {
        self.handle(svc).await
    }

    /// Service updated. Resyncs that carry the same resource version are ignored.
    pub async fn on_update(&self, old: &RoutingTarget, cur: &RoutingTarget) -> Option<RolloutKey> {
        if old.resource_version == cur.resource_version {
            return None;
        }
        self.handle(cur).await
    }

    async fn handle(&self, svc: &RoutingTarget) -> Option<RolloutKey> {
        let owners = match owners_of(&self.ops, svc).await {
            Ok(owners) => owners,
            Err(e) => {
                debug!(namespace = %svc.namespace, service = %svc.name, error = %e, "dropping service event");
                counter!("switchyard_events_dropped_total", 1u64);
                return None;
            }
        };
        let [owner] = owners.as_slice() else {
            return None;
        };
        let key = owner.key();
        if self.queue.send(key.clone()).await.is_err() {
            warn!(rollout = %key, "rollout queue closed; event lost");
            return None;
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCluster;
    use std::sync::Arc;
    use switchyard_core::{BlueGreenSpec, Rollout, RolloutStatus};

    fn rollout(name: &str, active: &str) -> Rollout {
        Rollout {
            namespace: "ns".into(),
            name: name.into(),
            spec: BlueGreenSpec { active_service: active.into(), preview_service: None },
            status: RolloutStatus::default(),
        }
    }

    #[tokio::test]
    async fn enqueues_single_owner() {
        let cluster = Arc::new(MemoryCluster::new());
        let svc = cluster.insert_service("ns", "svc-a", None);
        cluster.insert_rollout(rollout("app", "svc-a"));
        let (tx, mut rx) = mpsc::channel(4);
        let router = ServiceEventRouter::new(cluster.clone(), tx);

        let key = router.on_add(&svc).await.expect("enqueued");
        assert_eq!(key.to_string(), "ns/app");
        assert_eq!(rx.recv().await, Some(key));
    }

    #[tokio::test]
    async fn same_resource_version_is_dropped() {
        let cluster = Arc::new(MemoryCluster::new());
        let svc = cluster.insert_service("ns", "svc-a", None);
        cluster.insert_rollout(rollout("app", "svc-a"));
        let (tx, mut rx) = mpsc::channel(4);
        let router = ServiceEventRouter::new(cluster.clone(), tx);

        assert!(router.on_update(&svc, &svc).await.is_none());
        assert!(rx.try_recv().is_err());
        assert!(cluster.calls().is_empty());

        let mut newer = svc.clone();
        newer.resource_version = Some("999".into());
        assert!(router.on_update(&svc, &newer).await.is_some());
    }

    #[tokio::test]
    async fn conflict_and_unmanaged_are_dropped() {
        let cluster = Arc::new(MemoryCluster::new());
        let contested = cluster.insert_service("ns", "svc-a", None);
        let unmanaged = cluster.insert_service("ns", "svc-b", None);
        cluster.insert_rollout(rollout("one", "svc-a"));
        cluster.insert_rollout(rollout("two", "svc-a"));
        let (tx, mut rx) = mpsc::channel(4);
        let router = ServiceEventRouter::new(cluster, tx);

        assert!(router.on_add(&contested).await.is_none());
        assert!(router.on_add(&unmanaged).await.is_none());
        assert!(rx.try_recv().is_err());
    }
}
