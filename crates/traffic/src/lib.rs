//! Switchyard traffic: blue-green cutover between an active and a preview Service.
//!
//! Everything here talks to the cluster through [`ClusterOps`]. The kube-backed
//! implementation lives in `switchyard-kubehub`; [`memory::MemoryCluster`] keeps
//! the same contract in RAM.

#![forbid(unsafe_code)]

use std::sync::Arc;

use switchyard_core::{Rollout, RoutingTarget, TrafficResult};

pub mod events;
pub mod fetch;
pub mod memory;
pub mod ownership;
pub mod patcher;
pub mod reconciler;

pub use events::ServiceEventRouter;
pub use fetch::{get_preview_and_active, ServicePair};
pub use ownership::{owner_of, owners_of};
pub use patcher::{selector_patch, switch_selector};
pub use reconciler::{plan_active, plan_preview, ActiveAction, Hold, PassOutcome, PreviewAction, TrafficReconciler};

/// Cluster operations the cutover logic consumes. Implementations must surface
/// backing-store failures as errors; nothing here retries.
#[async_trait::async_trait]
pub trait ClusterOps: Send + Sync {
    /// Fetch a Service. A missing object is `TrafficError::NotFound`.
    async fn get_service(&self, namespace: &str, name: &str) -> TrafficResult<RoutingTarget>;

    /// All rollouts in a namespace.
    async fn list_rollouts(&self, namespace: &str) -> TrafficResult<Vec<Rollout>>;

    /// Merge `key: value` into the Service selector, leaving other keys alone.
    async fn patch_selector(&self, target: &RoutingTarget, key: &str, value: &str) -> TrafficResult<()>;

    /// Move the rollout into the verifying-preview phase.
    async fn mark_verifying_preview(&self, rollout: &Rollout) -> TrafficResult<()>;

    /// Record `value` as the rollout's promoted version.
    async fn record_active_selector(&self, rollout: &Rollout, value: &str) -> TrafficResult<()>;
}

#[async_trait::async_trait]
impl<T: ClusterOps + ?Sized> ClusterOps for Arc<T> {
    async fn get_service(&self, namespace: &str, name: &str) -> TrafficResult<RoutingTarget> {
        (**self).get_service(namespace, name).await
    }

    async fn list_rollouts(&self, namespace: &str) -> TrafficResult<Vec<Rollout>> {
        (**self).list_rollouts(namespace).await
    }

    async fn patch_selector(&self, target: &RoutingTarget, key: &str, value: &str) -> TrafficResult<()> {
        (**self).patch_selector(target, key, value).await
    }

    async fn mark_verifying_preview(&self, rollout: &Rollout) -> TrafficResult<()> {
        (**self).mark_verifying_preview(rollout).await
    }

    async fn record_active_selector(&self, rollout: &Rollout, value: &str) -> TrafficResult<()> {
        (**self).record_active_selector(rollout, value).await
    }
}
