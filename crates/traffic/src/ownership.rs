//! Which rollout owns a Service.
//!
//! A Service may be the active target of at most one rollout in its namespace.
//! Ownership is resolved by scanning every rollout there.

use metrics::counter;
use switchyard_core::{Rollout, RoutingTarget, TrafficError, TrafficResult};

use crate::ClusterOps;

/// Rollouts naming `target` as their active Service.
///
/// Zero matches is an unmanaged Service and yields an empty list. Two or more
/// is a configuration conflict: an error, and no rollout is returned.
pub async fn owners_of<C>(ops: &C, target: &RoutingTarget) -> TrafficResult<Vec<Rollout>>
where
    C: ClusterOps + ?Sized,
{
    let all = ops.list_rollouts(&target.namespace).await?;
    let owners: Vec<Rollout> = all.into_iter().filter(|r| r.spec.active_service == target.name).collect();
    if owners.len() > 1 {
        counter!("switchyard_ownership_conflict_total", 1u64);
        let mut rollouts: Vec<String> = owners.iter().map(|r| r.name.clone()).collect();
        rollouts.sort();
        return Err(TrafficError::OwnershipConflict {
            namespace: target.namespace.clone(),
            service: target.name.clone(),
            rollouts,
        });
    }
    Ok(owners)
}

/// The single owner of `target`, or `None` if it has none.
pub async fn owner_of<C>(ops: &C, target: &RoutingTarget) -> TrafficResult<Option<Rollout>>
where
    C: ClusterOps + ?Sized,
{
    Ok(owners_of(ops, target).await?.into_iter().next())
}
