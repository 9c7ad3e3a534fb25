use switchyard_core::{Rollout, RoutingTarget, TrafficError, TrafficResult};
use tracing::warn;

use crate::ClusterOps;

/// Live Services a rollout routes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePair {
    pub preview: Option<RoutingTarget>,
    pub active: RoutingTarget,
}

/// Fetch the preview (if configured) and active Services for `rollout`.
///
/// An unset active name fails before anything is fetched. A Service that does
/// not exist is logged and returned as not-found.
pub async fn get_preview_and_active<C>(ops: &C, rollout: &Rollout) -> TrafficResult<ServicePair>
where
    C: ClusterOps + ?Sized,
{
    let preview = match rollout.preview_service() {
        Some(name) => Some(fetch_service(ops, rollout, name).await?),
        None => None,
    };
    if rollout.spec.active_service.is_empty() {
        return Err(TrafficError::MissingActiveService { rollout: rollout.key().to_string() });
    }
    let active = fetch_service(ops, rollout, &rollout.spec.active_service).await?;
    Ok(ServicePair { preview, active })
}

async fn fetch_service<C>(ops: &C, rollout: &Rollout, name: &str) -> TrafficResult<RoutingTarget>
where
    C: ClusterOps + ?Sized,
{
    ops.get_service(&rollout.namespace, name).await.map_err(|e| {
        if e.is_not_found() {
            warn!(rollout = %rollout.key(), service = %name, "service does not exist");
        }
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, MemoryCluster};
    use switchyard_core::{BlueGreenSpec, RolloutStatus};

    fn rollout(active: &str, preview: Option<&str>) -> Rollout {
        Rollout {
            namespace: "ns".into(),
            name: "app".into(),
            spec: BlueGreenSpec { active_service: active.into(), preview_service: preview.map(str::to_string) },
            status: RolloutStatus::default(),
        }
    }

    #[tokio::test]
    async fn missing_active_name_is_configuration_error_without_fetch() {
        let cluster = MemoryCluster::new();
        let err = get_preview_and_active(&cluster, &rollout("", None)).await.unwrap_err();
        assert!(err.is_configuration(), "err={}", err);
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_preview_service_aborts() {
        let cluster = MemoryCluster::new();
        cluster.insert_service("ns", "active", None);
        let err = get_preview_and_active(&cluster, &rollout("active", Some("preview"))).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cluster.calls(), vec![Call::GetService { namespace: "ns".into(), name: "preview".into() }]);
    }

    #[tokio::test]
    async fn missing_active_service_aborts_after_preview() {
        let cluster = MemoryCluster::new();
        cluster.insert_service("ns", "preview", None);
        let err = get_preview_and_active(&cluster, &rollout("active", Some("preview"))).await.unwrap_err();
        assert!(err.is_not_found(), "err={}", err);
        assert_eq!(
            cluster.calls(),
            vec![
                Call::GetService { namespace: "ns".into(), name: "preview".into() },
                Call::GetService { namespace: "ns".into(), name: "active".into() },
            ]
        );
    }

    #[tokio::test]
    async fn returns_both_services() {
        let cluster = MemoryCluster::new();
        cluster.insert_service("ns", "active", None);
        cluster.insert_service("ns", "preview", None);
        let pair = get_preview_and_active(&cluster, &rollout("active", Some("preview"))).await.expect("pair");
        assert_eq!(pair.active.name, "active");
        assert_eq!(pair.preview.map(|p| p.name), Some("preview".to_string()));

        let no_preview = get_preview_and_active(&cluster, &rollout("active", None)).await.expect("pair");
        assert!(no_preview.preview.is_none());
    }
}
