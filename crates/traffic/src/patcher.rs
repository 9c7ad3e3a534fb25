//! Single-key selector switching.

use metrics::counter;
use serde_json::{json, Value as Json};
use switchyard_core::{RolloutKey, RoutingTarget, TrafficResult};
use tracing::info;

use crate::ClusterOps;

/// Strategic-merge document that sets exactly `key` on `spec.selector`.
/// An empty `value` is written as-is; the key is never dropped.
pub fn selector_patch(key: &str, value: &str) -> Json {
    let mut selector = serde_json::Map::new();
    selector.insert(key.to_string(), Json::String(value.to_string()));
    json!({ "spec": { "selector": selector } })
}

/// Point `target` at `value` (or at nothing when `value` is empty).
///
/// Store errors come back untouched, including not-found when the Service
/// vanished after it was read.
pub async fn switch_selector<C>(
    ops: &C,
    key: &str,
    target: &RoutingTarget,
    value: &str,
    rollout: Option<&RolloutKey>,
) -> TrafficResult<()>
where
    C: ClusterOps + ?Sized,
{
    match rollout {
        Some(r) => info!(rollout = %r, service = %target.name, value = %value, "switching service selector"),
        None => info!(namespace = %target.namespace, service = %target.name, value = %value, "switching service selector"),
    }
    ops.patch_selector(target, key, value).await?;
    counter!("switchyard_selector_switch_total", 1u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::memory::MemoryCluster;

    #[test]
    fn patch_document_has_nested_selector_shape() {
        let p = selector_patch("rollouts-pod-template-hash", "abc123");
        assert_eq!(p, json!({"spec": {"selector": {"rollouts-pod-template-hash": "abc123"}}}));
        let empty = selector_patch("rollouts-pod-template-hash", "");
        assert_eq!(empty["spec"]["selector"]["rollouts-pod-template-hash"], json!(""));
    }

    #[tokio::test]
    async fn switch_keeps_unrelated_selector_keys() {
        let key = "rollouts-pod-template-hash";
        let cluster = MemoryCluster::new();
        let svc = cluster.insert_service(
            "ns",
            "svc",
            Some(BTreeMap::from([("app".to_string(), "guestbook".to_string()), (key.to_string(), "v1".to_string())])),
        );

        switch_selector(&cluster, key, &svc, "v2", None).await.expect("switch");
        let after = cluster.service("ns", "svc").expect("svc");
        let sel = after.selector.expect("selector");
        assert_eq!(sel.get("app").map(String::as_str), Some("guestbook"));
        assert_eq!(sel.get(key).map(String::as_str), Some("v2"));

        switch_selector(&cluster, key, &svc, "", None).await.expect("deselect");
        let after = cluster.service("ns", "svc").expect("svc");
        assert_eq!(after.selector_value(key), Some(""));
        assert_eq!(after.selector_value("app"), Some("guestbook"));
    }

    #[tokio::test]
    async fn switch_surfaces_not_found() {
        let cluster = MemoryCluster::new();
        let ghost = RoutingTarget { namespace: "ns".into(), name: "gone".into(), ..Default::default() };
        let err = switch_selector(&cluster, "k", &ghost, "v1", None).await.unwrap_err();
        assert!(err.is_not_found(), "err={}", err);
    }
}
