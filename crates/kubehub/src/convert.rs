//! Live objects to switchyard types.

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::core::DynamicObject;
use serde_json::Value as Json;
use switchyard_core::{BackendVersion, BlueGreenSpec, Rollout, RolloutStatus, RoutingTarget, TrafficError, TrafficResult};

/// Annotation a rollout stamps on its ReplicaSets with the replica count it wants.
pub const DESIRED_REPLICAS_ANNOTATION: &str = "rollout.argoproj.io/desired-replicas";

pub fn target_from_service(svc: &Service) -> TrafficResult<RoutingTarget> {
    let meta = &svc.metadata;
    let name = meta
        .name
        .clone()
        .ok_or_else(|| TrafficError::InvalidObject { kind: "Service", reason: "missing metadata.name".into() })?;
    Ok(RoutingTarget {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name,
        resource_version: meta.resource_version.clone(),
        selector: svc.spec.as_ref().and_then(|s| s.selector.clone()),
    })
}

fn str_at<'a>(v: &'a Json, path: &[&str]) -> Option<&'a str> {
    path.iter().try_fold(v, |cur, seg| cur.get(*seg))?.as_str()
}

pub fn rollout_from_dynamic(obj: &DynamicObject) -> TrafficResult<Rollout> {
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| TrafficError::InvalidObject { kind: "Rollout", reason: "missing metadata.name".into() })?;
    let namespace = obj.metadata.namespace.clone().unwrap_or_default();
    let data = &obj.data;
    if data.get("spec").map(|s| !s.is_object()).unwrap_or(true) {
        return Err(TrafficError::InvalidObject { kind: "Rollout", reason: format!("{}/{} has no spec", namespace, name) });
    }
    let spec = BlueGreenSpec {
        active_service: str_at(data, &["spec", "strategy", "blueGreen", "activeService"]).unwrap_or_default().to_string(),
        preview_service: str_at(data, &["spec", "strategy", "blueGreen", "previewService"]).map(str::to_string),
    };
    let status = RolloutStatus {
        active_selector: str_at(data, &["status", "activeSelector"]).unwrap_or_default().to_string(),
        verifying_preview: data
            .get("status")
            .and_then(|s| s.get("verifyingPreview"))
            .and_then(Json::as_bool)
            .unwrap_or(false),
    };
    Ok(Rollout { namespace, name, spec, status })
}

/// Every listed Rollout must parse; one unreadable object fails the whole list.
pub fn rollouts_from_list(items: &[DynamicObject]) -> TrafficResult<Vec<Rollout>> {
    items.iter().map(rollout_from_dynamic).collect()
}

/// Fully scaled and every replica available.
pub fn is_saturated(rs: &ReplicaSet) -> bool {
    let spec_replicas = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let available = rs.status.as_ref().and_then(|s| s.available_replicas).unwrap_or(0);
    let desired_matches = rs
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DESIRED_REPLICAS_ANNOTATION))
        .map(|d| d.parse::<i32>().ok() == Some(spec_replicas))
        .unwrap_or(true);
    desired_matches && available == spec_replicas
}

/// `None` for ReplicaSets without a (non-empty) version label.
pub fn backend_from_replica_set(rs: &ReplicaSet, key: &str) -> Option<BackendVersion> {
    let version = rs.metadata.labels.as_ref()?.get(key).filter(|v| !v.is_empty())?.clone();
    Some(BackendVersion { name: rs.metadata.name.clone().unwrap_or_default(), version, saturated: is_saturated(rs) })
}
