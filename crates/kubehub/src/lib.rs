//! Switchyard kubehub – kube-rs backing store and Service watcher wiring

#![forbid(unsafe_code)]

use anyhow::anyhow;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use serde_json::json;
use switchyard_core::{BackendVersion, Rollout, RoutingTarget, TrafficConfig, TrafficError, TrafficResult};
use switchyard_traffic::{selector_patch, ClusterOps};

pub mod convert;
pub mod watch;

pub use convert::{backend_from_replica_set, is_saturated, rollout_from_dynamic, rollouts_from_list, target_from_service};
pub use watch::watch_services;

/// Client for the current kube context.
pub async fn get_kube_client() -> anyhow::Result<Client> {
    Ok(Client::try_default().await?)
}

/// `argoproj.io/v1alpha1` Rollout, addressed dynamically.
pub fn rollout_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("argoproj.io", "v1alpha1", "Rollout"), "rollouts")
}

/// Map a kube error for `kind ns/name` onto the traffic taxonomy: 404 becomes
/// not-found, everything else is passed through as a store error.
pub fn from_kube(kind: &'static str, namespace: &str, name: &str, err: kube::Error) -> TrafficError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => {
            TrafficError::NotFound { kind, namespace: namespace.to_string(), name: name.to_string() }
        }
        other => TrafficError::Store(anyhow::Error::new(other).context(format!("{} {}/{}", kind, namespace, name))),
    }
}

/// [`ClusterOps`] over the API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    config: TrafficConfig,
}

impl KubeCluster {
    pub fn new(client: Client, config: TrafficConfig) -> Self {
        Self { client, config }
    }

    pub async fn try_default(config: TrafficConfig) -> anyhow::Result<Self> {
        Ok(Self::new(get_kube_client().await?, config))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn rollouts(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &rollout_resource())
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn get_rollout(&self, namespace: &str, name: &str) -> TrafficResult<Rollout> {
        let obj = self
            .rollouts(namespace)
            .get_opt(name)
            .await
            .map_err(|e| from_kube("Rollout", namespace, name, e))?
            .ok_or_else(|| TrafficError::NotFound {
                kind: "Rollout",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        rollout_from_dynamic(&obj)
    }

    /// ReplicaSets in `namespace` carrying the version label. `owner` narrows the
    /// list to ReplicaSets owned by that rollout.
    pub async fn list_backend_versions(&self, namespace: &str, owner: Option<&str>) -> TrafficResult<Vec<BackendVersion>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&self.config.selector_key);
        let list = api.list(&lp).await.map_err(|e| from_kube("ReplicaSet", namespace, "", e))?;
        Ok(list
            .items
            .iter()
            .filter(|rs| match owner {
                Some(o) => rs
                    .metadata
                    .owner_references
                    .as_ref()
                    .map(|ors| ors.iter().any(|r| r.kind == "Rollout" && r.name == o))
                    .unwrap_or(false),
                None => true,
            })
            .filter_map(|rs| backend_from_replica_set(rs, &self.config.selector_key))
            .collect())
    }

    async fn patch_rollout_status(&self, rollout: &Rollout, status: serde_json::Value) -> TrafficResult<()> {
        let pp = PatchParams::default();
        self.rollouts(&rollout.namespace)
            .patch_status(&rollout.name, &pp, &Patch::Merge(&json!({ "status": status })))
            .await
            .map_err(|e| from_kube("Rollout", &rollout.namespace, &rollout.name, e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterOps for KubeCluster {
    async fn get_service(&self, namespace: &str, name: &str) -> TrafficResult<RoutingTarget> {
        match self.services(namespace).get_opt(name).await {
            Ok(Some(svc)) => target_from_service(&svc),
            Ok(None) => Err(TrafficError::NotFound {
                kind: "Service",
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(from_kube("Service", namespace, name, e)),
        }
    }

    async fn list_rollouts(&self, namespace: &str) -> TrafficResult<Vec<Rollout>> {
        let list = self
            .rollouts(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| from_kube("Rollout", namespace, "", e))?;
        rollouts_from_list(&list.items)
    }

    async fn patch_selector(&self, target: &RoutingTarget, key: &str, value: &str) -> TrafficResult<()> {
        let pp = PatchParams { field_manager: Some(self.config.field_manager.clone()), ..Default::default() };
        let patch = selector_patch(key, value);
        self.services(&target.namespace)
            .patch(&target.name, &pp, &Patch::Strategic(&patch))
            .await
            .map_err(|e| from_kube("Service", &target.namespace, &target.name, e))?;
        Ok(())
    }

    async fn mark_verifying_preview(&self, rollout: &Rollout) -> TrafficResult<()> {
        let ts = chrono::Utc::now().to_rfc3339();
        self.patch_rollout_status(rollout, json!({ "verifyingPreview": true, "pauseStartTime": ts })).await
    }

    async fn record_active_selector(&self, rollout: &Rollout, value: &str) -> TrafficResult<()> {
        if value.is_empty() {
            return Err(TrafficError::Store(anyhow!("refusing to record an empty active selector")));
        }
        self.patch_rollout_status(rollout, json!({ "activeSelector": value })).await
    }
}
