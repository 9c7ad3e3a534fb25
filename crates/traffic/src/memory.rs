//! In-RAM backing store implementing [`ClusterOps`].
//!
//! Behaves like the API server for the handful of calls cutover makes: every
//! write bumps a resource version, selector patches merge a single key, and
//! missing objects are reported as not-found. A call journal records the order
//! in which operations reached the store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use switchyard_core::{Rollout, RoutingTarget, TrafficError, TrafficResult};

use crate::ClusterOps;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetService { namespace: String, name: String },
    ListRollouts { namespace: String },
    PatchSelector { service: String, value: String },
    MarkVerifyingPreview { rollout: String },
    RecordActiveSelector { rollout: String, value: String },
}

type ObjKey = (String, String);

#[derive(Default)]
struct State {
    services: BTreeMap<ObjKey, RoutingTarget>,
    rollouts: BTreeMap<ObjKey, Rollout>,
    journal: Vec<Call>,
    rv: u64,
    patch_failure: Option<String>,
    status_failure: Option<String>,
}

impl State {
    fn next_rv(&mut self) -> String {
        self.rv = self.rv.saturating_add(1);
        self.rv.to_string()
    }

    fn rollout_mut(&mut self, rollout: &Rollout) -> TrafficResult<&mut Rollout> {
        if let Some(msg) = self.status_failure.clone() {
            return Err(TrafficError::Store(anyhow!(msg)));
        }
        self.rollouts
            .get_mut(&(rollout.namespace.clone(), rollout.name.clone()))
            .ok_or_else(|| TrafficError::NotFound {
                kind: "Rollout",
                namespace: rollout.namespace.clone(),
                name: rollout.name.clone(),
            })
    }
}

#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or replace a Service and return the stored copy.
    pub fn insert_service(
        &self,
        namespace: &str,
        name: &str,
        selector: Option<BTreeMap<String, String>>,
    ) -> RoutingTarget {
        let mut st = self.lock();
        let rv = st.next_rv();
        let svc = RoutingTarget {
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource_version: Some(rv),
            selector,
        };
        st.services.insert((namespace.to_string(), name.to_string()), svc.clone());
        svc
    }

    pub fn remove_service(&self, namespace: &str, name: &str) -> Option<RoutingTarget> {
        self.lock().services.remove(&(namespace.to_string(), name.to_string()))
    }

    pub fn insert_rollout(&self, rollout: Rollout) {
        let key = (rollout.namespace.clone(), rollout.name.clone());
        self.lock().rollouts.insert(key, rollout);
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<RoutingTarget> {
        self.lock().services.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn rollout(&self, namespace: &str, name: &str) -> Option<Rollout> {
        self.lock().rollouts.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Make every following selector patch fail with `message` (or stop failing on `None`).
    pub fn fail_patches(&self, message: Option<&str>) {
        self.lock().patch_failure = message.map(str::to_string);
    }

    /// Make every following rollout status write fail with `message` (or stop failing on `None`).
    pub fn fail_status_writes(&self, message: Option<&str>) {
        self.lock().status_failure = message.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().journal.clone()
    }

    /// Journal entries that changed state, in order.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::GetService { .. } | Call::ListRollouts { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().journal.clear();
    }
}

#[async_trait::async_trait]
impl ClusterOps for MemoryCluster {
    async fn get_service(&self, namespace: &str, name: &str) -> TrafficResult<RoutingTarget> {
        let mut st = self.lock();
        st.journal.push(Call::GetService { namespace: namespace.to_string(), name: name.to_string() });
        st.services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| TrafficError::NotFound {
                kind: "Service",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn list_rollouts(&self, namespace: &str) -> TrafficResult<Vec<Rollout>> {
        let mut st = self.lock();
        st.journal.push(Call::ListRollouts { namespace: namespace.to_string() });
        Ok(st.rollouts.values().filter(|r| r.namespace == namespace).cloned().collect())
    }

    async fn patch_selector(&self, target: &RoutingTarget, key: &str, value: &str) -> TrafficResult<()> {
        let mut st = self.lock();
        if let Some(msg) = st.patch_failure.clone() {
            return Err(TrafficError::Store(anyhow!(msg)));
        }
        let rv = st.next_rv();
        let svc = st
            .services
            .get_mut(&(target.namespace.clone(), target.name.clone()))
            .ok_or_else(|| TrafficError::NotFound {
                kind: "Service",
                namespace: target.namespace.clone(),
                name: target.name.clone(),
            })?;
        svc.selector.get_or_insert_with(BTreeMap::new).insert(key.to_string(), value.to_string());
        svc.resource_version = Some(rv);
        st.journal.push(Call::PatchSelector { service: target.name.clone(), value: value.to_string() });
        Ok(())
    }

    async fn mark_verifying_preview(&self, rollout: &Rollout) -> TrafficResult<()> {
        let mut st = self.lock();
        st.rollout_mut(rollout)?.status.verifying_preview = true;
        st.journal.push(Call::MarkVerifyingPreview { rollout: rollout.key().to_string() });
        Ok(())
    }

    async fn record_active_selector(&self, rollout: &Rollout, value: &str) -> TrafficResult<()> {
        let mut st = self.lock();
        st.rollout_mut(rollout)?.status.active_selector = value.to_string();
        st.journal.push(Call::RecordActiveSelector { rollout: rollout.key().to_string(), value: value.to_string() });
        Ok(())
    }
}
