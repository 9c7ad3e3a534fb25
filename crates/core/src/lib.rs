//! Switchyard core types
//!
//! Plain data shapes for the objects the cutover logic reasons about. None of
//! these types talk to a cluster; `switchyard-kubehub` converts live objects
//! into them and `switchyard-traffic` drives the state machine over them.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;

pub use config::TrafficConfig;
pub use error::{Phase, TrafficError, TrafficResult};

/// Label carried by every ReplicaSet a rollout owns; Services select on it.
pub const DEFAULT_SELECTOR_KEY: &str = "rollouts-pod-template-hash";

pub mod prelude {
    pub use super::{
        current_selector, find_active, BackendVersion, BlueGreenSpec, Rollout, RolloutKey,
        RolloutStatus, RoutingTarget, TrafficConfig, TrafficError, TrafficResult,
    };
}

/// `namespace/name` identity of a rollout, used when enqueueing work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RolloutKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for RolloutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenSpec {
    /// Service that receives production traffic. Required.
    pub active_service: String,
    /// Service used to inspect the new version before promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_service: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    /// Version identifier currently promoted; empty until the first promotion.
    #[serde(default)]
    pub active_selector: String,
    #[serde(default)]
    pub verifying_preview: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollout {
    pub namespace: String,
    pub name: String,
    pub spec: BlueGreenSpec,
    #[serde(default)]
    pub status: RolloutStatus,
}

impl Rollout {
    pub fn key(&self) -> RolloutKey {
        RolloutKey { namespace: self.namespace.clone(), name: self.name.clone() }
    }

    /// Configured preview Service name. An empty name counts as unset.
    pub fn preview_service(&self) -> Option<&str> {
        self.spec.preview_service.as_deref().filter(|s| !s.is_empty())
    }
}

/// A deployable unit (ReplicaSet) tagged with its pod template hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendVersion {
    pub name: String,
    /// Version identifier; never empty for a real ReplicaSet.
    pub version: String,
    /// Fully rolled out and available. Computed by the caller.
    pub saturated: bool,
}

/// A live Service as far as cutover cares: its identity and selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTarget {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// `None` when the Service has no selector map at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,
}

impl RoutingTarget {
    /// Raw value stored under `key`, if the map and the key exist.
    pub fn selector_value(&self, key: &str) -> Option<&str> {
        self.selector.as_ref()?.get(key).map(String::as_str)
    }

    /// Version currently selected. Absent key and empty value both mean
    /// the Service selects nothing.
    pub fn selected_version(&self, key: &str) -> Option<&str> {
        self.selector_value(key).filter(|v| !v.is_empty())
    }

    pub fn is_idle(&self, key: &str) -> bool {
        self.selected_version(key).is_none()
    }

    pub fn selects(&self, key: &str, version: &str) -> bool {
        self.selected_version(key) == Some(version)
    }
}

/// Current version selected by an optional target.
pub fn current_selector<'a>(target: Option<&'a RoutingTarget>, key: &str) -> Option<&'a str> {
    target?.selected_version(key)
}

/// Find the ReplicaSet the rollout last promoted.
///
/// Returns `None` when nothing has been promoted yet or when the promoted
/// version is no longer among `candidates`. Missing entries are skipped.
pub fn find_active<'a, I>(rollout: &Rollout, candidates: I) -> Option<&'a BackendVersion>
where
    I: IntoIterator<Item = Option<&'a BackendVersion>>,
{
    let promoted = rollout.status.active_selector.as_str();
    if promoted.is_empty() {
        return None;
    }
    candidates.into_iter().flatten().find(|rs| rs.version == promoted)
}
