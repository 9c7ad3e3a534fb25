//! Blue-green cutover state machine.
//!
//! A pass runs two phases, preview then active. Each phase first plans a single
//! action from the observed Services ([`plan_preview`], [`plan_active`]) and then
//! applies it. Every action is one single-key patch (plus, at most, one status
//! write before it), so a pass interrupted halfway leaves a state the next pass
//! can pick up from. Repeated passes converge to a fixed point where both plans
//! return [`Hold`].

use metrics::counter;
use serde::{Deserialize, Serialize};
use switchyard_core::{BackendVersion, Phase, Rollout, RoutingTarget, TrafficConfig, TrafficResult};
use tracing::{debug, info};

use crate::fetch::get_preview_and_active;
use crate::patcher::switch_selector;
use crate::ClusterOps;

/// Why a phase left everything as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hold {
    /// Rollout has no preview Service.
    NoPreview,
    /// New version is not fully available yet; keep progressing.
    NotSaturated,
    /// Active Service has no selector; nothing to preview against.
    ActiveUnset,
    /// Preview already selects nothing.
    PreviewIdle,
    /// Preview already selects the new version.
    PreviewVerifying,
    /// Active already serves the new version and preview is idle.
    Promoted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewAction {
    Hold(Hold),
    /// Point preview at nothing.
    Deselect,
    /// Enter verifying preview, then point preview at `version`.
    Verify { version: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveAction {
    Hold(Hold),
    /// Point active at `version`.
    Promote { version: String },
    /// Post-promotion teardown of the preview Service.
    DeselectPreview,
}

/// Decide what the preview Service should do next.
pub fn plan_preview(
    key: &str,
    new_version: &BackendVersion,
    preview: Option<&RoutingTarget>,
    active: &RoutingTarget,
) -> PreviewAction {
    let Some(preview) = preview else {
        return PreviewAction::Hold(Hold::NoPreview);
    };
    if !new_version.saturated {
        return PreviewAction::Hold(Hold::NotSaturated);
    }
    if active.selector.is_none() {
        return PreviewAction::Hold(Hold::ActiveUnset);
    }
    let cur_active = active.selected_version(key);
    if cur_active.is_none() || cur_active == Some(new_version.version.as_str()) {
        return if preview.is_idle(key) { PreviewAction::Hold(Hold::PreviewIdle) } else { PreviewAction::Deselect };
    }
    if preview.selects(key, &new_version.version) {
        return PreviewAction::Hold(Hold::PreviewVerifying);
    }
    PreviewAction::Verify { version: new_version.version.clone() }
}

/// Decide what the active Service should do next.
pub fn plan_active(
    key: &str,
    new_version: &BackendVersion,
    preview: Option<&RoutingTarget>,
    active: &RoutingTarget,
) -> ActiveAction {
    if !new_version.saturated {
        return ActiveAction::Hold(Hold::NotSaturated);
    }
    if !active.selects(key, &new_version.version) {
        return ActiveAction::Promote { version: new_version.version.clone() };
    }
    match preview {
        Some(p) if !p.is_idle(key) => ActiveAction::DeselectPreview,
        _ => ActiveAction::Hold(Hold::Promoted),
    }
}

/// What a full pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassOutcome {
    pub preview_changed: bool,
    pub active_changed: bool,
}

impl PassOutcome {
    pub fn changed(&self) -> bool {
        self.preview_changed || self.active_changed
    }
}

/// Drives the preview and active Services of one rollout at a time.
#[derive(Debug, Clone)]
pub struct TrafficReconciler<C> {
    ops: C,
    config: TrafficConfig,
}

impl<C: ClusterOps> TrafficReconciler<C> {
    pub fn new(ops: C, config: TrafficConfig) -> Self {
        Self { ops, config }
    }

    pub fn ops(&self) -> &C {
        &self.ops
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    /// Phase A. Returns whether a mutation was issued.
    pub async fn reconcile_preview(
        &self,
        rollout: &Rollout,
        new_version: &BackendVersion,
        preview: Option<&RoutingTarget>,
        active: &RoutingTarget,
    ) -> TrafficResult<bool> {
        let action = plan_preview(&self.config.selector_key, new_version, preview, active);
        let changed = self.apply_preview(rollout, preview, action).await.map_err(|e| e.in_phase(Phase::Preview))?;
        if changed {
            counter!("switchyard_reconcile_changed_total", 1u64, "phase" => "preview");
        }
        Ok(changed)
    }

    async fn apply_preview(
        &self,
        rollout: &Rollout,
        preview: Option<&RoutingTarget>,
        action: PreviewAction,
    ) -> TrafficResult<bool> {
        let key = self.config.selector_key.as_str();
        let rk = rollout.key();
        match (action, preview) {
            (PreviewAction::Hold(Hold::NotSaturated), _) => {
                info!(rollout = %rk, "new replicaset is not fully saturated");
                Ok(false)
            }
            (PreviewAction::Hold(reason), _) => {
                debug!(rollout = %rk, ?reason, "preview unchanged");
                Ok(false)
            }
            (PreviewAction::Deselect, Some(svc)) => {
                switch_selector(&self.ops, key, svc, "", Some(&rk)).await?;
                Ok(true)
            }
            (PreviewAction::Verify { version }, Some(svc)) => {
                // Status transition precedes the selector flip.
                self.ops.mark_verifying_preview(rollout).await?;
                switch_selector(&self.ops, key, svc, &version, Some(&rk)).await?;
                Ok(true)
            }
            (_, None) => Ok(false),
        }
    }

    /// Phase B. Never promotes an unsaturated version.
    pub async fn reconcile_active(
        &self,
        rollout: &Rollout,
        new_version: &BackendVersion,
        preview: Option<&RoutingTarget>,
        active: &RoutingTarget,
    ) -> TrafficResult<bool> {
        let action = plan_active(&self.config.selector_key, new_version, preview, active);
        let changed =
            self.apply_active(rollout, preview, active, action).await.map_err(|e| e.in_phase(Phase::Active))?;
        if changed {
            counter!("switchyard_reconcile_changed_total", 1u64, "phase" => "active");
        }
        Ok(changed)
    }

    async fn apply_active(
        &self,
        rollout: &Rollout,
        preview: Option<&RoutingTarget>,
        active: &RoutingTarget,
        action: ActiveAction,
    ) -> TrafficResult<bool> {
        let key = self.config.selector_key.as_str();
        let rk = rollout.key();
        match action {
            ActiveAction::Hold(reason) => {
                debug!(rollout = %rk, ?reason, "active unchanged");
                Ok(false)
            }
            ActiveAction::Promote { version } => {
                if rollout.status.active_selector != version {
                    self.ops.record_active_selector(rollout, &version).await?;
                }
                switch_selector(&self.ops, key, active, &version, Some(&rk)).await?;
                Ok(true)
            }
            ActiveAction::DeselectPreview => match preview {
                Some(svc) => {
                    switch_selector(&self.ops, key, svc, "", Some(&rk)).await?;
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// One pass: fetch, then the preview phase. The active phase only runs
    /// when the preview phase changed nothing, so a freshly verified preview
    /// is left for inspection until the next pass.
    pub async fn reconcile_pass(&self, rollout: &Rollout, new_version: &BackendVersion) -> TrafficResult<PassOutcome> {
        let pair = get_preview_and_active(&self.ops, rollout).await.map_err(|e| e.in_phase(Phase::Fetch))?;
        if self.reconcile_preview(rollout, new_version, pair.preview.as_ref(), &pair.active).await? {
            return Ok(PassOutcome { preview_changed: true, active_changed: false });
        }
        let active_changed = self.reconcile_active(rollout, new_version, pair.preview.as_ref(), &pair.active).await?;
        Ok(PassOutcome { preview_changed: false, active_changed })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const KEY: &str = "rollouts-pod-template-hash";

    fn svc(name: &str, value: Option<&str>) -> RoutingTarget {
        RoutingTarget {
            namespace: "ns".into(),
            name: name.into(),
            resource_version: None,
            selector: value.map(|v| BTreeMap::from([(KEY.to_string(), v.to_string())])),
        }
    }

    fn version(v: &str, saturated: bool) -> BackendVersion {
        BackendVersion { name: format!("app-{v}"), version: v.into(), saturated }
    }

    #[test]
    fn preview_plan_table() {
        let v2 = version("v2", true);
        let cases = [
            (None, svc("active", Some("v1")), PreviewAction::Hold(Hold::NoPreview)),
            (Some(svc("preview", Some(""))), svc("active", None), PreviewAction::Hold(Hold::ActiveUnset)),
            (Some(svc("preview", Some(""))), svc("active", Some("v1")), PreviewAction::Verify { version: "v2".into() }),
            (Some(svc("preview", Some("v2"))), svc("active", Some("v1")), PreviewAction::Hold(Hold::PreviewVerifying)),
            (Some(svc("preview", Some("v1"))), svc("active", Some("v1")), PreviewAction::Verify { version: "v2".into() }),
            (Some(svc("preview", Some("v2"))), svc("active", Some("v2")), PreviewAction::Deselect),
            (Some(svc("preview", Some(""))), svc("active", Some("v2")), PreviewAction::Hold(Hold::PreviewIdle)),
            (Some(svc("preview", None)), svc("active", Some("")), PreviewAction::Hold(Hold::PreviewIdle)),
            (Some(svc("preview", Some("v1"))), svc("active", Some("")), PreviewAction::Deselect),
        ];
        for (i, (preview, active, want)) in cases.into_iter().enumerate() {
            assert_eq!(plan_preview(KEY, &v2, preview.as_ref(), &active), want, "case {}", i);
        }
    }

    #[test]
    fn preview_waits_for_saturation() {
        let p = svc("preview", Some(""));
        let a = svc("active", Some("v1"));
        assert_eq!(plan_preview(KEY, &version("v2", false), Some(&p), &a), PreviewAction::Hold(Hold::NotSaturated));
    }

    #[test]
    fn active_key_missing_from_existing_map_means_idle_active() {
        let p = svc("preview", Some("v2"));
        let a = RoutingTarget {
            namespace: "ns".into(),
            name: "active".into(),
            resource_version: None,
            selector: Some(BTreeMap::from([("app".to_string(), "guestbook".to_string())])),
        };
        assert_eq!(plan_preview(KEY, &version("v2", true), Some(&p), &a), PreviewAction::Deselect);
    }

    #[test]
    fn active_plan_table() {
        let v2 = version("v2", true);
        assert_eq!(
            plan_active(KEY, &v2, None, &svc("active", Some("v1"))),
            ActiveAction::Promote { version: "v2".into() }
        );
        assert_eq!(plan_active(KEY, &v2, None, &svc("active", None)), ActiveAction::Promote { version: "v2".into() });
        assert_eq!(
            plan_active(KEY, &v2, Some(&svc("preview", Some("v2"))), &svc("active", Some("v2"))),
            ActiveAction::DeselectPreview
        );
        assert_eq!(
            plan_active(KEY, &v2, Some(&svc("preview", Some(""))), &svc("active", Some("v2"))),
            ActiveAction::Hold(Hold::Promoted)
        );
        assert_eq!(plan_active(KEY, &v2, None, &svc("active", Some("v2"))), ActiveAction::Hold(Hold::Promoted));
    }

    #[test]
    fn active_never_promotes_unsaturated() {
        for active in [svc("active", None), svc("active", Some("")), svc("active", Some("v1"))] {
            assert_eq!(
                plan_active(KEY, &version("v2", false), Some(&svc("preview", Some("v2"))), &active),
                ActiveAction::Hold(Hold::NotSaturated)
            );
        }
    }

    #[test]
    fn pass_outcome_changed() {
        assert!(!PassOutcome::default().changed());
        assert!(PassOutcome { preview_changed: false, active_changed: true }.changed());
    }
}
