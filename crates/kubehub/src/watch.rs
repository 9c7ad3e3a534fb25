use std::collections::{HashMap, HashSet};

use anyhow::Result;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::Api,
    runtime::watcher::{self, Event},
    Client,
};
use metrics::counter;
use switchyard_core::RoutingTarget;
use switchyard_traffic::{ClusterOps, ServiceEventRouter};
use tracing::{debug, info, warn};

use crate::convert::target_from_service;

/// Last-seen Service copies so watch events can be delivered as add or
/// old/new update pairs.
#[derive(Default)]
pub(crate) struct SeenServices {
    by_key: HashMap<(String, String), RoutingTarget>,
}

impl SeenServices {
    /// Remember `cur` and return the copy it replaces.
    pub(crate) fn observe(&mut self, cur: RoutingTarget) -> Option<RoutingTarget> {
        self.by_key.insert((cur.namespace.clone(), cur.name.clone()), cur)
    }

    pub(crate) fn forget(&mut self, gone: &RoutingTarget) {
        self.by_key.remove(&(gone.namespace.clone(), gone.name.clone()));
    }

    /// Drop every copy not present in a fresh listing.
    pub(crate) fn retain_listed<'a>(&mut self, listed: impl IntoIterator<Item = &'a RoutingTarget>) {
        let live: HashSet<(&str, &str)> = listed.into_iter().map(|t| (t.namespace.as_str(), t.name.as_str())).collect();
        self.by_key.retain(|(ns, name), _| live.contains(&(ns.as_str(), name.as_str())));
    }
}

async fn deliver<C: ClusterOps>(router: &ServiceEventRouter<C>, seen: &mut SeenServices, svc: &Service) {
    let cur = match target_from_service(svc) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable service");
            return;
        }
    };
    counter!("switchyard_service_events_total", 1u64);
    match seen.observe(cur.clone()) {
        Some(old) => {
            router.on_update(&old, &cur).await;
        }
        None => {
            router.on_add(&cur).await;
        }
    }
}

/// List+watch Services (optionally in one namespace) and route every change to
/// its owning rollout through `router`. Returns when the stream ends.
pub async fn watch_services<C: ClusterOps>(
    client: Client,
    namespace: Option<&str>,
    router: &ServiceEventRouter<C>,
) -> Result<()> {
    let api: Api<Service> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let stream = watcher::watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);
    info!(ns = ?namespace, "service watcher started");
    let mut seen = SeenServices::default();
    while let Some(ev) = stream.try_next().await? {
        match ev {
            Event::Applied(svc) => deliver(router, &mut seen, &svc).await,
            Event::Deleted(svc) => {
                if let Ok(t) = target_from_service(&svc) {
                    seen.forget(&t);
                }
            }
            Event::Restarted(list) => {
                debug!(count = list.len(), "watch restart");
                let listed: Vec<RoutingTarget> = list.iter().filter_map(|s| target_from_service(s).ok()).collect();
                seen.retain_listed(&listed);
                for svc in list.iter() {
                    deliver(router, &mut seen, svc).await;
                }
            }
        }
    }
    warn!("service watcher stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, rv: &str) -> RoutingTarget {
        RoutingTarget { namespace: "ns".into(), name: name.into(), resource_version: Some(rv.into()), selector: None }
    }

    #[test]
    fn observe_returns_previous_copy() {
        let mut seen = SeenServices::default();
        assert!(seen.observe(target("a", "1")).is_none());
        let old = seen.observe(target("a", "2")).expect("previous");
        assert_eq!(old.resource_version.as_deref(), Some("1"));
        seen.forget(&target("a", "2"));
        assert!(seen.observe(target("a", "3")).is_none());
    }

    #[test]
    fn restart_listing_drops_services_deleted_while_disconnected() {
        let mut seen = SeenServices::default();
        seen.observe(target("kept", "1"));
        seen.observe(target("gone", "1"));
        seen.retain_listed(&[target("kept", "2")]);

        let old = seen.observe(target("kept", "2")).expect("kept copy");
        assert_eq!(old.resource_version.as_deref(), Some("1"));
        assert!(seen.observe(target("gone", "5")).is_none());
    }
}
