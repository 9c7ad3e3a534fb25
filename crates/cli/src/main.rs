use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use switchyard_core::{find_active, BackendVersion, RoutingTarget, TrafficConfig};
use switchyard_kubehub::{watch_services, KubeCluster};
use switchyard_traffic::{get_preview_and_active, owners_of, switch_selector, ClusterOps, ServiceEventRouter, TrafficReconciler};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "switchyardctl", version, about = "Blue-green Service cutover")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace
    #[arg(long = "ns", global = true, env = "SWITCHYARD_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Selector key that carries the version hash
    #[arg(long = "selector-key", global = true, env = "SWITCHYARD_SELECTOR_KEY")]
    selector_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PhaseArg { Preview, Active, All }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show which rollout owns a Service as its active target
    Owners {
        service: String,
    },
    /// Show the ReplicaSet a rollout has promoted
    Active {
        rollout: String,
    },
    /// Set the version selector of a Service (empty value deselects)
    Switch {
        service: String,
        value: String,
    },
    /// Run one reconciliation pass for a rollout against a new version
    Reconcile {
        rollout: String,
        /// Version hash of the new ReplicaSet
        #[arg(long = "new-version")]
        version: String,
        /// Treat the new version as saturated instead of reading ReplicaSet status
        #[arg(long = "assume-saturated", action = ArgAction::SetTrue)]
        assume_saturated: bool,
        #[arg(long = "phase", value_enum, default_value_t = PhaseArg::All)]
        phase: PhaseArg,
    },
    /// Watch Services and print the rollouts their changes would enqueue
    Watch,
}

fn init_tracing() {
    let env = std::env::var("SWITCHYARD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SWITCHYARD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SWITCHYARD_METRICS_ADDR; expected host:port");
        }
    }
}

fn print<T: Serialize>(output: Output, value: &T, human: impl FnOnce()) -> Result<()> {
    match output {
        Output::Human => human(),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn selector_col(t: Option<&RoutingTarget>, key: &str) -> String {
    match t.and_then(|t| t.selector_value(key)) {
        Some("") => "\"\"".to_string(),
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

async fn new_version(cluster: &KubeCluster, ns: &str, rollout: &str, version: &str, assume_saturated: bool) -> Result<BackendVersion> {
    if assume_saturated {
        return Ok(BackendVersion { name: format!("{}-{}", rollout, version), version: version.to_string(), saturated: true });
    }
    let all = cluster.list_backend_versions(ns, Some(rollout)).await?;
    all.into_iter()
        .find(|b| b.version == version)
        .ok_or_else(|| anyhow!("no ReplicaSet of rollout {}/{} carries version {}", ns, rollout, version))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = TrafficConfig::from_env();
    if let Some(k) = cli.selector_key.clone() {
        config = config.with_selector_key(k);
    }
    let key = config.selector_key.clone();
    let ns = cli.namespace.as_str();
    let cluster = Arc::new(KubeCluster::try_default(config.clone()).await?);

    match cli.command {
        Commands::Owners { service } => {
            info!(ns = %ns, service = %service, "owners invoked");
            let svc = cluster.get_service(ns, &service).await?;
            match owners_of(&cluster, &svc).await {
                Ok(owners) => {
                    let names: Vec<String> = owners.iter().map(|r| r.name.clone()).collect();
                    print(cli.output, &names, || {
                        if names.is_empty() {
                            println!("{}/{} is not managed by any rollout", ns, service);
                        } else {
                            println!("{}/{} <- {}", ns, service, names.join(", "));
                        }
                    })?;
                }
                Err(e) => {
                    error!(error = %e, "owners failed");
                    eprintln!("owners error: {}", e);
                }
            }
        }
        Commands::Active { rollout } => {
            info!(ns = %ns, rollout = %rollout, "active invoked");
            let r = cluster.get_rollout(ns, &rollout).await?;
            let candidates = cluster.list_backend_versions(ns, Some(&rollout)).await?;
            let found = find_active(&r, candidates.iter().map(Some));
            print(cli.output, &found, || match found {
                Some(b) => println!("{} ({}) saturated={}", b.name, b.version, b.saturated),
                None if r.status.active_selector.is_empty() => println!("nothing promoted yet"),
                None => println!("promoted version {} not found among ReplicaSets", r.status.active_selector),
            })?;
        }
        Commands::Switch { service, value } => {
            info!(ns = %ns, service = %service, value = %value, "switch invoked");
            let svc = cluster.get_service(ns, &service).await?;
            switch_selector(&cluster, &key, &svc, &value, None).await?;
            let after = cluster.get_service(ns, &service).await?;
            print(cli.output, &after, || println!("{}/{} {}={}", ns, service, key, selector_col(Some(&after), &key)))?;
        }
        Commands::Reconcile { rollout, version, assume_saturated, phase } => {
            info!(ns = %ns, rollout = %rollout, version = %version, ?phase, "reconcile invoked");
            let r = cluster.get_rollout(ns, &rollout).await?;
            let nv = new_version(&cluster, ns, &rollout, &version, assume_saturated).await?;
            let rec = TrafficReconciler::new(cluster.clone(), config.clone());

            #[derive(Serialize)]
            struct Row { preview_changed: bool, active_changed: bool, preview: String, active: String }

            let (preview_changed, active_changed) = match phase {
                PhaseArg::All => {
                    let out = rec.reconcile_pass(&r, &nv).await?;
                    (out.preview_changed, out.active_changed)
                }
                PhaseArg::Preview => {
                    let pair = get_preview_and_active(&cluster, &r).await?;
                    (rec.reconcile_preview(&r, &nv, pair.preview.as_ref(), &pair.active).await?, false)
                }
                PhaseArg::Active => {
                    let pair = get_preview_and_active(&cluster, &r).await?;
                    (false, rec.reconcile_active(&r, &nv, pair.preview.as_ref(), &pair.active).await?)
                }
            };
            if !nv.saturated {
                warn!(rollout = %rollout, version = %version, "new version not saturated; traffic left in place");
            }
            let pair = get_preview_and_active(&cluster, &r).await?;
            let row = Row {
                preview_changed,
                active_changed,
                preview: selector_col(pair.preview.as_ref(), &key),
                active: selector_col(Some(&pair.active), &key),
            };
            print(cli.output, &row, || {
                println!("PHASE     CHANGED  SELECTOR");
                println!("{:<9} {:<8} {}", "preview", row.preview_changed, row.preview);
                println!("{:<9} {:<8} {}", "active", row.active_changed, row.active);
            })?;
        }
        Commands::Watch => {
            info!(ns = %ns, "watch invoked");
            let cap = std::env::var("SWITCHYARD_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(1024);
            let (tx, mut rx) = mpsc::channel(cap);
            let watcher_handle = tokio::spawn({
                let client = cluster.client();
                let router = ServiceEventRouter::new(cluster.clone(), tx);
                let ns = ns.to_string();
                async move {
                    if let Err(e) = watch_services(client, Some(&ns), &router).await {
                        error!(error = ?e, "watcher failed");
                    }
                }
            });
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(key) => println!("enqueue {}", key),
                            None => {
                                warn!("queue closed; exiting watch loop");
                                break;
                            }
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }
            watcher_handle.abort();
        }
    }

    Ok(())
}
