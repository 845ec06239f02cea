use aws_config::BehaviorVersion;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use zoneguard::controller::alarm::CloudWatchAlarmProvider;
use zoneguard::controller::clock::SystemClock;
use zoneguard::controller::zau::{find_zau_for_pod, find_zau_for_statefulset};
use zoneguard::controller::zdb::find_zdbs_for_pod;
use zoneguard::controller::{reconcile_zau, reconcile_zdb, Context, ReconcileError};
use zoneguard::crd::{ZoneAwareUpdate, ZoneDisruptionBudget};
use zoneguard::server::{
    await_termination, create_metrics, ensure_tls, serve, serve_tls, server_tls_config,
    shutdown_pair, Readiness, ServerState, DEFAULT_TLS_SECRET_NAME,
};

/// Default port for health endpoints (HTTP)
const HEALTH_PORT: u16 = 8080;

/// Default port for webhook endpoints (HTTPS)
const WEBHOOK_PORT: u16 = 8443;

/// Which control loops to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSelection {
    pub zdb: bool,
    pub zau: bool,
}

/// Parse the `CONTROLLERS` environment value: a comma-separated subset
/// of {zdb, zau}. Empty or unset starts both; a value with only
/// unrecognized entries starts none.
pub fn parse_controllers(value: Option<&str>) -> ControllerSelection {
    let value = value.map(str::trim).unwrap_or("");
    if value.is_empty() {
        return ControllerSelection { zdb: true, zau: true };
    }

    let mut selection = ControllerSelection {
        zdb: false,
        zau: false,
    };
    for token in value.split(',') {
        match token.trim() {
            "zdb" => selection.zdb = true,
            "zau" => selection.zau = true,
            "" => {}
            other => warn!(controller = %other, "Unrecognized controller in CONTROLLERS, ignoring"),
        }
    }
    selection
}

/// Check if webhook TLS is enabled via env var
fn is_webhook_tls_enabled() -> bool {
    std::env::var("ZONEGUARD_WEBHOOK_TLS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Get webhook service name from env (default: zoneguard-controller)
fn get_webhook_service_name() -> String {
    std::env::var("ZONEGUARD_SERVICE_NAME").unwrap_or_else(|_| "zoneguard-controller".to_string())
}

/// Get controller namespace from env (default: zoneguard-system)
fn get_controller_namespace() -> String {
    std::env::var("ZONEGUARD_NAMESPACE").unwrap_or_else(|_| "zoneguard-system".to_string())
}

/// Error policy for both controllers
///
/// Reconciliation errors are expected (transient API failures, stale
/// caches) and trigger a delayed retry, so this logs at `warn!`.
fn requeue_on_error(error: &ReconcileError) -> Action {
    warn!("Reconcile error (will retry): {:?}", error);
    Action::requeue(Duration::from_secs(10))
}

pub fn zdb_error_policy(
    _zdb: Arc<ZoneDisruptionBudget>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    requeue_on_error(error)
}

pub fn zau_error_policy(
    _zau: Arc<ZoneAwareUpdate>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    requeue_on_error(error)
}

/// Run the ZDB controller: watches budgets plus the pods they select.
async fn run_zdb_controller(client: Client, ctx: Arc<Context>) {
    let zdbs = Api::<ZoneDisruptionBudget>::all(client.clone());
    let controller = Controller::new(zdbs, watcher::Config::default());

    let store = controller.store();
    controller
        .watches(
            Api::<Pod>::all(client),
            watcher::Config::default(),
            move |pod| find_zdbs_for_pod(&store.state(), &pod),
        )
        .run(reconcile_zdb, zdb_error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((zdb, _)) = res {
                info!(zdb = %zdb.name, "Reconciled ZoneDisruptionBudget");
            }
            // Errors are logged in the error policy, no duplicate logging
        })
        .await;
}

/// Run the ZAU controller: watches updates, their target StatefulSets
/// and the pods those own.
async fn run_zau_controller(client: Client, ctx: Arc<Context>) {
    let zaus = Api::<ZoneAwareUpdate>::all(client.clone());
    let controller = Controller::new(zaus, watcher::Config::default());

    let set_store = controller.store();
    let pod_store = controller.store();
    controller
        .watches(
            Api::<StatefulSet>::all(client.clone()),
            watcher::Config::default(),
            move |set| find_zau_for_statefulset(&set_store.state(), &set),
        )
        .watches(
            Api::<Pod>::all(client),
            watcher::Config::default(),
            move |pod| find_zau_for_pod(&pod_store.state(), &pod),
        )
        .run(reconcile_zau, zau_error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((zau, _)) = res {
                info!(zau = %zau.name, "Reconciled ZoneAwareUpdate");
            }
        })
        .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting zoneguard zone-aware controllers");

    // rustls pulls in both the ring and aws-lc-rs backends transitively
    // (the latter via the AWS SDK), so it can no longer auto-select a
    // process-wide default; pin it to the ring provider used elsewhere
    // in this crate (see server::tls).
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (shutdown_handle, shutdown) = shutdown_pair();
    let readiness = Readiness::new();
    let metrics = create_metrics()?;
    let clock = Arc::new(SystemClock);

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // The webhook can only be served over HTTPS; without TLS the server
    // still exposes probes and metrics over plain HTTP.
    let tls_config = if is_webhook_tls_enabled() {
        let service = get_webhook_service_name();
        let namespace = get_controller_namespace();
        info!(service = %service, namespace = %namespace, "Bootstrapping webhook TLS");

        let material = ensure_tls(&client, &service, &namespace, DEFAULT_TLS_SECRET_NAME).await?;
        Some(server_tls_config(&material)?)
    } else {
        info!("Webhook TLS disabled, serving probes over HTTP only");
        None
    };

    let state = ServerState {
        readiness: readiness.clone(),
        metrics: metrics.clone(),
        client: client.clone(),
        clock: clock.clone(),
    };
    let server_handle = match tls_config {
        Some(tls) => {
            let drain = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_tls(WEBHOOK_PORT, state, tls, drain).await {
                    warn!(error = %e, "HTTPS server failed");
                }
            })
        }
        None => {
            let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT))).await?;
            let drain = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = serve(listener, state, drain).await {
                    warn!(error = %e, "HTTP server failed");
                }
            })
        }
    };

    // Composite alarm provider with ambient AWS credentials
    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let alarms = Arc::new(CloudWatchAlarmProvider::new(aws_sdk_cloudwatch::Client::new(
        &aws_config,
    )));

    let ctx = Arc::new(Context::new(
        client.clone(),
        alarms,
        clock,
        Some(metrics.clone()),
    ));

    let selection = parse_controllers(std::env::var("CONTROLLERS").ok().as_deref());
    info!(zdb = selection.zdb, zau = selection.zau, "Controller selection");

    let mut controller_handles = Vec::new();
    if selection.zdb {
        controller_handles.push(tokio::spawn(run_zdb_controller(client.clone(), ctx.clone())));
    }
    if selection.zau {
        controller_handles.push(tokio::spawn(run_zau_controller(client.clone(), ctx.clone())));
    }
    if controller_handles.is_empty() {
        warn!("No recognized controllers selected; serving webhook and probes only");
    }

    readiness.set(true);
    info!("Controllers ready");

    let signal = await_termination().await?;
    info!(signal, "Initiating graceful shutdown");

    // Flip the probe first so the endpoints object drops this pod, then
    // drain the server and stop the control loops.
    readiness.set(false);
    shutdown_handle.trigger();

    for handle in controller_handles {
        handle.abort();
    }
    if tokio::time::timeout(Duration::from_secs(15), server_handle)
        .await
        .is_err()
    {
        warn!("Server did not drain in time, exiting anyway");
    }

    info!("zoneguard shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
