//! HTTP surface of the controller
//!
//! One router serves the kubelet probes (`/healthz`, `/readyz`), the
//! Prometheus registry (`/metrics`) and the eviction admission webhook.
//! Probe-only deployments run it over plain HTTP; with the webhook
//! enabled it runs behind rustls, since the API server refuses to call
//! webhooks over HTTP.

use crate::controller::clock::Clock;
use crate::server::eviction::EVICTION_WEBHOOK_PATH;
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::Shutdown;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// How long draining in-flight webhook requests may take on shutdown.
const TLS_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Readiness flag behind the `/readyz` probe.
///
/// Main flips it on once the controllers are running and off again when
/// shutdown starts, so the endpoints object drops the pod before the
/// listener goes away.
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State shared by every route.
#[derive(Clone)]
pub struct ServerState {
    pub readiness: Readiness,
    pub metrics: SharedMetrics,
    pub client: kube::Client,
    pub clock: Arc<dyn Clock>,
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<ServerState>) -> StatusCode {
    if state.readiness.get() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        )
            .into_response(),
    }
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route(EVICTION_WEBHOOK_PATH, post(super::eviction::handle_eviction))
        .with_state(state)
}

/// Serve the router over plain HTTP on an already-bound listener.
///
/// Binding is left to the caller so tests can grab an ephemeral port.
/// Returns after the shutdown notice once in-flight requests drained.
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: Shutdown,
) -> Result<(), std::io::Error> {
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.triggered())
        .await
}

/// Serve the router over HTTPS with the webhook certificate.
pub async fn serve_tls(
    port: u16,
    state: ServerState,
    tls: Arc<rustls::ServerConfig>,
    shutdown: Shutdown,
) -> Result<(), std::io::Error> {
    use axum_server::tls_rustls::RustlsConfig;

    let handle = axum_server::Handle::new();
    let drainer = handle.clone();
    tokio::spawn(async move {
        shutdown.triggered().await;
        drainer.graceful_shutdown(Some(TLS_DRAIN_GRACE));
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "HTTPS server listening");

    axum_server::bind_rustls(addr, RustlsConfig::from_config(tls))
        .handle(handle)
        .serve(router(state).into_make_service())
        .await
}
