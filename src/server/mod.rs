//! HTTP server for health, metrics and admission endpoints
//!
//! Provides Kubernetes health probes:
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (controller is ready to serve)
//! - `/metrics` - Prometheus metrics
//! - `/pod-eviction-v1` - Pod eviction admission webhook
//!
//! Also provides graceful shutdown handling for SIGTERM/SIGINT and the
//! self-signed TLS bootstrap for the webhook.

pub mod eviction;
mod health;
pub mod metrics;
pub mod shutdown;
pub mod tls;

pub use eviction::EVICTION_WEBHOOK_PATH;
pub use health::{serve, serve_tls, Readiness, ServerState};
pub use metrics::{create_metrics, SharedMetrics};
pub use shutdown::{await_termination, shutdown_pair, Shutdown, ShutdownHandle};
pub use tls::{ensure_tls, server_tls_config, DEFAULT_TLS_SECRET_NAME};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
