pub mod alarm;
pub mod clock;
pub mod podzone;
pub mod workload;
pub mod zau;
pub mod zdb;

use crate::controller::alarm::{AlarmError, AlarmStateProvider};
use crate::controller::clock::Clock;
use crate::controller::podzone::PodZoneHelper;
use crate::server::SharedMetrics;
use std::sync::Arc;
use thiserror::Error;

pub use zau::reconcile_zau;
pub use zdb::reconcile_zdb;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("object missing namespace")]
    MissingNamespace,

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("alarm state lookup failed: {0}")]
    AlarmError(#[from] AlarmError),

    #[error("status serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Shared state handed to both reconcilers.
///
/// The pod→zone cache and the metrics registry are the only
/// process-wide singletons; both live here and are passed by reference.
pub struct Context {
    pub client: kube::Client,
    pub pod_zones: PodZoneHelper,
    pub alarms: Arc<dyn AlarmStateProvider>,
    pub clock: Arc<dyn Clock>,
    /// Optional controller metrics for Prometheus.
    /// When Some, per-object gauges are refreshed on every reconcile.
    pub metrics: Option<SharedMetrics>,
}

impl Context {
    pub fn new(
        client: kube::Client,
        alarms: Arc<dyn AlarmStateProvider>,
        clock: Arc<dyn Clock>,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        Context {
            pod_zones: PodZoneHelper::new(client.clone()),
            client,
            alarms,
            clock,
            metrics,
        }
    }

}
