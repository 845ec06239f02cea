//! Prometheus metrics for the controllers and the eviction webhook
//!
//! Gauges are refreshed on every reconcile from the freshly computed
//! status; the eviction counter is incremented per admission decision.
//! The registry is encoded on `/metrics` in text format.

use crate::crd::{ZoneAwareUpdateStatus, ZoneDisruptionBudgetStatus};
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Shared handle to the process-wide metrics registry.
pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,

    zdb_current_healthy: IntGaugeVec,
    zdb_current_unhealthy: IntGaugeVec,
    zdb_zones_unhealthy: IntGaugeVec,
    zdb_desired_healthy: IntGaugeVec,
    zdb_expected_pods: IntGaugeVec,
    zdb_disruptions_allowed: IntGaugeVec,
    zdb_dryrun_enabled: IntGaugeVec,
    zdb_eviction_status: IntCounterVec,

    zau_update_step: IntGaugeVec,
    zau_deleted_replicas: IntGaugeVec,
    zau_old_replicas: IntGaugeVec,
    zau_dryrun_enabled: IntGaugeVec,
    zau_paused_rollout: IntGaugeVec,
}

/// Create the metrics registry with all collector families registered.
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    let registry = Registry::new();

    let zdb_labels = &["namespace", "zdb"];
    let zdb_zone_labels = &["namespace", "zdb", "zone"];
    let zau_labels = &["namespace", "zau"];
    let zau_zone_labels = &["namespace", "zau", "zone"];

    let zdb_current_healthy = IntGaugeVec::new(
        Opts::new("zdb_status_current_healthy", "Current number of healthy pods"),
        zdb_zone_labels,
    )?;
    let zdb_current_unhealthy = IntGaugeVec::new(
        Opts::new("zdb_status_current_unhealthy", "Current number of unhealthy pods"),
        zdb_zone_labels,
    )?;
    let zdb_zones_unhealthy = IntGaugeVec::new(
        Opts::new("zdb_status_zones_unhealthy", "Current number of unhealthy zones"),
        zdb_labels,
    )?;
    let zdb_desired_healthy = IntGaugeVec::new(
        Opts::new("zdb_status_desired_healthy", "Minimum desired number of healthy pods"),
        zdb_zone_labels,
    )?;
    let zdb_expected_pods = IntGaugeVec::new(
        Opts::new(
            "zdb_status_expected_pods",
            "Total number of pods counted by this disruption budget",
        ),
        zdb_zone_labels,
    )?;
    let zdb_disruptions_allowed = IntGaugeVec::new(
        Opts::new(
            "zdb_status_disruptions_allowed",
            "Number of pod disruptions that are currently allowed",
        ),
        zdb_zone_labels,
    )?;
    let zdb_dryrun_enabled = IntGaugeVec::new(
        Opts::new("zdb_dryrun_enabled", "Whether dryRun is enabled for the budget"),
        zdb_labels,
    )?;
    let zdb_eviction_status = IntCounterVec::new(
        Opts::new(
            "zdb_eviction_status_reason",
            "Eviction admission decisions by status and reason",
        ),
        &["status", "reason"],
    )?;

    let zau_update_step = IntGaugeVec::new(
        Opts::new(
            "zau_status_update_step",
            "Rollout step; zero when all pods are on the new revision",
        ),
        zau_labels,
    )?;
    let zau_deleted_replicas = IntGaugeVec::new(
        Opts::new("zau_status_deleted_replicas", "Number of pods deleted in the last step"),
        zau_labels,
    )?;
    let zau_old_replicas = IntGaugeVec::new(
        Opts::new("zau_status_old_replicas", "Number of pods on an old revision"),
        zau_zone_labels,
    )?;
    let zau_dryrun_enabled = IntGaugeVec::new(
        Opts::new("zau_dryrun_enabled", "Whether dryRun is enabled for the update"),
        zau_labels,
    )?;
    let zau_paused_rollout = IntGaugeVec::new(
        Opts::new("zau_paused_rollout", "Whether the rollout is paused"),
        zau_labels,
    )?;

    registry.register(Box::new(zdb_current_healthy.clone()))?;
    registry.register(Box::new(zdb_current_unhealthy.clone()))?;
    registry.register(Box::new(zdb_zones_unhealthy.clone()))?;
    registry.register(Box::new(zdb_desired_healthy.clone()))?;
    registry.register(Box::new(zdb_expected_pods.clone()))?;
    registry.register(Box::new(zdb_disruptions_allowed.clone()))?;
    registry.register(Box::new(zdb_dryrun_enabled.clone()))?;
    registry.register(Box::new(zdb_eviction_status.clone()))?;
    registry.register(Box::new(zau_update_step.clone()))?;
    registry.register(Box::new(zau_deleted_replicas.clone()))?;
    registry.register(Box::new(zau_old_replicas.clone()))?;
    registry.register(Box::new(zau_dryrun_enabled.clone()))?;
    registry.register(Box::new(zau_paused_rollout.clone()))?;

    Ok(Arc::new(ControllerMetrics {
        registry,
        zdb_current_healthy,
        zdb_current_unhealthy,
        zdb_zones_unhealthy,
        zdb_desired_healthy,
        zdb_expected_pods,
        zdb_disruptions_allowed,
        zdb_dryrun_enabled,
        zdb_eviction_status,
        zau_update_step,
        zau_deleted_replicas,
        zau_old_replicas,
        zau_dryrun_enabled,
        zau_paused_rollout,
    }))
}

impl ControllerMetrics {
    /// Encode all registered families in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
    }

    pub fn publish_zdb_status(
        &self,
        namespace: &str,
        name: &str,
        dry_run: bool,
        status: &ZoneDisruptionBudgetStatus,
    ) {
        for (zone, value) in &status.current_healthy {
            self.zdb_current_healthy
                .with_label_values(&[namespace, name, zone])
                .set(*value as i64);
        }

        let mut zones_with_unhealthy = 0;
        for (zone, value) in &status.current_unhealthy {
            if *value > 0 {
                zones_with_unhealthy += 1;
            }
            self.zdb_current_unhealthy
                .with_label_values(&[namespace, name, zone])
                .set(*value as i64);
        }
        self.zdb_zones_unhealthy
            .with_label_values(&[namespace, name])
            .set(zones_with_unhealthy);

        for (zone, value) in &status.desired_healthy {
            self.zdb_desired_healthy
                .with_label_values(&[namespace, name, zone])
                .set(*value as i64);
        }
        for (zone, value) in &status.expected_pods {
            self.zdb_expected_pods
                .with_label_values(&[namespace, name, zone])
                .set(*value as i64);
        }
        for (zone, value) in &status.disruptions_allowed {
            self.zdb_disruptions_allowed
                .with_label_values(&[namespace, name, zone])
                .set(*value as i64);
        }

        self.zdb_dryrun_enabled
            .with_label_values(&[namespace, name])
            .set(dry_run as i64);
    }

    pub fn publish_eviction(&self, allowed: bool, reason: &str) {
        let status = if allowed { "allowed" } else { "denied" };
        self.zdb_eviction_status
            .with_label_values(&[status, reason])
            .inc();
    }

    pub fn publish_zau_status(
        &self,
        namespace: &str,
        name: &str,
        dry_run: bool,
        status: &ZoneAwareUpdateStatus,
    ) {
        self.zau_update_step
            .with_label_values(&[namespace, name])
            .set(status.update_step as i64);
        self.zau_deleted_replicas
            .with_label_values(&[namespace, name])
            .set(status.deleted_replicas as i64);

        for (zone, value) in &status.old_replicas {
            self.zau_old_replicas
                .with_label_values(&[namespace, name, zone])
                .set(*value as i64);
        }

        self.zau_dryrun_enabled
            .with_label_values(&[namespace, name])
            .set(dry_run as i64);
        self.zau_paused_rollout
            .with_label_values(&[namespace, name])
            .set(status.paused_rollout as i64);
    }
}
