//! Per-zone disruption accounting
//!
//! The counters written here are the contract with the eviction
//! webhook: the webhook decrements `disruptionsAllowed` and records
//! pods in `disruptedPods`, the reconciler recomputes everything from
//! observed state, which makes stale webhook entries self-heal.

use crate::controller::workload::{is_running_and_ready, is_terminating, resolve_max_unavailable};
use crate::crd::zdb::{ZoneDisruptionBudget, ZoneDisruptionBudgetStatus};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// How long an admitted eviction may sit in `disruptedPods` before the
/// reconciler assumes the deletion will never happen and drops it.
pub const DISRUPTED_POD_EXPIRY_SECONDS: i64 = 120;

/// Compute the desired ZDB status from a snapshot of the selected pods.
///
/// `pods` is the full selected population (used to age `disruptedPods`);
/// `zone_pods` is the same population bucketed by resolved zone. Pods
/// with no resolvable zone stay out of the buckets and therefore out of
/// the accounting.
pub fn compute_status(
    zdb: &ZoneDisruptionBudget,
    pods: &[Pod],
    zone_pods: &BTreeMap<String, Vec<&Pod>>,
    expected_total: i32,
    now: DateTime<Utc>,
) -> Result<ZoneDisruptionBudgetStatus, String> {
    let max_unavailable =
        resolve_max_unavailable(zdb.spec.max_unavailable.as_ref(), expected_total)?;

    let disrupted_pods = age_disrupted_pods(zdb, pods, now);

    let zone_count = zone_pods.len() as i32;
    let expected_per_zone = if zone_count > 0 {
        expected_total / zone_count
    } else {
        0
    };

    let mut status = ZoneDisruptionBudgetStatus {
        observed_generation: zdb.metadata.generation.unwrap_or(0),
        disrupted_pods,
        ..Default::default()
    };

    let mut disrupted_in_zone: BTreeMap<&str, i32> = BTreeMap::new();
    for (zone, zpods) in zone_pods {
        let healthy = zpods
            .iter()
            .filter(|p| {
                is_running_and_ready(p)
                    && !is_terminating(p)
                    && !status.disrupted_pods.contains_key(&p.name_any())
            })
            .count() as i32;
        let disrupted = zpods
            .iter()
            .filter(|p| status.disrupted_pods.contains_key(&p.name_any()))
            .count() as i32;

        status.expected_pods.insert(zone.clone(), expected_per_zone);
        status.current_healthy.insert(zone.clone(), healthy);
        status
            .current_unhealthy
            .insert(zone.clone(), (expected_per_zone - healthy).max(0));
        status
            .desired_healthy
            .insert(zone.clone(), expected_per_zone - max_unavailable);
        disrupted_in_zone.insert(zone.as_str(), disrupted);
    }

    for zone in zone_pods.keys() {
        let unhealthy_outside: i32 = status
            .current_unhealthy
            .iter()
            .filter(|(z, _)| z.as_str() != zone.as_str())
            .map(|(z, unhealthy)| unhealthy + disrupted_in_zone.get(z.as_str()).unwrap_or(&0))
            .sum();

        let allowed = if expected_total <= 0 {
            // No resolvable owner scale: nothing is known about how many
            // pods should exist, so no disruption is granted.
            0
        } else if unhealthy_outside > 0 {
            // Another zone already has damage or an in-flight eviction;
            // never open a second fault domain.
            0
        } else {
            let unhealthy = status.current_unhealthy.get(zone).copied().unwrap_or(0);
            let disrupted = disrupted_in_zone.get(zone.as_str()).copied().unwrap_or(0);
            (max_unavailable - unhealthy - disrupted).max(0)
        };
        status.disruptions_allowed.insert(zone.clone(), allowed);
    }

    Ok(status)
}

/// Drop `disruptedPods` entries whose eviction has been observed
/// (terminating), whose pod no longer exists, or whose intent timestamp
/// has expired.
fn age_disrupted_pods(
    zdb: &ZoneDisruptionBudget,
    pods: &[Pod],
    now: DateTime<Utc>,
) -> BTreeMap<String, Time> {
    let existing = match &zdb.status {
        Some(status) => &status.disrupted_pods,
        None => return BTreeMap::new(),
    };

    let by_name: BTreeMap<String, &Pod> = pods.iter().map(|p| (p.name_any(), p)).collect();

    existing
        .iter()
        .filter(|(name, recorded)| {
            let pod = match by_name.get(name.as_str()) {
                Some(pod) => pod,
                None => return false,
            };
            if is_terminating(pod) {
                return false;
            }
            now.signed_duration_since(recorded.0).num_seconds() <= DISRUPTED_POD_EXPIRY_SECONDS
        })
        .map(|(name, recorded)| (name.clone(), recorded.clone()))
        .collect()
}
