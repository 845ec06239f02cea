use crate::controller::alarm::AlarmState;
use crate::controller::workload::{
    is_running_and_ready, is_terminating, pod_ordinal, pod_revision, resolve_max_unavailable,
};
use crate::controller::{Context, ReconcileError};
use crate::crd::zau::{ZoneAwareUpdate, ZoneAwareUpdateStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::schedule::max_pods_to_delete;
use super::status::next_status;

/// Periodic requeue while nothing needs to happen.
const ZAU_REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// Requeue after issuing a batch, to observe its completion promptly.
const ZAU_BATCH_SETTLE_INTERVAL: Duration = Duration::from_secs(15);

/// Requeue while the rollout is paused by an alarm.
const ZAU_ALARM_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Reconcile a ZoneAwareUpdate
///
/// Computes and applies one step of the zone-sequenced deletion
/// schedule: zones drain in lexicographic order, the batch within the
/// active zone grows exponentially per step, and any sign of damage
/// (terminating pods, unready new-revision pods, unready old pods
/// outside the active zone, a firing pause alarm) holds the schedule.
pub async fn reconcile_zau(
    zau: Arc<ZoneAwareUpdate>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let namespace = zau.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let name = zau.name_any();

    debug!(zau = %name, namespace = %namespace, "Reconciling ZoneAwareUpdate");

    let sets: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &namespace);
    let set = match sets.get(&zau.spec.statefulset).await {
        Ok(set) => set,
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!(zau = %name, statefulset = %zau.spec.statefulset, "Target StatefulSet not found");
            return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL));
        }
        Err(e) => return Err(e.into()),
    };

    // The schedule only matters when the StatefulSet controller leaves
    // deletions to us. Dry-run still simulates the schedule so the
    // update plan can be inspected before switching the strategy over.
    let strategy = set
        .spec
        .as_ref()
        .and_then(|s| s.update_strategy.as_ref())
        .and_then(|s| s.type_.as_deref())
        .unwrap_or("RollingUpdate");
    if strategy != "OnDelete" && !zau.spec.dry_run {
        debug!(zau = %name, strategy = %strategy, "StatefulSet update strategy is not OnDelete, skipping");
        return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL));
    }

    let update_revision = match set.status.as_ref().and_then(|s| s.update_revision.as_deref()) {
        Some(rev) if !rev.is_empty() => rev.to_string(),
        _ => {
            debug!(zau = %name, "StatefulSet has no update revision yet");
            return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL));
        }
    };
    let current_revision = set
        .status
        .as_ref()
        .and_then(|s| s.current_revision.as_deref())
        .unwrap_or("")
        .to_string();

    let pods = list_set_pods(&ctx, &namespace, &set).await?;
    let zone_pods = ctx.pod_zones.zone_pods_map(&pods).await;
    let old_counts = old_replica_counts(&zone_pods, &update_revision);

    if old_counts.values().all(|count| *count == 0) {
        // Rollout complete: every pod carries the update revision.
        let desired = next_status(
            zau.status.as_ref(),
            0,
            0,
            &BTreeMap::new(),
            &update_revision,
            &current_revision,
            false,
        );
        update_status_if_changed(&ctx, &zau, &namespace, &name, desired).await?;
        return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL));
    }

    // Alarm gate. Runs first so a firing alarm shows up in status even
    // while a previous batch is still draining.
    if let Some(alarm_name) = zau.spec.pause_rollout_alarm.as_deref() {
        if !zau.spec.ignore_alarm {
            match ctx.alarms.alarm_state(alarm_name).await {
                Err(e) => {
                    warn!(zau = %name, alarm = %alarm_name, error = %e, "Failed to fetch pause alarm state, pausing rollout");
                    let desired = paused_status(&zau, &old_counts, &current_revision);
                    if let Err(write_err) =
                        update_status_if_changed(&ctx, &zau, &namespace, &name, desired).await
                    {
                        warn!(zau = %name, error = %write_err, "Failed to record paused status");
                    }
                    return Err(e.into());
                }
                Ok(AlarmState::Alarm) => {
                    info!(zau = %name, alarm = %alarm_name, "Pause alarm is firing, holding rollout");
                    let desired = paused_status(&zau, &old_counts, &current_revision);
                    update_status_if_changed(&ctx, &zau, &namespace, &name, desired).await?;
                    return Ok(Action::requeue(ZAU_ALARM_RECHECK_INTERVAL));
                }
                Ok(_) => {}
            }
        }
    }

    // A revision change restarts the ramp.
    let stored_revision = zau
        .status
        .as_ref()
        .map(|s| s.update_revision.as_str())
        .unwrap_or("");
    let update_step = if stored_revision != update_revision {
        0
    } else {
        zau.status.as_ref().map(|s| s.update_step).unwrap_or(0)
    };

    // Wait for the previous batch to finish terminating.
    if pods.iter().any(is_terminating) {
        debug!(zau = %name, "Pods still terminating, waiting");
        return Ok(Action::requeue(ZAU_BATCH_SETTLE_INTERVAL));
    }

    // The upgrade itself may be producing broken pods.
    if has_unready_new_revision_pod(&pods, &update_revision) {
        debug!(zau = %name, "New-revision pod not ready, holding rollout");
        return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL));
    }

    let active_zone = match old_counts
        .iter()
        .find(|(_, count)| **count > 0)
        .map(|(zone, _)| zone.clone())
    {
        Some(zone) => zone,
        None => return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL)),
    };

    // Deleting in the active zone while another zone is damaged would
    // spread the fault across zones.
    if has_unready_old_pod_outside_zone(&zone_pods, &active_zone, &update_revision) {
        debug!(zau = %name, active_zone = %active_zone, "Old-revision pod unready outside the active zone, holding rollout");
        return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL));
    }

    let replicas = set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let max_unavailable = resolve_max_unavailable(zau.spec.max_unavailable.as_ref(), replicas)
        .map_err(ReconcileError::InvalidSpec)?;
    let batch = max_pods_to_delete(max_unavailable, update_step, &zau.spec.exponential_factor)
        .map_err(ReconcileError::InvalidSpec)?;

    let empty = Vec::new();
    let active_pods = zone_pods.get(&active_zone).unwrap_or(&empty);
    let targets = choose_targets(active_pods, &update_revision, batch.max(0) as usize);
    if targets.is_empty() {
        return Ok(Action::requeue(ZAU_REQUEUE_INTERVAL));
    }

    if zau.spec.dry_run {
        info!(
            zau = %name,
            zone = %active_zone,
            step = update_step,
            targets = ?targets.iter().map(|p| p.name_any()).collect::<Vec<_>>(),
            "Dry run, skipping pod deletions"
        );
    } else {
        let pods_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
        for pod in &targets {
            let pod_name = pod.name_any();
            info!(zau = %name, pod = %pod_name, zone = %active_zone, step = update_step, "Deleting pod");
            // Abort the batch on the first failure; the requeue retries
            // with fresh state.
            pods_api.delete(&pod_name, &DeleteParams::default()).await?;
        }
    }

    let desired = next_status(
        zau.status.as_ref(),
        update_step + 1,
        targets.len() as i32,
        &old_counts,
        &update_revision,
        &current_revision,
        false,
    );
    update_status_if_changed(&ctx, &zau, &namespace, &name, desired).await?;

    Ok(Action::requeue(ZAU_BATCH_SETTLE_INTERVAL))
}

/// Old-revision pod counts per zone, zones in lexicographic order.
pub fn old_replica_counts(
    zone_pods: &BTreeMap<String, Vec<&Pod>>,
    update_revision: &str,
) -> BTreeMap<String, i32> {
    zone_pods
        .iter()
        .map(|(zone, pods)| {
            let old = pods
                .iter()
                .filter(|pod| pod_revision(pod) != Some(update_revision))
                .count() as i32;
            (zone.clone(), old)
        })
        .collect()
}

/// True when a pod already on the update revision is not Ready.
pub fn has_unready_new_revision_pod(pods: &[Pod], update_revision: &str) -> bool {
    pods.iter()
        .any(|pod| pod_revision(pod) == Some(update_revision) && !is_running_and_ready(pod))
}

/// True when any zone other than `zone` holds an old-revision pod that
/// is not Ready.
pub fn has_unready_old_pod_outside_zone(
    zone_pods: &BTreeMap<String, Vec<&Pod>>,
    zone: &str,
    update_revision: &str,
) -> bool {
    zone_pods
        .iter()
        .filter(|(z, _)| z.as_str() != zone)
        .flat_map(|(_, pods)| pods.iter())
        .any(|pod| pod_revision(pod) != Some(update_revision) && !is_running_and_ready(pod))
}

/// Pick the deletion targets within the active zone.
///
/// An unready old-revision pod is already breaking its own zone's
/// health, so it becomes the sole target regardless of the batch size
/// (replace it first). Otherwise old-revision pods are taken from the
/// highest ordinal downward: StatefulSets create high ordinals last, so
/// the workload drains from its newest tail.
pub fn choose_targets<'a>(
    zone_pods: &[&'a Pod],
    update_revision: &str,
    batch: usize,
) -> Vec<&'a Pod> {
    let mut old: Vec<&Pod> = zone_pods
        .iter()
        .copied()
        .filter(|pod| pod_revision(pod) != Some(update_revision))
        .collect();

    if let Some(unready) = old.iter().copied().find(|pod| !is_running_and_ready(pod)) {
        return vec![unready];
    }

    old.sort_by_key(|pod| std::cmp::Reverse(pod_ordinal(&pod.name_any()).unwrap_or(-1)));
    old.truncate(batch);
    old
}

/// Status written while the rollout is paused: counters stay where they
/// were, only the old-replica counts and the pause flag move.
fn paused_status(
    zau: &ZoneAwareUpdate,
    old_counts: &BTreeMap<String, i32>,
    current_revision: &str,
) -> ZoneAwareUpdateStatus {
    let prev = zau.status.as_ref();
    next_status(
        prev,
        prev.map(|s| s.update_step).unwrap_or(0),
        prev.map(|s| s.deleted_replicas).unwrap_or(0),
        old_counts,
        prev.map(|s| s.update_revision.as_str()).unwrap_or(""),
        current_revision,
        true,
    )
}

async fn update_status_if_changed(
    ctx: &Context,
    zau: &ZoneAwareUpdate,
    namespace: &str,
    name: &str,
    desired: ZoneAwareUpdateStatus,
) -> Result<(), ReconcileError> {
    if zau.status.as_ref() != Some(&desired) {
        info!(
            zau = %name,
            step = desired.update_step,
            deleted = desired.deleted_replicas,
            paused = desired.paused_rollout,
            "Updating ZoneAwareUpdate status"
        );
        let api: Api<ZoneAwareUpdate> = Api::namespaced(ctx.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({ "status": desired })),
        )
        .await?;
    }

    if let Some(metrics) = &ctx.metrics {
        metrics.publish_zau_status(namespace, name, zau.spec.dry_run, &desired);
    }

    Ok(())
}

/// Pods controlled by the StatefulSet, matched by owner UID.
async fn list_set_pods(
    ctx: &Context,
    namespace: &str,
    set: &StatefulSet,
) -> Result<Vec<Pod>, ReconcileError> {
    let set_uid = set.metadata.uid.as_deref().unwrap_or("");
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let list = pods.list(&ListParams::default()).await?;

    Ok(list
        .items
        .into_iter()
        .filter(|pod| {
            crate::controller::workload::statefulset_owner(pod)
                .map(|owner| owner.uid == set_uid)
                .unwrap_or(false)
        })
        .collect())
}
