use crate::controller::workload::{expected_scale, selector_is_empty, selector_matches};
use crate::controller::{Context, ReconcileError};
use crate::crd::ZoneDisruptionBudget;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::status::compute_status;

/// Periodic requeue. Also the cadence at which node-label drift is
/// picked up, since nodes are not watched directly.
const ZDB_REQUEUE_INTERVAL: Duration = Duration::from_secs(30);

/// Reconcile a ZoneDisruptionBudget
///
/// Recomputes the per-zone health counters and the allowed-disruption
/// budget from the currently observed pods, ages out stale
/// `disruptedPods` entries, and writes the status subresource when it
/// changed.
pub async fn reconcile_zdb(
    zdb: Arc<ZoneDisruptionBudget>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let namespace = zdb.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let name = zdb.name_any();

    debug!(zdb = %name, namespace = %namespace, "Reconciling ZoneDisruptionBudget");

    let pods = list_selected_pods(&ctx, &namespace, &zdb).await?;
    let expected_total = expected_scale(&ctx.client, &namespace, &pods).await?;
    let zone_pods = ctx.pod_zones.zone_pods_map(&pods).await;

    let new_status = compute_status(&zdb, &pods, &zone_pods, expected_total, ctx.clock.now())
        .map_err(ReconcileError::InvalidSpec)?;

    if zdb.status.as_ref() != Some(&new_status) {
        info!(
            zdb = %name,
            zones = zone_pods.len(),
            expected_total = expected_total,
            "Updating ZoneDisruptionBudget status"
        );

        // Full status replace: the maps omit empty entries on the wire,
        // so a merge patch could never clear a drained disruptedPods map
        // or drop a zone that no longer exists. The carried
        // resourceVersion turns a concurrent webhook write into a 409,
        // which the error policy retries.
        let mut updated = (*zdb).clone();
        updated.status = Some(new_status.clone());
        let api: Api<ZoneDisruptionBudget> = Api::namespaced(ctx.client.clone(), &namespace);
        api.replace_status(&name, &PostParams::default(), serde_json::to_vec(&updated)?)
            .await?;
    }

    if let Some(metrics) = &ctx.metrics {
        metrics.publish_zdb_status(&namespace, &name, zdb.spec.dry_run, &new_status);
    }

    Ok(Action::requeue(ZDB_REQUEUE_INTERVAL))
}

/// List the pods selected by the budget. An empty selector selects
/// nothing rather than everything in the namespace.
async fn list_selected_pods(
    ctx: &Context,
    namespace: &str,
    zdb: &ZoneDisruptionBudget,
) -> Result<Vec<Pod>, ReconcileError> {
    if selector_is_empty(&zdb.spec.selector) {
        return Ok(Vec::new());
    }

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let list = pods.list(&ListParams::default()).await?;

    Ok(list
        .items
        .into_iter()
        .filter(|pod| selector_matches(&zdb.spec.selector, pod.labels()))
        .collect())
}
