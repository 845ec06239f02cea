//! Pod eviction admission gate
//!
//! Synchronously admits or denies `CREATE pods/eviction` requests from
//! the per-zone counters of the governing ZoneDisruptionBudget. Only an
//! admitted eviction decrements the budget; the ZDB reconciler never
//! increments counters directly, it recomputes them from observed state.
//!
//! The decision logic follows the upstream eviction API: check the
//! budget, decrement and record the disruption intent in a single status
//! write, retry on write conflicts.

use crate::controller::podzone::TOPOLOGY_ZONE_LABEL;
use crate::controller::workload::{is_pod_ready, is_terminating, zdb_for_pod};
use crate::crd::ZoneDisruptionBudget;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::Eviction;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{DeleteOptions, Time};
use kube::api::{Api, DynamicObject, PostParams};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::ResourceExt;
use std::time::Duration;
use tracing::{error, info, warn};

use super::health::ServerState;

/// Webhook path registered for `CREATE pods/eviction`.
pub const EVICTION_WEBHOOK_PATH: &str = "/pod-eviction-v1";

/// Same cap the upstream eviction handler puts on the disrupted-pod map.
pub const MAX_DISRUPTED_PODS: usize = 2000;

/// Conflict-retry profile: constant base delay with jitter, bounded
/// attempts. Status-write conflicts are short-lived races with the
/// reconciler or a concurrent eviction, not congestion.
const EVICTION_RETRY_STEPS: u32 = 20;
const EVICTION_RETRY_DELAY_MS: u64 = 500;
const EVICTION_RETRY_JITTER: f64 = 0.1;

/// Why a budget check refused the eviction.
#[derive(Debug, PartialEq, Eq)]
pub enum DenialReason {
    /// The reconciler has not caught up with a spec change.
    StaleGeneration,
    /// The pod's zone could not be resolved.
    ZoneUnresolved,
    /// `disruptionsAllowed` went negative; the budget state is corrupt.
    NegativeAllowance,
    /// Too many admitted evictions are waiting for the reconciler.
    TooManyDisruptions,
    /// The zone's budget is exhausted (or another zone is unhealthy).
    BudgetExhausted,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::StaleGeneration => {
                write!(f, "observed generation is behind the budget generation")
            }
            DenialReason::ZoneUnresolved => write!(f, "pod zone could not be resolved"),
            DenialReason::NegativeAllowance => write!(f, "allowed disruptions is negative"),
            DenialReason::TooManyDisruptions => {
                write!(f, "too many evictions not yet confirmed by the reconciler")
            }
            DenialReason::BudgetExhausted => {
                write!(f, "eviction would violate the zone disruption budget")
            }
        }
    }
}

/// Axum handler for the eviction webhook.
pub async fn handle_eviction(
    State(state): State<ServerState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse eviction admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let (response, reason) = decide(&state, &req).await;
    state.metrics.publish_eviction(response.allowed, reason);
    Json(response.into_review())
}

async fn decide(
    state: &ServerState,
    req: &AdmissionRequest<DynamicObject>,
) -> (AdmissionResponse, &'static str) {
    let allow = || AdmissionResponse::from(req);

    if req.operation != Operation::Create {
        return (allow(), "NotCreateOperation");
    }
    if req.sub_resource.as_deref() != Some("eviction") {
        return (allow(), "NotEvictionSubresource");
    }

    let client_dry_run = match req.object.as_ref().map(eviction_dry_run) {
        Some(Ok(dry_run)) => dry_run,
        Some(Err(msg)) => {
            error!(pod = %req.name, error = %msg, "Failed to decode eviction payload");
            return (AdmissionResponse::invalid(msg), "MalformedEviction");
        }
        None => false,
    };

    let namespace = req.namespace.clone().unwrap_or_default();
    let pods: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    let pod = match pods.get(&req.name).await {
        Ok(pod) => pod,
        Err(e) => {
            warn!(pod = %req.name, namespace = %namespace, error = %e, "Unable to fetch pod");
            if client_dry_run {
                return (allow(), "DryRun");
            }
            return (
                allow().deny(format!("unable to fetch pod {}: {}", req.name, e)),
                "GetPodError",
            );
        }
    };
    let pod_name = pod.name_any();

    // A terminal or already-terminating pod has caused its disruption
    // already; evicting it is a plain delete.
    if is_terminal(&pod) || is_terminating(&pod) {
        return (allow(), "TerminalPod");
    }

    // An unready pod does not count toward healthy, so nothing to decrement.
    if !is_pod_ready(&pod) {
        info!(pod = %pod_name, "Pod is not ready, no budget to check");
        return (allow(), "NotReadyPod");
    }

    let zdb = match zdb_for_pod(&state.client, &pod).await {
        Ok(Some(zdb)) => zdb,
        Ok(None) => {
            return (allow(), "NoZdb");
        }
        Err(e) => {
            warn!(pod = %pod_name, error = %e, "Failed to look up ZoneDisruptionBudget");
            if client_dry_run {
                return (allow(), "DryRun");
            }
            return (
                allow().deny(format!("unable to resolve budget for {pod_name}: {e}")),
                "GetZdbError",
            );
        }
    };

    let dry_run = client_dry_run || zdb.spec.dry_run;

    if zdb
        .status
        .as_ref()
        .map(|s| s.disrupted_pods.contains_key(&pod_name))
        .unwrap_or(false)
    {
        info!(pod = %pod_name, zdb = %zdb.name_any(), "Disruption already recorded");
        return (allow(), "AlreadyDisrupted");
    }

    // The zone does not change across retries; resolve it once but keep
    // the staleness check ahead of it in the decision order.
    let zone = pod_zone_direct(&state.client, &pod).await;

    match check_decrement_persist(state, zdb, &pod_name, zone.as_deref(), dry_run).await {
        Ok(()) => (allow(), "DisruptionAllowed"),
        Err(reason_msg) => {
            warn!(pod = %pod_name, reason = %reason_msg, "Denying pod eviction");
            if dry_run {
                info!(pod = %pod_name, "Dry run enabled, allowing eviction");
                return (allow(), "DryRun");
            }
            (
                allow().deny(format!("denying pod eviction for {pod_name}")),
                "DeniedByZdb",
            )
        }
    }
}

/// Run the budget check under the conflict-retry loop and persist the
/// decrement. Returns Err with a loggable reason when the eviction must
/// not proceed.
async fn check_decrement_persist(
    state: &ServerState,
    mut zdb: ZoneDisruptionBudget,
    pod_name: &str,
    zone: Option<&str>,
    dry_run: bool,
) -> Result<(), String> {
    let namespace = zdb.namespace().unwrap_or_default();
    let zdb_name = zdb.name_any();
    let api: Api<ZoneDisruptionBudget> = Api::namespaced(state.client.clone(), &namespace);

    for attempt in 0..EVICTION_RETRY_STEPS {
        let mutated = check_and_decrement(&mut zdb, pod_name, zone, dry_run, state.clock.now())
            .map_err(|reason| reason.to_string())?;

        if !mutated {
            // Dry run: evaluated, nothing to persist.
            return Ok(());
        }

        let payload =
            serde_json::to_vec(&zdb).map_err(|e| format!("status serialization failed: {e}"))?;
        match api
            .replace_status(&zdb_name, &PostParams::default(), payload)
            .await
        {
            Ok(_) => {
                info!(
                    zdb = %zdb_name,
                    pod = %pod_name,
                    attempt = attempt,
                    "Recorded disruption and decremented zone budget"
                );
                return Ok(());
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                tokio::time::sleep(retry_delay()).await;
                zdb = api
                    .get(&zdb_name)
                    .await
                    .map_err(|e| format!("failed to re-read budget after conflict: {e}"))?;
            }
            Err(e) => return Err(format!("status update failed: {e}")),
        }
    }

    Err("conflict retries exhausted".to_string())
}

/// One pass of the budget check. Mutates the status in place when the
/// eviction is admitted and not a dry run; the caller persists it.
///
/// Returns Ok(true) when the mutation must be written, Ok(false) for an
/// admitted dry run.
pub fn check_and_decrement(
    zdb: &mut ZoneDisruptionBudget,
    pod_name: &str,
    zone: Option<&str>,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<bool, DenialReason> {
    let generation = zdb.metadata.generation.unwrap_or(0);
    let status = zdb.status.get_or_insert_with(Default::default);

    if status.observed_generation < generation {
        return Err(DenialReason::StaleGeneration);
    }

    let zone = zone.ok_or(DenialReason::ZoneUnresolved)?;
    let allowed = status.disruptions_allowed.get(zone).copied().unwrap_or(0);

    if allowed < 0 {
        return Err(DenialReason::NegativeAllowance);
    }
    if status.disrupted_pods.len() > MAX_DISRUPTED_PODS {
        return Err(DenialReason::TooManyDisruptions);
    }
    if allowed == 0 {
        return Err(DenialReason::BudgetExhausted);
    }

    if dry_run {
        return Ok(false);
    }

    status.disruptions_allowed.insert(zone.to_string(), allowed - 1);
    status.disrupted_pods.insert(pod_name.to_string(), Time(now));
    Ok(true)
}

/// Extract the client-side dry-run flag from the eviction payload.
///
/// The `policy/v1` shape is tried first; the `policy/v1beta1` payload
/// carries `deleteOptions` at the same path, so a raw lookup covers it.
pub fn eviction_dry_run(object: &DynamicObject) -> Result<bool, String> {
    let value =
        serde_json::to_value(object).map_err(|e| format!("eviction payload not serializable: {e}"))?;
    if let Ok(eviction) = serde_json::from_value::<Eviction>(value) {
        return Ok(is_dry_run(eviction.delete_options.as_ref()));
    }

    match object.data.get("deleteOptions") {
        None => Ok(false),
        Some(options) => {
            let options: DeleteOptions = serde_json::from_value(options.clone())
                .map_err(|e| format!("malformed deleteOptions: {e}"))?;
            Ok(is_dry_run(Some(&options)))
        }
    }
}

fn is_dry_run(options: Option<&DeleteOptions>) -> bool {
    options
        .and_then(|o| o.dry_run.as_ref())
        .map(|targets| !targets.is_empty())
        .unwrap_or(false)
}

/// True for phases whose eviction carries no budget impact.
pub fn is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed") | Some("Pending")
    )
}

/// Direct node-label lookup. The webhook deliberately skips the TTL
/// cache: admitting an eviction on possibly hours-old zone data would
/// decrement the wrong bucket.
async fn pod_zone_direct(client: &kube::Client, pod: &Pod) -> Option<String> {
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.as_deref())?;
    let nodes: Api<Node> = Api::all(client.clone());
    let node = match nodes.get(node_name).await {
        Ok(node) => node,
        Err(e) => {
            warn!(pod = %pod.name_any(), node = %node_name, error = %e, "Unable to fetch node for zone lookup");
            return None;
        }
    };
    node.labels().get(TOPOLOGY_ZONE_LABEL).cloned()
}

fn retry_delay() -> Duration {
    let jitter = 1.0 + EVICTION_RETRY_JITTER * rand::random::<f64>();
    Duration::from_millis((EVICTION_RETRY_DELAY_MS as f64 * jitter) as u64)
}

#[cfg(test)]
#[path = "eviction_test.rs"]
mod tests;
