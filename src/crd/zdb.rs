use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ZoneDisruptionBudget bounds how many pods may be voluntarily
/// disrupted at once *within a single availability zone*, and blocks
/// disruptions entirely while another zone is unhealthy.
///
/// Modeled on the PodDisruptionBudget resource, with all counters kept
/// per zone.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "zoneguard.io",
    version = "v1",
    kind = "ZoneDisruptionBudget",
    namespaced,
    status = "ZoneDisruptionBudgetStatus",
    shortname = "zdb",
    printcolumn = r#"{"name":"MaxUnavailable", "type":"string", "jsonPath":".spec.maxUnavailable"}"#,
    printcolumn = r#"{"name":"DryRun", "type":"boolean", "jsonPath":".spec.dryRun"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ZoneDisruptionBudgetSpec {
    /// Label query over the pods managed by this budget.
    ///
    /// An empty selector matches no pods.
    pub selector: LabelSelector,

    /// An eviction is allowed if at most this many selected pods are
    /// unavailable in the pod's zone after the eviction, and no other
    /// zone has unavailable pods. Absolute number or percentage of the
    /// owning workload's replicas (e.g. "10%", rounded up).
    #[serde(rename = "maxUnavailable", skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// When true the eviction webhook evaluates requests against this
    /// budget but never denies or records them.
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
}

/// Observed per-zone state of a ZoneDisruptionBudget.
///
/// All counters are valid only while `observedGeneration` equals the
/// object generation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ZoneDisruptionBudgetStatus {
    /// Most recent generation observed when this status was written.
    #[serde(rename = "observedGeneration", default)]
    pub observed_generation: i64,

    /// Pods whose eviction was admitted by the webhook but not yet
    /// observed by the reconciler as terminating. Keyed by pod name,
    /// valued by the admission timestamp. Entries for pods that never
    /// terminate are aged out by the reconciler.
    #[serde(
        rename = "disruptedPods",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub disrupted_pods: BTreeMap<String, Time>,

    /// Number of pod disruptions currently allowed, per zone.
    #[serde(
        rename = "disruptionsAllowed",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub disruptions_allowed: BTreeMap<String, i32>,

    /// Current number of healthy pods, per zone.
    #[serde(
        rename = "currentHealthy",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub current_healthy: BTreeMap<String, i32>,

    /// Current number of unhealthy pods, per zone.
    #[serde(
        rename = "currentUnhealthy",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub current_unhealthy: BTreeMap<String, i32>,

    /// Minimum desired number of healthy pods, per zone.
    #[serde(
        rename = "desiredHealthy",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub desired_healthy: BTreeMap<String, i32>,

    /// Total number of expected replicas, per zone.
    #[serde(
        rename = "expectedPods",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub expected_pods: BTreeMap<String, i32>,
}

#[cfg(test)]
#[path = "zdb_test.rs"]
mod tests;
