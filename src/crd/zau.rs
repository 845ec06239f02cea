use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ZoneAwareUpdate drives a rolling update of a StatefulSet one zone at
/// a time, deleting pods in exponentially growing batches.
///
/// The target StatefulSet must use the `OnDelete` update strategy: the
/// controller owns the deletion schedule, the StatefulSet controller
/// recreates the deleted pods from the new revision.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "zoneguard.io",
    version = "v1",
    kind = "ZoneAwareUpdate",
    namespaced,
    status = "ZoneAwareUpdateStatus",
    shortname = "zau",
    printcolumn = r#"{"name":"StatefulSet", "type":"string", "jsonPath":".spec.statefulset"}"#,
    printcolumn = r#"{"name":"Step", "type":"integer", "jsonPath":".status.updateStep"}"#,
    printcolumn = r#"{"name":"Paused", "type":"boolean", "jsonPath":".status.pausedRollout"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ZoneAwareUpdateSpec {
    /// Name of the target StatefulSet, in the same namespace.
    pub statefulset: String,

    /// Maximum number of pods deleted in a single step. Absolute number
    /// or percentage of the StatefulSet's replicas (rounded up).
    #[serde(rename = "maxUnavailable", skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Growth factor of the per-step batch size, as a decimal string.
    /// "0" disables ramping (every step uses maxUnavailable), "1"
    /// updates one pod at a time.
    #[serde(rename = "exponentialFactor", default = "default_exponential_factor")]
    pub exponential_factor: String,

    /// Name of a CloudWatch composite alarm that pauses the rollout
    /// while in ALARM state.
    #[serde(rename = "pauseRolloutAlarm", skip_serializing_if = "Option::is_none")]
    pub pause_rollout_alarm: Option<String>,

    /// Proceed with deletions even while the pause alarm is firing.
    #[serde(rename = "ignoreAlarm", default)]
    pub ignore_alarm: bool,

    /// When true the controller computes and publishes the schedule but
    /// never deletes pods.
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
}

fn default_exponential_factor() -> String {
    "2.0".to_string()
}

/// Observed rollout progress of a ZoneAwareUpdate.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ZoneAwareUpdateStatus {
    /// Rollout step counter. Zero while no rollout is in progress; each
    /// deletion batch increments it.
    #[serde(rename = "updateStep", default)]
    pub update_step: i32,

    /// Number of pods deleted in the last step.
    #[serde(rename = "deletedReplicas", default)]
    pub deleted_replicas: i32,

    /// Number of pods still on an old revision, per zone.
    #[serde(
        rename = "oldReplicas",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub old_replicas: BTreeMap<String, i32>,

    /// Target revision of the rollout this status describes. A revision
    /// change resets the step counter.
    #[serde(
        rename = "updateRevision",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub update_revision: String,

    /// The StatefulSet's current revision at the last reconcile.
    #[serde(
        rename = "currentRevision",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub current_revision: String,

    /// True while the rollout is paused by the configured alarm.
    #[serde(rename = "pausedRollout", default)]
    pub paused_rollout: bool,
}

#[cfg(test)]
#[path = "zau_test.rs"]
mod tests;
