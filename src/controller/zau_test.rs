use super::finder::{find_zau_for_pod, find_zau_for_statefulset};
use super::reconcile::{
    choose_targets, has_unready_new_revision_pod, has_unready_old_pod_outside_zone,
    old_replica_counts,
};
use super::schedule::max_pods_to_delete;
use super::status::next_status;
use crate::controller::workload::REVISION_HASH_LABEL;
use crate::crd::zau::{ZoneAwareUpdate, ZoneAwareUpdateSpec, ZoneAwareUpdateStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;

const ZONES: [&str; 3] = ["us-east-1a", "us-east-1b", "us-east-1c"];
const OLD_REVISION: &str = "db-5f6d7c8b9";
const UPDATE_REVISION: &str = "db-7d5b8c4f6";

fn make_pod(ordinal: i32, revision: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("db-{ordinal}")),
            namespace: Some("default".to_string()),
            labels: Some([(REVISION_HASH_LABEL.to_string(), revision.to_string())].into()),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "StatefulSet".to_string(),
                name: "db".to_string(),
                uid: "db-uid".to_string(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(if ready { "Running" } else { "Pending" }.to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Nine pods round-robin across three zones:
///   us-east-1a: [db-0, db-3, db-6]
///   us-east-1b: [db-1, db-4, db-7]
///   us-east-1c: [db-2, db-5, db-8]
fn make_pods() -> Vec<Pod> {
    (0..9).map(|i| make_pod(i, OLD_REVISION, true)).collect()
}

fn bucket<'a>(pods: &'a [Pod]) -> BTreeMap<String, Vec<&'a Pod>> {
    let mut map: BTreeMap<String, Vec<&Pod>> = BTreeMap::new();
    for (i, pod) in pods.iter().enumerate() {
        map.entry(ZONES[i % 3].to_string()).or_default().push(pod);
    }
    map
}

fn set_revision(pod: &mut Pod, revision: &str) {
    pod.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(REVISION_HASH_LABEL.to_string(), revision.to_string());
}

// === max_pods_to_delete ===

#[test]
fn test_max_pods_to_delete() {
    struct Case {
        name: &'static str,
        max_unavailable: i32,
        update_step: i32,
        exponential_factor: &'static str,
        result: i32,
    }
    let cases = [
        Case { name: "step 0", max_unavailable: 10, update_step: 0, exponential_factor: "2.0", result: 1 },
        Case { name: "step 1", max_unavailable: 10, update_step: 1, exponential_factor: "2.0", result: 2 },
        Case { name: "step 2", max_unavailable: 10, update_step: 2, exponential_factor: "2.0", result: 4 },
        Case { name: "step 4", max_unavailable: 10, update_step: 4, exponential_factor: "2.0", result: 10 },
        Case { name: "step 62", max_unavailable: 10, update_step: 62, exponential_factor: "2.0", result: 10 },
        Case { name: "step 63 saturates", max_unavailable: 10, update_step: 63, exponential_factor: "2.0", result: 10 },
        Case { name: "factor 1 updates one by one", max_unavailable: 10, update_step: 2, exponential_factor: "1.0", result: 1 },
        Case { name: "factor 0 disables the ramp", max_unavailable: 10, update_step: 8, exponential_factor: "0", result: 10 },
    ];

    for case in cases {
        let got = max_pods_to_delete(case.max_unavailable, case.update_step, case.exponential_factor)
            .unwrap_or_else(|e| panic!("{}: unexpected error {e}", case.name));
        assert_eq!(got, case.result, "{}", case.name);
    }
}

#[test]
fn test_max_pods_to_delete_is_monotonic_up_to_the_cap() {
    let mut last = 0;
    for step in 0..70 {
        let batch = max_pods_to_delete(10, step, "2.0").unwrap();
        assert!(batch >= last, "batch must not shrink at step {step}");
        assert!(batch <= 10, "batch must stay capped at step {step}");
        last = batch;
    }
    assert_eq!(last, 10);
}

#[test]
fn test_max_pods_to_delete_rejects_malformed_factor() {
    assert!(max_pods_to_delete(10, 1, "fast").is_err());
    assert!(max_pods_to_delete(10, 1, "-2.0").is_err());
    assert!(max_pods_to_delete(10, 1, "").is_err());
}

// === target selection ===

#[test]
fn test_first_step_deletes_last_pod_of_first_zone() {
    let pods = make_pods();
    let zone_pods = bucket(&pods);
    let counts = old_replica_counts(&zone_pods, UPDATE_REVISION);

    assert_eq!(counts.values().copied().collect::<Vec<_>>(), vec![3, 3, 3]);

    let active = counts.iter().find(|(_, c)| **c > 0).map(|(z, _)| z).unwrap();
    assert_eq!(active, "us-east-1a");

    let batch = max_pods_to_delete(2, 0, "2.0").unwrap();
    let targets = choose_targets(&zone_pods[active], UPDATE_REVISION, batch as usize);

    let names: Vec<_> = targets.iter().map(|p| p.metadata.name.clone().unwrap()).collect();
    assert_eq!(names, vec!["db-6"], "highest ordinal in the first zone goes first");
}

#[test]
fn test_second_step_deletes_two_remaining_old_pods() {
    let mut pods = make_pods();
    set_revision(&mut pods[6], UPDATE_REVISION); // db-6 already updated
    let zone_pods = bucket(&pods);
    let counts = old_replica_counts(&zone_pods, UPDATE_REVISION);

    assert_eq!(counts["us-east-1a"], 2);

    let batch = max_pods_to_delete(2, 1, "2.0").unwrap();
    assert_eq!(batch, 2);

    let targets = choose_targets(&zone_pods["us-east-1a"], UPDATE_REVISION, batch as usize);
    let names: Vec<_> = targets.iter().map(|p| p.metadata.name.clone().unwrap()).collect();
    assert_eq!(names, vec!["db-3", "db-0"], "descending ordinals");
}

#[test]
fn test_batch_clamped_to_remaining_old_pods() {
    let mut pods = make_pods();
    set_revision(&mut pods[6], UPDATE_REVISION);
    set_revision(&mut pods[3], UPDATE_REVISION);
    let zone_pods = bucket(&pods);

    let targets = choose_targets(&zone_pods["us-east-1a"], UPDATE_REVISION, 2);
    let names: Vec<_> = targets.iter().map(|p| p.metadata.name.clone().unwrap()).collect();
    assert_eq!(names, vec!["db-0"], "only one old pod left in the zone");
}

#[test]
fn test_zone_advance_after_first_zone_completes() {
    let mut pods = make_pods();
    for i in [0, 3, 6] {
        set_revision(&mut pods[i], UPDATE_REVISION);
    }
    let zone_pods = bucket(&pods);
    let counts = old_replica_counts(&zone_pods, UPDATE_REVISION);

    assert_eq!(counts["us-east-1a"], 0);
    let active = counts.iter().find(|(_, c)| **c > 0).map(|(z, _)| z).unwrap();
    assert_eq!(active, "us-east-1b");

    let batch = max_pods_to_delete(2, 2, "2.0").unwrap();
    assert_eq!(batch, 2, "2^2 capped at maxUnavailable");

    let targets = choose_targets(&zone_pods[active], UPDATE_REVISION, batch as usize);
    let names: Vec<_> = targets.iter().map(|p| p.metadata.name.clone().unwrap()).collect();
    assert_eq!(names, vec!["db-7", "db-4"]);
}

#[test]
fn test_unready_old_pod_in_active_zone_is_sole_target() {
    let mut pods = make_pods();
    pods[0] = make_pod(0, OLD_REVISION, false); // db-0 unready in us-east-1a
    let zone_pods = bucket(&pods);

    let targets = choose_targets(&zone_pods["us-east-1a"], UPDATE_REVISION, 2);
    let names: Vec<_> = targets.iter().map(|p| p.metadata.name.clone().unwrap()).collect();
    assert_eq!(
        names,
        vec!["db-0"],
        "an unready old pod is replaced first, alone, regardless of the batch"
    );
}

// === health gates ===

#[test]
fn test_unready_new_revision_pod_detected() {
    let mut pods = make_pods();
    pods[4] = make_pod(4, UPDATE_REVISION, false);

    assert!(has_unready_new_revision_pod(&pods, UPDATE_REVISION));

    pods[4] = make_pod(4, UPDATE_REVISION, true);
    assert!(!has_unready_new_revision_pod(&pods, UPDATE_REVISION));
}

#[test]
fn test_unready_old_pod_outside_active_zone_detected() {
    let mut pods = make_pods();
    pods[4] = make_pod(4, OLD_REVISION, false); // us-east-1b
    let zone_pods = bucket(&pods);

    assert!(has_unready_old_pod_outside_zone(
        &zone_pods,
        "us-east-1a",
        UPDATE_REVISION
    ));
    assert!(
        !has_unready_old_pod_outside_zone(&zone_pods, "us-east-1b", UPDATE_REVISION),
        "the damaged zone itself is not 'outside'"
    );
}

#[test]
fn test_ready_population_passes_health_gates() {
    let pods = make_pods();
    let zone_pods = bucket(&pods);

    assert!(!has_unready_new_revision_pod(&pods, UPDATE_REVISION));
    assert!(!has_unready_old_pod_outside_zone(
        &zone_pods,
        "us-east-1a",
        UPDATE_REVISION
    ));
}

// === status bookkeeping ===

#[test]
fn test_next_status_zeroes_completed_zones() {
    let mut prev = ZoneAwareUpdateStatus::default();
    prev.old_replicas.insert("zone-1".to_string(), 2);
    prev.old_replicas.insert("zone-2".to_string(), 2);

    let mut counts = BTreeMap::new();
    counts.insert("zone-2".to_string(), 1);

    let status = next_status(Some(&prev), 1, 1, &counts, UPDATE_REVISION, OLD_REVISION, false);

    assert_eq!(status.old_replicas.get("zone-1"), Some(&0));
    assert_eq!(status.old_replicas.get("zone-2"), Some(&1));
}

#[test]
fn test_next_status_includes_new_zones() {
    let mut prev = ZoneAwareUpdateStatus::default();
    prev.old_replicas.insert("zone-1".to_string(), 2);

    let mut counts = BTreeMap::new();
    counts.insert("zone-1".to_string(), 3);
    counts.insert("zone-2".to_string(), 1);

    let status = next_status(Some(&prev), 1, 1, &counts, UPDATE_REVISION, OLD_REVISION, false);

    assert_eq!(status.old_replicas.get("zone-1"), Some(&3));
    assert_eq!(status.old_replicas.get("zone-2"), Some(&1));
}

#[test]
fn test_next_status_records_step_and_revisions() {
    let counts = BTreeMap::new();
    let status = next_status(None, 3, 2, &counts, UPDATE_REVISION, OLD_REVISION, false);

    assert_eq!(status.update_step, 3);
    assert_eq!(status.deleted_replicas, 2);
    assert_eq!(status.update_revision, UPDATE_REVISION);
    assert_eq!(status.current_revision, OLD_REVISION);
    assert!(!status.paused_rollout);
    assert!(status.old_replicas.is_empty());
}

// === finders ===

fn make_zau(name: &str, statefulset: &str, namespace: &str) -> Arc<ZoneAwareUpdate> {
    let mut zau = ZoneAwareUpdate::new(
        name,
        ZoneAwareUpdateSpec {
            statefulset: statefulset.to_string(),
            max_unavailable: None,
            exponential_factor: "2.0".to_string(),
            pause_rollout_alarm: None,
            ignore_alarm: false,
            dry_run: false,
        },
    );
    zau.metadata.namespace = Some(namespace.to_string());
    Arc::new(zau)
}

#[test]
fn test_find_zau_for_pod_follows_owner_chain() {
    let zaus = vec![
        make_zau("db-zau", "db", "default"),
        make_zau("other-zau", "other", "default"),
        make_zau("staging-zau", "db", "staging"),
    ];

    let pod = make_pod(0, OLD_REVISION, true);
    let refs = find_zau_for_pod(&zaus, &pod);

    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].name, "db-zau");
}

#[test]
fn test_find_zau_for_pod_without_statefulset_owner() {
    let zaus = vec![make_zau("db-zau", "db", "default")];

    let mut pod = make_pod(0, OLD_REVISION, true);
    pod.metadata.owner_references = None;

    assert!(find_zau_for_pod(&zaus, &pod).is_empty());
}

#[test]
fn test_find_zau_for_statefulset_matches_by_name() {
    let zaus = vec![
        make_zau("db-zau", "db", "default"),
        make_zau("other-zau", "other", "default"),
    ];

    let set = StatefulSet {
        metadata: ObjectMeta {
            name: Some("db".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let refs = find_zau_for_statefulset(&zaus, &set);
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].name, "db-zau");

    let unmanaged = StatefulSet {
        metadata: ObjectMeta {
            name: Some("cache".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(find_zau_for_statefulset(&zaus, &unmanaged).is_empty());
}
