use super::status::{compute_status, DISRUPTED_POD_EXPIRY_SECONDS};
use crate::crd::zdb::{ZoneDisruptionBudget, ZoneDisruptionBudgetSpec};
use chrono::{Duration, Utc};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

const ZONES: [&str; 3] = ["us-east-1a", "us-east-1b", "us-east-1c"];
const REPLICAS: i32 = 9;

fn make_pod(name: &str, phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
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

fn make_zdb(max_unavailable: IntOrString) -> ZoneDisruptionBudget {
    let mut zdb = ZoneDisruptionBudget::new(
        "test-zdb",
        ZoneDisruptionBudgetSpec {
            selector: LabelSelector {
                match_labels: Some([("app".to_string(), "db".to_string())].into()),
                ..Default::default()
            },
            max_unavailable: Some(max_unavailable),
            dry_run: false,
        },
    );
    zdb.metadata.generation = Some(1);
    zdb
}

/// Nine pods round-robin across three zones, like a StatefulSet with a
/// zone-spread topology constraint:
///   us-east-1a: [db-0, db-3, db-6]
///   us-east-1b: [db-1, db-4, db-7]
///   us-east-1c: [db-2, db-5, db-8]
fn make_pods() -> Vec<Pod> {
    (0..REPLICAS)
        .map(|i| make_pod(&format!("db-{i}"), "Running", true))
        .collect()
}

fn zone_of(ordinal: i32) -> &'static str {
    ZONES[(ordinal % 3) as usize]
}

fn bucket<'a>(pods: &'a [Pod]) -> BTreeMap<String, Vec<&'a Pod>> {
    let mut map: BTreeMap<String, Vec<&Pod>> = BTreeMap::new();
    for (i, pod) in pods.iter().enumerate() {
        map.entry(zone_of(i as i32).to_string()).or_default().push(pod);
    }
    map
}

#[test]
fn test_all_pods_active_allows_disruptions_in_every_zone() {
    let zdb = make_zdb(IntOrString::Int(1));
    let pods = make_pods();
    let zone_pods = bucket(&pods);

    let status = compute_status(&zdb, &pods, &zone_pods, REPLICAS, Utc::now()).unwrap();

    assert_eq!(status.observed_generation, 1);
    assert!(status.disrupted_pods.is_empty());
    for zone in ZONES {
        assert_eq!(status.expected_pods.get(zone), Some(&3), "zone {zone}");
        assert_eq!(status.current_healthy.get(zone), Some(&3), "zone {zone}");
        assert_eq!(status.current_unhealthy.get(zone), Some(&0), "zone {zone}");
        assert_eq!(status.desired_healthy.get(zone), Some(&2), "zone {zone}");
        assert_eq!(status.disruptions_allowed.get(zone), Some(&1), "zone {zone}");
    }
}

#[test]
fn test_single_unhealthy_pod_blocks_other_zones() {
    let zdb = make_zdb(IntOrString::Int(1));
    let mut pods = make_pods();
    // db-4 lives in us-east-1b
    pods[4] = make_pod("db-4", "Pending", false);
    let zone_pods = bucket(&pods);

    let status = compute_status(&zdb, &pods, &zone_pods, REPLICAS, Utc::now()).unwrap();

    for zone in ZONES {
        if zone == "us-east-1b" {
            assert_eq!(status.current_healthy.get(zone), Some(&2));
            assert_eq!(status.current_unhealthy.get(zone), Some(&1));
            assert_eq!(
                status.disruptions_allowed.get(zone),
                Some(&0),
                "budget already consumed by the unhealthy pod"
            );
        } else {
            assert_eq!(status.current_healthy.get(zone), Some(&3));
            assert_eq!(status.current_unhealthy.get(zone), Some(&0));
            assert_eq!(
                status.disruptions_allowed.get(zone),
                Some(&0),
                "other zones must be blocked while us-east-1b is unhealthy"
            );
        }
    }
}

#[test]
fn test_unhealthy_pods_in_two_zones_block_all_zones() {
    let zdb = make_zdb(IntOrString::Int(1));
    let mut pods = make_pods();
    pods[0] = make_pod("db-0", "Pending", false); // us-east-1a
    pods[1] = make_pod("db-1", "Pending", false); // us-east-1b
    let zone_pods = bucket(&pods);

    let status = compute_status(&zdb, &pods, &zone_pods, REPLICAS, Utc::now()).unwrap();

    for zone in ZONES {
        assert_eq!(status.disruptions_allowed.get(zone), Some(&0), "zone {zone}");
    }
    assert_eq!(status.current_unhealthy.get("us-east-1c"), Some(&0));
}

#[test]
fn test_disrupted_pod_counts_against_its_zone_and_blocks_others() {
    let mut zdb = make_zdb(IntOrString::Int(1));
    let pods = make_pods();
    let zone_pods = bucket(&pods);

    // db-3 (us-east-1a) was admitted for eviction moments ago but is
    // still Running and Ready.
    let mut status = crate::crd::zdb::ZoneDisruptionBudgetStatus::default();
    status
        .disrupted_pods
        .insert("db-3".to_string(), Time(Utc::now()));
    zdb.status = Some(status);

    let status = compute_status(&zdb, &pods, &zone_pods, REPLICAS, Utc::now()).unwrap();

    assert_eq!(status.disrupted_pods.len(), 1);
    assert_eq!(status.current_healthy.get("us-east-1a"), Some(&2));
    assert_eq!(status.current_unhealthy.get("us-east-1a"), Some(&1));
    for zone in ZONES {
        assert_eq!(
            status.disruptions_allowed.get(zone),
            Some(&0),
            "in-flight disruption must block zone {zone}"
        );
    }
}

#[test]
fn test_disrupted_pods_aging() {
    let mut zdb = make_zdb(IntOrString::Int(1));
    let now = Utc::now();
    let mut pods = make_pods();
    pods[2].metadata.deletion_timestamp = Some(Time(now)); // db-2 terminating

    let mut prev = crate::crd::zdb::ZoneDisruptionBudgetStatus::default();
    // Fresh entry for a live pod: kept.
    prev.disrupted_pods.insert("db-0".to_string(), Time(now));
    // Entry for a terminating pod: the eviction was observed, dropped.
    prev.disrupted_pods.insert("db-2".to_string(), Time(now));
    // Entry for a pod that no longer exists: dropped.
    prev.disrupted_pods.insert("db-99".to_string(), Time(now));
    // Entry older than the expiry window: dropped.
    prev.disrupted_pods.insert(
        "db-1".to_string(),
        Time(now - Duration::seconds(DISRUPTED_POD_EXPIRY_SECONDS + 30)),
    );
    zdb.status = Some(prev);

    let zone_pods = bucket(&pods);
    let status = compute_status(&zdb, &pods, &zone_pods, REPLICAS, now).unwrap();

    assert_eq!(
        status.disrupted_pods.keys().collect::<Vec<_>>(),
        vec!["db-0"],
        "only the fresh live-pod entry survives aging"
    );
}

#[test]
fn test_percent_max_unavailable_rounds_up() {
    // 25% of 9 replicas = 2.25 → 3
    let zdb = make_zdb(IntOrString::String("25%".to_string()));
    let pods = make_pods();
    let zone_pods = bucket(&pods);

    let status = compute_status(&zdb, &pods, &zone_pods, REPLICAS, Utc::now()).unwrap();

    for zone in ZONES {
        assert_eq!(status.desired_healthy.get(zone), Some(&0)); // 3 - 3
        assert_eq!(status.disruptions_allowed.get(zone), Some(&3));
    }
}

#[test]
fn test_unresolvable_owner_grants_nothing() {
    let zdb = make_zdb(IntOrString::Int(1));
    let pods = make_pods();
    let zone_pods = bucket(&pods);

    // No owner scale could be resolved: expected_total is zero.
    let status = compute_status(&zdb, &pods, &zone_pods, 0, Utc::now()).unwrap();

    for zone in ZONES {
        assert_eq!(status.expected_pods.get(zone), Some(&0), "zone {zone}");
        assert_eq!(
            status.disruptions_allowed.get(zone),
            Some(&0),
            "no scale, no budget (zone {zone})"
        );
    }
}

#[test]
fn test_invalid_max_unavailable_is_a_config_error() {
    let zdb = make_zdb(IntOrString::String("banana".to_string()));
    let pods = make_pods();
    let zone_pods = bucket(&pods);

    let result = compute_status(&zdb, &pods, &zone_pods, REPLICAS, Utc::now());

    assert!(result.is_err());
}

#[test]
fn test_find_zdbs_for_pod_matches_selector_and_namespace() {
    use super::finder::find_zdbs_for_pod;
    use std::sync::Arc;

    let mut zdb = make_zdb(IntOrString::Int(1));
    zdb.metadata.namespace = Some("default".to_string());
    let mut other_ns = make_zdb(IntOrString::Int(1));
    other_ns.metadata.namespace = Some("staging".to_string());
    let mut empty_selector = make_zdb(IntOrString::Int(1));
    empty_selector.metadata.namespace = Some("default".to_string());
    empty_selector.spec.selector = LabelSelector::default();

    let zdbs = vec![Arc::new(zdb), Arc::new(other_ns), Arc::new(empty_selector)];

    let mut pod = make_pod("db-0", "Running", true);
    pod.metadata.labels = Some([("app".to_string(), "db".to_string())].into());

    let refs = find_zdbs_for_pod(&zdbs, &pod);
    assert_eq!(refs.len(), 1, "only the same-namespace matching ZDB");

    let unlabeled = make_pod("db-1", "Running", true);
    assert!(find_zdbs_for_pod(&zdbs, &unlabeled).is_empty());
}
