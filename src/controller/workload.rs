//! Pod and workload helpers shared by the reconcilers and the eviction
//! webhook: pod health classification, ordinal parsing, label selector
//! matching, StatefulSet owner resolution and effective maxUnavailable.

use crate::crd::ZoneDisruptionBudget;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

/// Label every StatefulSet pod carries identifying its template revision.
pub const REVISION_HASH_LABEL: &str = "controller-revision-hash";

/// True when the pod's Ready condition is true.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// True when the pod is in phase Running and Ready.
pub fn is_running_and_ready(pod: &Pod) -> bool {
    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|p| p == "Running")
        .unwrap_or(false);
    running && is_pod_ready(pod)
}

/// True when the pod has been marked for deletion.
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Ordinal of a StatefulSet pod, parsed from the trailing decimal suffix
/// of its name (`db-3` → 3).
pub fn pod_ordinal(pod_name: &str) -> Option<i32> {
    pod_name.rsplit('-').next()?.parse().ok()
}

/// The pod's template revision, from the revision-hash label.
pub fn pod_revision(pod: &Pod) -> Option<&str> {
    pod.labels().get(REVISION_HASH_LABEL).map(String::as_str)
}

/// True when the selector selects nothing (no matchLabels and no
/// matchExpressions).
pub fn selector_is_empty(selector: &LabelSelector) -> bool {
    selector
        .match_labels
        .as_ref()
        .map(|l| l.is_empty())
        .unwrap_or(true)
        && selector
            .match_expressions
            .as_ref()
            .map(|e| e.is_empty())
            .unwrap_or(true)
}

/// Evaluate a label selector against a pod's labels.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let value = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or(&[]);
            let matched = match expr.operator.as_str() {
                "In" => value.map(|v| values.contains(v)).unwrap_or(false),
                "NotIn" => value.map(|v| !values.contains(v)).unwrap_or(true),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !matched {
                return false;
            }
        }
    }
    true
}

/// The pod's controlling owner reference, if any.
pub fn controller_owner(pod: &Pod) -> Option<&OwnerReference> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

fn is_statefulset_ref(owner: &OwnerReference) -> bool {
    let group = owner.api_version.split('/').next().unwrap_or("");
    owner.kind == "StatefulSet" && group == "apps"
}

/// The pod's controlling StatefulSet owner reference, if any.
pub fn statefulset_owner(pod: &Pod) -> Option<&OwnerReference> {
    controller_owner(pod).filter(|owner| is_statefulset_ref(owner))
}

/// The StatefulSet controlling a pod, verified by owner UID.
///
/// Only `apps/StatefulSet` owners are recognized; anything else (or a
/// stale reference whose UID no longer matches) resolves to None.
pub async fn pod_statefulset(
    client: &kube::Client,
    namespace: &str,
    pod: &Pod,
) -> Result<Option<StatefulSet>, kube::Error> {
    let owner = match statefulset_owner(pod) {
        Some(owner) => owner,
        None => return Ok(None),
    };

    let sets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    match sets.get(&owner.name).await {
        Ok(set) => {
            if set.metadata.uid.as_deref() != Some(owner.uid.as_str()) {
                return Ok(None);
            }
            Ok(Some(set))
        }
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
        Err(e) => Err(e),
    }
}

/// Total expected replica count for a set of selected pods.
///
/// Sums `spec.replicas` of the distinct StatefulSet owners. Pods whose
/// owner chain does not resolve contribute nothing, which leaves the
/// budget with zero expectations (and therefore zero allowed
/// disruptions).
pub async fn expected_scale(
    client: &kube::Client,
    namespace: &str,
    pods: &[Pod],
) -> Result<i32, kube::Error> {
    let mut seen_uids: Vec<String> = Vec::new();
    let mut total = 0;

    for pod in pods {
        let owner = match statefulset_owner(pod) {
            Some(owner) => owner,
            None => continue,
        };
        if seen_uids.iter().any(|uid| uid == &owner.uid) {
            continue;
        }
        seen_uids.push(owner.uid.clone());

        if let Some(set) = pod_statefulset(client, namespace, pod).await? {
            total += set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        }
    }

    Ok(total)
}

/// The ZoneDisruptionBudget governing a pod, if any.
///
/// Budgets in the pod's namespace whose non-empty selector matches the
/// pod labels are candidates; with multiple matches the first by name
/// wins and the ambiguity is logged.
pub async fn zdb_for_pod(
    client: &kube::Client,
    pod: &Pod,
) -> Result<Option<ZoneDisruptionBudget>, kube::Error> {
    let labels = pod.labels();
    if labels.is_empty() {
        return Ok(None);
    }
    let namespace = match pod.namespace() {
        Some(ns) => ns,
        None => return Ok(None),
    };

    let zdbs: Api<ZoneDisruptionBudget> = Api::namespaced(client.clone(), &namespace);
    let list = zdbs.list(&Default::default()).await?;

    let mut matched: Vec<ZoneDisruptionBudget> = list
        .items
        .into_iter()
        .filter(|zdb| {
            !selector_is_empty(&zdb.spec.selector) && selector_matches(&zdb.spec.selector, labels)
        })
        .collect();
    matched.sort_by(|a, b| a.name_any().cmp(&b.name_any()));

    if matched.len() > 1 {
        info!(
            pod = %pod.name_any(),
            zdb = %matched[0].name_any(),
            "Pod matches multiple ZoneDisruptionBudgets, choosing first by name"
        );
    }

    Ok(matched.into_iter().next())
}

/// Resolve a maxUnavailable value to an absolute pod count.
///
/// Percentages are taken over `total` and rounded up. Absent values
/// default to 1.
pub fn resolve_max_unavailable(value: Option<&IntOrString>, total: i32) -> Result<i32, String> {
    match value {
        None => Ok(1),
        Some(IntOrString::Int(n)) => Ok((*n).max(0)),
        Some(IntOrString::String(s)) => {
            let percent_str = s
                .strip_suffix('%')
                .ok_or_else(|| format!("maxUnavailable '{s}' is neither an integer nor a percentage"))?;
            let percent: i32 = percent_str
                .parse()
                .map_err(|_| format!("maxUnavailable percentage '{s}' is not a number"))?;
            if !(0..=100).contains(&percent) {
                return Err(format!("maxUnavailable percentage '{s}' must be 0-100"));
            }
            Ok(((total as f64 * percent as f64) / 100.0).ceil() as i32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn pod_with_status(phase: &str, ready: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_running_and_ready() {
        let cases = [
            ("Running", "True", true),
            ("Running", "False", false),
            ("Pending", "False", false),
            ("Unknown", "True", false),
        ];
        for (phase, ready, want) in cases {
            let pod = pod_with_status(phase, ready);
            assert_eq!(
                is_running_and_ready(&pod),
                want,
                "phase={phase} ready={ready}"
            );
        }
    }

    #[test]
    fn test_is_terminating() {
        let mut pod = pod_with_status("Running", "True");
        assert!(!is_terminating(&pod));

        pod.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        assert!(is_terminating(&pod));
    }

    #[test]
    fn test_pod_ordinal() {
        assert_eq!(pod_ordinal("db-0"), Some(0));
        assert_eq!(pod_ordinal("db-12"), Some(12));
        assert_eq!(pod_ordinal("my-app-7"), Some(7));
        assert_eq!(pod_ordinal("db"), None);
        assert_eq!(pod_ordinal("db-x"), None);
    }

    #[test]
    fn test_selector_is_empty() {
        assert!(selector_is_empty(&LabelSelector::default()));

        let selector = LabelSelector {
            match_labels: Some([("app".to_string(), "db".to_string())].into()),
            ..Default::default()
        };
        assert!(!selector_is_empty(&selector));
    }

    #[test]
    fn test_selector_matches_labels() {
        let selector = LabelSelector {
            match_labels: Some([("app".to_string(), "db".to_string())].into()),
            ..Default::default()
        };

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "db".to_string());
        labels.insert("tier".to_string(), "storage".to_string());
        assert!(selector_matches(&selector, &labels));

        labels.insert("app".to_string(), "web".to_string());
        assert!(!selector_matches(&selector, &labels));
    }

    #[test]
    fn test_selector_matches_expressions() {
        let selector = LabelSelector {
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "app".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["db".to_string(), "cache".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
            ..Default::default()
        };

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "db".to_string());
        assert!(selector_matches(&selector, &labels));

        labels.insert("canary".to_string(), "true".to_string());
        assert!(!selector_matches(&selector, &labels));
    }

    #[test]
    fn test_resolve_max_unavailable_absolute() {
        let value = IntOrString::Int(3);
        assert_eq!(resolve_max_unavailable(Some(&value), 9), Ok(3));
    }

    #[test]
    fn test_resolve_max_unavailable_percent_rounds_up() {
        let value = IntOrString::String("25%".to_string());
        // 25% of 9 = 2.25, rounded up
        assert_eq!(resolve_max_unavailable(Some(&value), 9), Ok(3));

        let value = IntOrString::String("10%".to_string());
        assert_eq!(resolve_max_unavailable(Some(&value), 9), Ok(1));
    }

    #[test]
    fn test_resolve_max_unavailable_defaults_to_one() {
        assert_eq!(resolve_max_unavailable(None, 9), Ok(1));
    }

    #[test]
    fn test_resolve_max_unavailable_rejects_garbage() {
        for bad in ["abc", "10", "101%", "-1%", "x%"] {
            let value = IntOrString::String(bad.to_string());
            assert!(
                resolve_max_unavailable(Some(&value), 9).is_err(),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn test_negative_absolute_clamps_to_zero() {
        let value = IntOrString::Int(-2);
        assert_eq!(resolve_max_unavailable(Some(&value), 9), Ok(0));
    }
}
