use crate::controller::workload::{selector_is_empty, selector_matches};
use crate::crd::ZoneDisruptionBudget;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::sync::Arc;

/// Map a pod event to the budgets that must be re-reconciled.
///
/// Works over a snapshot of the controller's reflector store so the
/// watch wiring can call it synchronously.
pub fn find_zdbs_for_pod(
    zdbs: &[Arc<ZoneDisruptionBudget>],
    pod: &Pod,
) -> Vec<ObjectRef<ZoneDisruptionBudget>> {
    let labels = pod.labels();
    if labels.is_empty() {
        return Vec::new();
    }

    zdbs.iter()
        .filter(|zdb| zdb.namespace() == pod.namespace())
        .filter(|zdb| {
            !selector_is_empty(&zdb.spec.selector) && selector_matches(&zdb.spec.selector, labels)
        })
        .map(|zdb| ObjectRef::from_obj(zdb.as_ref()))
        .collect()
}
