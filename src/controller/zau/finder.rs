//! Watch-event mapping for the ZAU controller
//!
//! Pods and StatefulSets are watched alongside the ZAU objects; these
//! functions translate their events into the ZAUs to re-reconcile. They
//! work over a snapshot of the controller's reflector store so the watch
//! wiring can call them synchronously.

use crate::controller::workload::statefulset_owner;
use crate::crd::ZoneAwareUpdate;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::sync::Arc;

/// ZAUs targeting the StatefulSet that controls this pod.
pub fn find_zau_for_pod(zaus: &[Arc<ZoneAwareUpdate>], pod: &Pod) -> Vec<ObjectRef<ZoneAwareUpdate>> {
    let owner = match statefulset_owner(pod) {
        Some(owner) => owner,
        None => return Vec::new(),
    };

    zaus.iter()
        .filter(|zau| zau.namespace() == pod.namespace() && zau.spec.statefulset == owner.name)
        .map(|zau| ObjectRef::from_obj(zau.as_ref()))
        .collect()
}

/// ZAUs targeting this StatefulSet by name.
pub fn find_zau_for_statefulset(
    zaus: &[Arc<ZoneAwareUpdate>],
    set: &StatefulSet,
) -> Vec<ObjectRef<ZoneAwareUpdate>> {
    zaus.iter()
        .filter(|zau| zau.namespace() == set.namespace() && zau.spec.statefulset == set.name_any())
        .map(|zau| ObjectRef::from_obj(zau.as_ref()))
        .collect()
}
