use crate::crd::zau::ZoneAwareUpdateStatus;
use std::collections::BTreeMap;

/// Build the next ZAU status from freshly counted old replicas.
///
/// Zones present in the previous status but absent from the new counts
/// are written as zero rather than dropped, so a finished zone stays
/// visible (and its metric series goes to 0 instead of disappearing).
pub fn next_status(
    prev: Option<&ZoneAwareUpdateStatus>,
    update_step: i32,
    deleted_replicas: i32,
    old_counts: &BTreeMap<String, i32>,
    update_revision: &str,
    current_revision: &str,
    paused_rollout: bool,
) -> ZoneAwareUpdateStatus {
    let mut old_replicas: BTreeMap<String, i32> = prev
        .map(|p| p.old_replicas.keys().map(|zone| (zone.clone(), 0)).collect())
        .unwrap_or_default();
    for (zone, count) in old_counts {
        old_replicas.insert(zone.clone(), *count);
    }

    ZoneAwareUpdateStatus {
        update_step,
        deleted_replicas,
        old_replicas,
        update_revision: update_revision.to_string(),
        current_revision: current_revision.to_string(),
        paused_rollout,
    }
}
