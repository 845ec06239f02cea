//! Pod to availability-zone resolution
//!
//! The zone of a pod is the `topology.kubernetes.io/zone` label of the
//! node it runs on. Node reads can fail transiently (node deleted during
//! scale-in, label briefly missing), so every successful lookup is
//! remembered in a process-local TTL cache and used as a fallback. The
//! cache is rebuilt naturally after a restart: node reads succeed in
//! steady state.

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{Api, ResourceExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Node label holding the zone name.
pub const TOPOLOGY_ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// How long a cached pod→zone mapping stays valid.
const POD_ZONE_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Process-local TTL store of pod name → zone.
///
/// Single writer (the resolver), many readers. Expired entries are
/// dropped lazily on read and on insert.
pub struct PodZoneCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl PodZoneCache {
    pub fn new() -> Self {
        Self::with_ttl(POD_ZONE_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, pod_name: &str, zone: &str) {
        if let Ok(mut entries) = self.entries.write() {
            let now = Instant::now();
            entries.retain(|_, (_, at)| now.duration_since(*at) <= self.ttl);
            entries.insert(pod_name.to_string(), (zone.to_string(), now));
        }
    }

    pub fn get(&self, pod_name: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        let (zone, at) = entries.get(pod_name)?;
        if Instant::now().duration_since(*at) > self.ttl {
            return None;
        }
        Some(zone.clone())
    }
}

impl Default for PodZoneCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves pod zones through the API server with the cache fallback.
#[derive(Clone)]
pub struct PodZoneHelper {
    client: kube::Client,
    cache: Arc<PodZoneCache>,
}

impl PodZoneHelper {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            cache: Arc::new(PodZoneCache::new()),
        }
    }

    /// Resolve the zone of a single pod.
    ///
    /// Returns None when the node and the cache both fail; callers must
    /// fail safe (a zoneless pod is non-deletable for rollouts and
    /// outside accounting for budgets).
    pub async fn pod_zone(&self, pod: &Pod) -> Option<String> {
        let pod_name = pod.name_any();
        let node_name = match pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) {
            Some(n) => n,
            None => {
                debug!(pod = %pod_name, "Pod has no assigned node, trying cache");
                return self.cache.get(&pod_name);
            }
        };

        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = match nodes.get(node_name).await {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, pod = %pod_name, node = %node_name, "Unable to get node, trying cache");
                return self.cache.get(&pod_name);
            }
        };

        match node.labels().get(TOPOLOGY_ZONE_LABEL) {
            Some(zone) => {
                self.cache.insert(&pod_name, zone);
                Some(zone.clone())
            }
            None => {
                debug!(pod = %pod_name, node = %node_name, "Zone label not found on node, trying cache");
                self.cache.get(&pod_name)
            }
        }
    }

    /// Group pods by zone. Pods whose zone cannot be resolved are left
    /// out. The BTreeMap keys give the lexicographic zone order the
    /// rollout schedule relies on.
    pub async fn zone_pods_map<'a>(&self, pods: &'a [Pod]) -> BTreeMap<String, Vec<&'a Pod>> {
        let mut map: BTreeMap<String, Vec<&'a Pod>> = BTreeMap::new();
        for pod in pods {
            if let Some(zone) = self.pod_zone(pod).await {
                map.entry(zone).or_default().push(pod);
            }
        }
        map
    }
}
