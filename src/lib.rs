//! Zone-aware disruption budgets and StatefulSet rollouts for Kubernetes
//!
//! Two cooperating control loops keep involuntary and voluntary pod
//! disruptions confined to one availability zone at a time:
//!
//! - The [`crd::ZoneDisruptionBudget`] reconciler maintains per-zone
//!   health and disruption counters for a labeled pod population, and
//!   the eviction admission webhook consults those counters to admit or
//!   deny each `pods/eviction` request.
//! - The [`crd::ZoneAwareUpdate`] controller rolls an `OnDelete`
//!   StatefulSet zone by zone with exponentially growing deletion
//!   batches, pausing on unhealthy pods or a firing CloudWatch alarm.

pub mod controller;
pub mod crd;
pub mod server;
