//! Failure recovery
//!
//! Relocates the running pods of a node that left the `Healthy` state:
//!
//! ```text
//! Node failed
//!     │
//!     ├── 1. Copy the node's assigned pod set
//!     │
//!     └── for each pod still Running:
//!           ├── 2. Mark Rescheduling, vacate the failed node
//!           ├── 3. FirstFit over the remaining healthy nodes
//!           └── 4. Running on the new node, or Failed for good
//! ```
//!
//! Recovery always uses [`PlacementStrategy::FirstFit`], whatever strategy
//! originally placed the pod.
//! Pods that are already `Rescheduling` or `Failed` are skipped, which makes
//! repeated or overlapping invocations on the same node harmless.

use crate::cluster::ClusterState;
use crate::error::{Result, SchedulerError};
use crate::node::{NodeHealth, NodeId};
use crate::placement::{NodeSelector, PlacementStrategy};
use crate::pod::{PodId, PodState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Strategy used for every relocation
pub const RECOVERY_STRATEGY: PlacementStrategy = PlacementStrategy::FirstFit;

/// A pod moved off a failed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// Relocated pod
    pub pod_id: PodId,

    /// Node that took it
    pub to: NodeId,
}

/// Per-pod outcome of one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Node that was drained
    pub node_id: Option<NodeId>,

    /// Pods now running elsewhere
    pub relocated: Vec<Relocation>,

    /// Pods with nowhere to go, now permanently failed
    pub failed: Vec<PodId>,

    /// Pods left alone because they were not running
    pub skipped: Vec<PodId>,
}

impl RecoveryReport {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            ..Default::default()
        }
    }

    /// Number of relocated pods
    pub fn relocated_count(&self) -> usize {
        self.relocated.len()
    }

    /// Number of pods that failed
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Check if the pass touched no pod
    pub fn is_noop(&self) -> bool {
        self.relocated.is_empty() && self.failed.is_empty()
    }
}

/// Drain the running pods of `failed_node`.
///
/// Fails if the node is unknown or still `Healthy`; per-pod failures are
/// recorded in the report.
pub(crate) fn recover_node(state: &mut ClusterState, failed_node: NodeId) -> Result<RecoveryReport> {
    let node = state.nodes.get(failed_node)?;
    if node.health == NodeHealth::Healthy {
        return Err(SchedulerError::NodeNotFailed(failed_node));
    }
    let assigned: Vec<PodId> = node.assigned_pods.iter().copied().collect();
    let selector = NodeSelector::new(RECOVERY_STRATEGY);
    let mut report = RecoveryReport::new(failed_node);

    for pod_id in assigned {
        let (demand, pod_state) = match state.pods.get(pod_id) {
            Ok(pod) => (pod.demand, pod.state),
            Err(_) => {
                warn!(node_id = %failed_node, pod_id = %pod_id, "Assigned pod missing from registry");
                report.skipped.push(pod_id);
                continue;
            }
        };

        if pod_state != PodState::Running {
            debug!(pod_id = %pod_id, state = %pod_state, "Skipping pod that is not running");
            report.skipped.push(pod_id);
            continue;
        }

        state.pods.transition(pod_id, PodState::Rescheduling)?;
        state.nodes.unassign(failed_node, pod_id, demand)?;

        let target = selector.select(
            state.nodes.iter().filter(|n| n.id != failed_node),
            demand,
        );

        match target {
            Some(target) => {
                state.nodes.assign(target, pod_id, demand)?;
                state.pods.set_node(pod_id, Some(target))?;
                state.pods.transition(pod_id, PodState::Running)?;
                state.pods.get_mut(pod_id)?.relocations += 1;

                debug!(pod_id = %pod_id, from = %failed_node, to = %target, "Pod relocated");
                report.relocated.push(Relocation { pod_id, to: target });
            }
            None => {
                state.pods.set_node(pod_id, None)?;
                state.pods.transition(pod_id, PodState::Failed)?;

                warn!(pod_id = %pod_id, demand, from = %failed_node, "No node can take pod, marking failed");
                report.failed.push(pod_id);
            }
        }
    }

    if !report.is_noop() {
        info!(
            node_id = %failed_node,
            relocated = report.relocated_count(),
            failed = report.failed_count(),
            skipped = report.skipped.len(),
            "Recovery completed"
        );
    }

    Ok(report)
}
