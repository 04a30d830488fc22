//! Cluster state and scheduling operations
//!
//! Node and pod state form one consistency domain: a single [`ClusterState`]
//! behind one async `RwLock`. Every mutating operation takes the write lock
//! once and finishes without awaiting anything else, so capacity, assigned
//! sets and pod lifecycle always move together. Reads take the read lock and
//! return clones, never references into the live state.
//!
//! Slow work (provisioning a backing unit, probing liveness) always happens
//! before the lock is taken.

use crate::error::Result;
use crate::monitor::TickReport;
use crate::node::{Node, NodeHealth, NodeId, NodeRegistry, validate_capacity};
use crate::placement::{NodeSelector, PlacementOutcome, PlacementStrategy};
use crate::pod::{Pod, PodId, PodRegistry, validate_demand};
use crate::recovery::{RecoveryReport, recover_node};
use crate::runtime::{Liveness, NoopRuntime, ProbeTarget, Provisioner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Registries guarded together
#[derive(Debug, Default)]
pub struct ClusterState {
    /// All nodes
    pub nodes: NodeRegistry,

    /// All pods
    pub pods: PodRegistry,
}

impl ClusterState {
    /// Place a pod, creating it and reserving capacity in one step
    fn place(
        &mut self,
        demand: u64,
        strategy: PlacementStrategy,
        now: DateTime<Utc>,
    ) -> Result<PlacementOutcome> {
        let Some(node_id) = NodeSelector::new(strategy).select(self.nodes.iter(), demand) else {
            return Ok(PlacementOutcome::NoCapacity);
        };

        // Pod is only created once the node has accepted the reservation
        let pod_id = self.pods.next_id();
        self.nodes.assign(node_id, pod_id, demand)?;
        self.pods.create(demand, node_id, strategy, now);

        Ok(PlacementOutcome::Placed { pod_id, node_id })
    }
}

/// Point-in-time view of the whole cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Nodes in registration order
    pub nodes: Vec<Node>,

    /// Pods in creation order
    pub pods: Vec<Pod>,

    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

/// Shared handle to the scheduler
///
/// Cheap to clone; every clone sees the same state.
#[derive(Clone)]
pub struct Cluster {
    state: Arc<RwLock<ClusterState>>,
    provisioner: Arc<dyn Provisioner>,
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new(Arc::new(NoopRuntime))
    }
}

impl Cluster {
    /// Create an empty cluster provisioning nodes through `provisioner`
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ClusterState::default())),
            provisioner,
        }
    }

    /// Create an empty cluster whose nodes have no backing units
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Strategies accepted by [`Cluster::place`]
    pub fn supported_strategies() -> &'static [PlacementStrategy] {
        &PlacementStrategy::ALL
    }

    /// Provision and register a node
    pub async fn register(&self, total_capacity: i64) -> Result<NodeId> {
        let capacity = validate_capacity(total_capacity)?;
        let backing_unit = self.provisioner.provision(capacity).await?;

        let id = self
            .state
            .write()
            .await
            .nodes
            .register(total_capacity, backing_unit.clone(), Utc::now())?;

        info!(
            node_id = %id,
            capacity,
            backing_unit = backing_unit.as_deref().unwrap_or("-"),
            "Node registered"
        );
        Ok(id)
    }

    /// Record a heartbeat received now
    pub async fn heartbeat(&self, node_id: NodeId) -> Result<NodeHealth> {
        self.heartbeat_at(node_id, Utc::now()).await
    }

    /// Record a heartbeat carrying its own timestamp
    pub async fn heartbeat_at(&self, node_id: NodeId, now: DateTime<Utc>) -> Result<NodeHealth> {
        let mut state = self.state.write().await;
        let before = state.nodes.get(node_id)?.health;
        let after = state.nodes.heartbeat(node_id, now)?;

        if before != after {
            info!(node_id = %node_id, from = %before, to = %after, "Node recovered on heartbeat");
        }
        Ok(after)
    }

    /// Place a pod of `demand` units using `strategy`
    pub async fn place(&self, demand: i64, strategy: PlacementStrategy) -> Result<PlacementOutcome> {
        let demand = validate_demand(demand)?;
        let outcome = self.state.write().await.place(demand, strategy, Utc::now())?;

        match outcome {
            PlacementOutcome::Placed { pod_id, node_id } => {
                info!(pod_id = %pod_id, node_id = %node_id, demand, strategy = %strategy, "Pod placed");
            }
            PlacementOutcome::NoCapacity => {
                info!(demand, strategy = %strategy, "No node with sufficient capacity");
            }
        }
        Ok(outcome)
    }

    /// Relocate the running pods of a node that is no longer `Healthy`.
    ///
    /// Rejects healthy nodes with [`SchedulerError::NodeNotFailed`]; failures
    /// are normally recovered by [`Cluster::evaluate_health`].
    ///
    /// [`SchedulerError::NodeNotFailed`]: crate::error::SchedulerError::NodeNotFailed
    pub async fn recover(&self, node_id: NodeId) -> Result<RecoveryReport> {
        recover_node(&mut *self.state.write().await, node_id)
    }

    /// Look up one node
    pub async fn node(&self, node_id: NodeId) -> Result<Node> {
        self.state.read().await.nodes.get(node_id).cloned()
    }

    /// Look up one pod
    pub async fn pod(&self, pod_id: PodId) -> Result<Pod> {
        self.state.read().await.pods.get(pod_id).cloned()
    }

    /// All nodes, in registration order
    pub async fn list_nodes(&self) -> Vec<Node> {
        self.state.read().await.nodes.snapshot()
    }

    /// All pods, in creation order
    pub async fn list_pods(&self) -> Vec<Pod> {
        self.state.read().await.pods.snapshot()
    }

    /// Nodes and pods as of a single instant
    pub async fn snapshot(&self) -> ClusterSnapshot {
        let state = self.state.read().await;
        ClusterSnapshot {
            nodes: state.nodes.snapshot(),
            pods: state.pods.snapshot(),
            taken_at: Utc::now(),
        }
    }

    /// Nodes the health monitor should probe
    pub async fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.state
            .read()
            .await
            .nodes
            .iter()
            .filter(|n| !n.health.is_terminal())
            .map(|n| ProbeTarget {
                node_id: n.id,
                backing_unit: n.backing_unit.clone(),
            })
            .collect()
    }

    /// Apply one round of health evidence.
    ///
    /// Nodes whose probe did not report alive become `Terminated`; healthy
    /// nodes with a heartbeat older than `heartbeat_timeout` at `now` become
    /// `Unhealthy`. All transitions are applied before any recovery runs, so
    /// pods never move onto a node that fails in the same round.
    pub async fn evaluate_health(
        &self,
        probes: &[(NodeId, Liveness)],
        now: DateTime<Utc>,
        heartbeat_timeout: chrono::Duration,
    ) -> TickReport {
        let mut state = self.state.write().await;
        let mut report = TickReport::new(now);

        for (node_id, liveness) in probes {
            if liveness.is_alive() {
                continue;
            }
            match state.nodes.transition(*node_id, NodeHealth::Terminated) {
                Ok(true) => {
                    warn!(node_id = %node_id, liveness = ?liveness, "Node terminated");
                    report.terminated.push(*node_id);
                }
                Ok(false) => {}
                Err(e) => warn!(node_id = %node_id, error = %e, "Could not terminate node"),
            }
        }

        let stale: Vec<NodeId> = state
            .nodes
            .iter()
            .filter(|n| n.health == NodeHealth::Healthy && n.is_stale(now, heartbeat_timeout))
            .map(|n| n.id)
            .collect();

        for node_id in stale {
            match state.nodes.transition(node_id, NodeHealth::Unhealthy) {
                Ok(_) => {
                    warn!(node_id = %node_id, "Heartbeat overdue, node unhealthy");
                    report.unhealthy.push(node_id);
                }
                Err(e) => warn!(node_id = %node_id, error = %e, "Could not mark node unhealthy"),
            }
        }

        let failed: Vec<NodeId> = report.terminated.iter().chain(&report.unhealthy).copied().collect();
        for node_id in failed {
            match recover_node(&mut state, node_id) {
                Ok(recovery) => report.recoveries.push(recovery),
                Err(e) => warn!(node_id = %node_id, error = %e, "Recovery failed"),
            }
        }

        report
    }
}
