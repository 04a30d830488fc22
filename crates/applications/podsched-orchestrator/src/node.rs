//! Node registry
//!
//! Owns the fleet of worker nodes: their capacity accounting, the set of pods
//! each one holds, and the health state machine driven by heartbeats and the
//! health monitor.
//!
//! ## Health state machine
//!
//! ```text
//!   Healthy ──stale heartbeat──▶ Unhealthy
//!      ▲                            │
//!      └──────fresh heartbeat───────┘
//!
//!   Healthy | Unhealthy ──probe reports not alive──▶ Terminated (absorbing)
//! ```

use crate::error::{Result, SchedulerError};
use crate::pod::PodId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Stable node identifier, rendered as `node-<n>`.
///
/// Ids are handed out sequentially and never reused, so ordering by id is
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId(u64);

impl NodeId {
    /// Raw sequence number
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_prefixed(s, "node-")
            .map(NodeId)
            .ok_or_else(|| format!("invalid node id: {s}"))
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Parse `<prefix><n>` or a bare `<n>`.
pub(crate) fn parse_prefixed(s: &str, prefix: &str) -> Option<u64> {
    s.strip_prefix(prefix).unwrap_or(s).parse().ok()
}

/// Node liveness classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    /// Heartbeating and alive; the only schedulable state
    Healthy,
    /// Heartbeat overdue; may come back
    Unhealthy,
    /// Backing unit gone; terminal
    Terminated,
}

impl NodeHealth {
    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Self-loops are not edges; callers treat them as no-ops.
    pub fn can_transition_to(self, next: NodeHealth) -> bool {
        use NodeHealth::*;
        matches!(
            (self, next),
            (Healthy, Unhealthy) | (Unhealthy, Healthy) | (Healthy, Terminated) | (Unhealthy, Terminated)
        )
    }

    /// Check if no transition can leave this state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capacity-bearing placement target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node ID
    pub id: NodeId,

    /// Capacity fixed at registration
    pub total_capacity: u64,

    /// Capacity not reserved by running or rescheduling pods
    pub available_capacity: u64,

    /// Pods currently owned by this node
    pub assigned_pods: BTreeSet<PodId>,

    /// Liveness classification
    pub health: NodeHealth,

    /// Most recent liveness signal
    pub last_heartbeat: DateTime<Utc>,

    /// Registration time
    pub created_at: DateTime<Utc>,

    /// Handle of the backing execution unit (container ID), if any
    pub backing_unit: Option<String>,
}

impl Node {
    /// Check if the node may receive new pods
    pub fn is_schedulable(&self) -> bool {
        self.health == NodeHealth::Healthy
    }

    /// Check if `demand` units fit in the available capacity
    pub fn can_fit(&self, demand: u64) -> bool {
        self.available_capacity >= demand
    }

    /// Capacity currently reserved
    pub fn used_capacity(&self) -> u64 {
        self.total_capacity - self.available_capacity
    }

    /// Whether the last heartbeat is older than `timeout` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) > timeout
    }
}

/// Validate a requested node capacity
pub fn validate_capacity(total_capacity: i64) -> Result<u64> {
    if total_capacity <= 0 {
        return Err(SchedulerError::InvalidCapacity(total_capacity));
    }
    Ok(total_capacity as u64)
}

/// Registry of all nodes, iterated in registration order
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, Node>,
    last_id: u64,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new healthy node with all capacity available
    pub fn register(
        &mut self,
        total_capacity: i64,
        backing_unit: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<NodeId> {
        let total_capacity = validate_capacity(total_capacity)?;

        self.last_id += 1;
        let id = NodeId(self.last_id);
        self.nodes.insert(
            id,
            Node {
                id,
                total_capacity,
                available_capacity: total_capacity,
                assigned_pods: BTreeSet::new(),
                health: NodeHealth::Healthy,
                last_heartbeat: now,
                created_at: now,
                backing_unit,
            },
        );

        Ok(id)
    }

    /// Record a liveness signal.
    ///
    /// A heartbeat newer than `last_heartbeat` revives an unhealthy node; a
    /// terminated node only gets its timestamp updated. Heartbeats at or
    /// before `last_heartbeat` are ignored and change nothing.
    pub fn heartbeat(&mut self, id: NodeId, now: DateTime<Utc>) -> Result<NodeHealth> {
        let node = self.get_mut(id)?;
        if now <= node.last_heartbeat {
            return Ok(node.health);
        }
        node.last_heartbeat = now;
        if node.health == NodeHealth::Unhealthy {
            node.health = NodeHealth::Healthy;
        }
        Ok(node.health)
    }

    /// Move a node to `to`.
    ///
    /// Returns `Ok(false)` if the node is already in `to`, and rejects edges
    /// that are not part of the state machine.
    pub fn transition(&mut self, id: NodeId, to: NodeHealth) -> Result<bool> {
        let node = self.get_mut(id)?;
        if node.health == to {
            return Ok(false);
        }
        if !node.health.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                node_id: id,
                from: node.health,
                to,
            });
        }
        node.health = to;
        Ok(true)
    }

    /// Reserve capacity on a node
    pub fn reserve(&mut self, id: NodeId, amount: u64) -> Result<()> {
        let node = self.get_mut(id)?;
        if node.available_capacity < amount {
            return Err(SchedulerError::InsufficientCapacity {
                node_id: id,
                need: amount,
                have: node.available_capacity,
            });
        }
        node.available_capacity -= amount;
        Ok(())
    }

    /// Return capacity to a node.
    ///
    /// Rejects a release that would leave more available than the node's
    /// total, leaving the node untouched.
    pub fn release(&mut self, id: NodeId, amount: u64) -> Result<()> {
        let node = self.get_mut(id)?;
        match node.available_capacity.checked_add(amount) {
            Some(available) if available <= node.total_capacity => {
                node.available_capacity = available;
                Ok(())
            }
            _ => Err(SchedulerError::CapacityOverflow {
                node_id: id,
                amount,
                available: node.available_capacity,
                total: node.total_capacity,
            }),
        }
    }

    /// Reserve capacity and record ownership of `pod` in one step
    pub fn assign(&mut self, id: NodeId, pod: PodId, demand: u64) -> Result<()> {
        self.reserve(id, demand)?;
        self.get_mut(id)?.assigned_pods.insert(pod);
        Ok(())
    }

    /// Drop ownership of `pod` and release its capacity.
    ///
    /// Returns `false` if the node did not hold the pod.
    pub fn unassign(&mut self, id: NodeId, pod: PodId, demand: u64) -> Result<bool> {
        if !self.get_mut(id)?.assigned_pods.remove(&pod) {
            return Ok(false);
        }
        self.release(id, demand)?;
        Ok(true)
    }

    /// Look up a node
    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(SchedulerError::NodeNotFound(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(SchedulerError::NodeNotFound(id))
    }

    /// Nodes in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Point-in-time copy of every node
    pub fn snapshot(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no node has been registered
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
