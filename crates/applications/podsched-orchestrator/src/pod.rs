//! Pod registry
//!
//! Pods are created only by a successful placement and are never removed.
//! `Failed` is terminal: resources are released and nothing revives the pod.

use crate::error::{Result, SchedulerError};
use crate::node::{NodeId, parse_prefixed};
use crate::placement::PlacementStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stable pod identifier, rendered as `pod-<n>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PodId(u64);

impl PodId {
    /// Raw sequence number
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pod-{}", self.0)
    }
}

impl FromStr for PodId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_prefixed(s, "pod-")
            .map(PodId)
            .ok_or_else(|| format!("invalid pod id: {s}"))
    }
}

impl From<PodId> for String {
    fn from(id: PodId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for PodId {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Pod lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodState {
    /// Placed and holding capacity on its node
    Running,
    /// Being moved off a failed node
    Rescheduling,
    /// No node could take it; terminal
    Failed,
}

impl PodState {
    /// Whether `self -> next` is a legal lifecycle edge
    pub fn can_transition_to(self, next: PodState) -> bool {
        use PodState::*;
        matches!(
            (self, next),
            (Running, Rescheduling) | (Rescheduling, Running) | (Running, Failed) | (Rescheduling, Failed)
        )
    }

    /// Check if this pod reserves capacity on its node
    pub fn holds_capacity(self) -> bool {
        matches!(self, Self::Running | Self::Rescheduling)
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Rescheduling => "rescheduling",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of workload with a fixed resource demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Pod ID
    pub id: PodId,

    /// Resource units required
    pub demand: u64,

    /// Owning node; `None` once the pod has failed
    pub node_id: Option<NodeId>,

    /// Lifecycle state
    pub state: PodState,

    /// Strategy used for the original placement
    pub strategy: PlacementStrategy,

    /// Number of successful moves off failed nodes
    pub relocations: u32,

    /// Placement time
    pub created_at: DateTime<Utc>,
}

/// Validate a requested pod demand
pub fn validate_demand(demand: i64) -> Result<u64> {
    if demand <= 0 {
        return Err(SchedulerError::InvalidDemand(demand));
    }
    Ok(demand as u64)
}

/// Registry of all pods ever placed
#[derive(Debug, Default)]
pub struct PodRegistry {
    pods: BTreeMap<PodId, Pod>,
    last_id: u64,
}

impl PodRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next created pod will receive
    pub fn next_id(&self) -> PodId {
        PodId(self.last_id + 1)
    }

    /// Create a running pod owned by `node_id`
    pub fn create(
        &mut self,
        demand: u64,
        node_id: NodeId,
        strategy: PlacementStrategy,
        now: DateTime<Utc>,
    ) -> PodId {
        self.last_id += 1;
        let id = PodId(self.last_id);
        self.pods.insert(
            id,
            Pod {
                id,
                demand,
                node_id: Some(node_id),
                state: PodState::Running,
                strategy,
                relocations: 0,
                created_at: now,
            },
        );
        id
    }

    /// Move a pod along its lifecycle
    pub fn transition(&mut self, id: PodId, to: PodState) -> Result<()> {
        let pod = self.get_mut(id)?;
        if !pod.state.can_transition_to(to) {
            return Err(SchedulerError::InvalidPodTransition {
                pod_id: id,
                from: pod.state,
                to,
            });
        }
        pod.state = to;
        Ok(())
    }

    /// Point a pod at a new owning node (or none)
    pub fn set_node(&mut self, id: PodId, node_id: Option<NodeId>) -> Result<()> {
        self.get_mut(id)?.node_id = node_id;
        Ok(())
    }

    /// Look up a pod
    pub fn get(&self, id: PodId) -> Result<&Pod> {
        self.pods.get(&id).ok_or(SchedulerError::PodNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: PodId) -> Result<&mut Pod> {
        self.pods.get_mut(&id).ok_or(SchedulerError::PodNotFound(id))
    }

    /// Pods in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Pod> {
        self.pods.values()
    }

    /// Point-in-time copy of every pod
    pub fn snapshot(&self) -> Vec<Pod> {
        self.pods.values().cloned().collect()
    }

    /// Number of pods ever placed
    pub fn len(&self) -> usize {
        self.pods.len()
    }

    /// Check if no pod has been placed
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}
