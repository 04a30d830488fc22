//! Error types for the scheduler

use std::time::Duration;
use thiserror::Error;

use crate::node::{NodeHealth, NodeId};
use crate::pod::{PodId, PodState};

/// Scheduler result type
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur in the scheduler
///
/// An unplaceable pod is not an error; see
/// [`crate::placement::PlacementOutcome::NoCapacity`].
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Node capacity must be a positive integer
    #[error("Invalid capacity {0}: must be a positive integer")]
    InvalidCapacity(i64),

    /// Pod demand must be a positive integer
    #[error("Invalid demand {0}: must be a positive integer")]
    InvalidDemand(i64),

    /// Node not found
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// Pod not found
    #[error("Pod {0} not found")]
    PodNotFound(PodId),

    /// Reservation would drive available capacity negative
    #[error("Insufficient capacity on {node_id}: need {need}, have {have}")]
    InsufficientCapacity {
        /// Node the reservation was attempted on
        node_id: NodeId,
        /// Requested units
        need: u64,
        /// Units currently available
        have: u64,
    },

    /// Release would push available capacity past the node's total
    #[error("Capacity overflow on {node_id}: releasing {amount} with {available}/{total} available")]
    CapacityOverflow {
        /// Node the release was attempted on
        node_id: NodeId,
        /// Units being released
        amount: u64,
        /// Units currently available
        available: u64,
        /// Node total
        total: u64,
    },

    /// Recovery requested for a node that has not failed
    #[error("Node {0} is healthy; only failed nodes can be recovered")]
    NodeNotFailed(NodeId),

    /// Illegal node health transition
    #[error("Invalid transition for {node_id}: {from} -> {to}")]
    InvalidTransition {
        /// Node whose transition was rejected
        node_id: NodeId,
        /// Current health
        from: NodeHealth,
        /// Requested health
        to: NodeHealth,
    },

    /// Illegal pod lifecycle transition
    #[error("Invalid transition for {pod_id}: {from} -> {to}")]
    InvalidPodTransition {
        /// Pod whose transition was rejected
        pod_id: PodId,
        /// Current state
        from: PodState,
        /// Requested state
        to: PodState,
    },

    /// Strategy name not recognised
    #[error("Unknown scheduling strategy: {0}")]
    UnknownStrategy(String),

    /// Liveness probe did not answer in time
    #[error("Liveness probe for {node_id} timed out after {timeout:?}")]
    ProbeTimeout {
        /// Probed node
        node_id: NodeId,
        /// Configured probe timeout
        timeout: Duration,
    },

    /// Backing execution unit could not be provisioned
    #[error("Provisioning failed: {0}")]
    Provision(String),

    /// Docker CLI error
    #[error("Docker error: {0}")]
    Docker(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The docker CLI could not be spawned
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Create a Docker error
    pub fn docker(msg: impl Into<String>) -> Self {
        Self::Docker(msg.into())
    }

    /// Create a provisioning error
    pub fn provision(msg: impl Into<String>) -> Self {
        Self::Provision(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error was caused by caller input rather than system state
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCapacity(_)
                | Self::InvalidDemand(_)
                | Self::UnknownStrategy(_)
                | Self::NodeNotFound(_)
                | Self::PodNotFound(_)
        )
    }
}
