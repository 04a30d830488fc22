//! Node runtime capabilities
//!
//! The scheduler never touches a node's execution environment directly. It
//! consumes two capabilities:
//!
//! - [`Provisioner`]: creates the backing execution unit for a new node
//! - [`LivenessProbe`]: reports whether that unit is still alive
//!
//! [`crate::docker::DockerRuntime`] implements both with containers;
//! [`NoopRuntime`] provisions nothing and reports every node alive.

use crate::error::Result;
use crate::node::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Answer of a liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    /// Backing unit is running
    Alive,
    /// Backing unit exists but is not running, or is gone
    NotAlive,
    /// Probe could not determine liveness; treated as `NotAlive`
    Error(String),
}

impl Liveness {
    /// Check if the node should stay schedulable
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }
}

/// What a probe needs to know about a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Node being probed
    pub node_id: NodeId,

    /// Backing unit handle recorded at registration
    pub backing_unit: Option<String>,
}

/// Checks whether a node's backing execution unit is alive
///
/// Implementations may be slow; the health monitor bounds every call with a
/// timeout.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Probe one node
    async fn probe(&self, target: &ProbeTarget) -> Liveness;
}

/// Creates backing execution units for new nodes
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provision a unit for a node of `total_capacity`.
    ///
    /// Returns the unit handle, or `None` if the runtime has no units.
    async fn provision(&self, total_capacity: u64) -> Result<Option<String>>;

    /// Remove every unit this provisioner created, returning how many
    async fn teardown(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Runtime without backing units: nothing to provision, everything alive
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRuntime;

#[async_trait]
impl Provisioner for NoopRuntime {
    async fn provision(&self, _total_capacity: u64) -> Result<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
impl LivenessProbe for NoopRuntime {
    async fn probe(&self, _target: &ProbeTarget) -> Liveness {
        Liveness::Alive
    }
}

/// Scripted answer for [`ScriptedProbe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedLiveness {
    /// Answer immediately
    Answer(Liveness),
    /// Never answer
    Hang,
}

/// Probe whose answers are set per node; unscripted nodes are alive.
///
/// Used to drive the health monitor without real backing units.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    script: Mutex<HashMap<NodeId, ScriptedLiveness>>,
}

impl ScriptedProbe {
    /// Create a probe that reports every node alive
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the answer for one node
    pub fn set(&self, node_id: NodeId, answer: ScriptedLiveness) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node_id, answer);
    }

    /// Report `node_id` as not running
    pub fn kill(&self, node_id: NodeId) {
        self.set(node_id, ScriptedLiveness::Answer(Liveness::NotAlive));
    }

    /// Make probes of `node_id` fail
    pub fn fail(&self, node_id: NodeId, reason: impl Into<String>) {
        self.set(node_id, ScriptedLiveness::Answer(Liveness::Error(reason.into())));
    }

    /// Make probes of `node_id` never return
    pub fn hang(&self, node_id: NodeId) {
        self.set(node_id, ScriptedLiveness::Hang);
    }

    fn answer_for(&self, node_id: NodeId) -> ScriptedLiveness {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&node_id)
            .cloned()
            .unwrap_or(ScriptedLiveness::Answer(Liveness::Alive))
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn probe(&self, target: &ProbeTarget) -> Liveness {
        match self.answer_for(target.node_id) {
            ScriptedLiveness::Answer(liveness) => liveness,
            ScriptedLiveness::Hang => std::future::pending().await,
        }
    }
}
