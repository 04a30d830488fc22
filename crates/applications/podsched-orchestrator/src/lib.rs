//! # Podsched Orchestrator
//!
//! A minimal cluster scheduler: nodes with finite capacity, pods placed onto
//! them by a pluggable strategy, and automatic relocation when a node fails.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (routes)          HealthMonitor (monitor)
//!       │                    │ probe (no lock)
//!       ▼                    ▼
//!  ┌─────────────────────────────────────┐
//!  │ Cluster                             │
//!  │  RwLock<ClusterState>               │
//!  │   ├── NodeRegistry   (node)         │
//!  │   └── PodRegistry    (pod)          │
//!  │  NodeSelector        (placement)    │
//!  │  recover_node        (recovery)     │
//!  └─────────────────────────────────────┘
//!       │ provision                 ▲ liveness
//!       ▼                           │
//!  Provisioner / LivenessProbe (runtime, docker)
//! ```
//!
//! ## Node health
//!
//! - **Healthy**: schedulable
//! - **Unhealthy**: heartbeat overdue; pods relocated, revived by a heartbeat
//! - **Terminated**: backing unit gone; terminal
//!
//! Recovery always places with first fit and never targets a node that is
//! not healthy. Pods with nowhere to go become `Failed` and release their
//! capacity.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod docker;
pub mod error;
pub mod monitor;
pub mod node;
pub mod placement;
pub mod pod;
pub mod recovery;
pub mod routes;
pub mod runtime;

// Scheduler core
pub use cluster::{Cluster, ClusterSnapshot, ClusterState};
pub use node::{Node, NodeHealth, NodeId, NodeRegistry};
pub use placement::{NodeSelector, PlacementOutcome, PlacementStrategy};
pub use pod::{Pod, PodId, PodRegistry, PodState};
pub use recovery::{RECOVERY_STRATEGY, RecoveryReport, Relocation};

// Error handling
pub use error::{Result, SchedulerError};

// Health monitoring
pub use monitor::{
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_MONITOR_INTERVAL_SECS, DEFAULT_PROBE_TIMEOUT_SECS,
    HealthMonitor, MonitorConfig, MonitorHandle, TickReport,
};

// Node runtimes
pub use docker::{DockerConfig, DockerRuntime};
pub use runtime::{
    Liveness, LivenessProbe, NoopRuntime, ProbeTarget, Provisioner, ScriptedLiveness, ScriptedProbe,
};

// HTTP adapter
pub use routes::{ApiError, AppState, router};
