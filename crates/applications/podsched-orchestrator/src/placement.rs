//! Placement strategies
//!
//! Selecting a node for a pod is a pure function of the node list, the pod's
//! demand and a named strategy. Only `Healthy` nodes with enough available
//! capacity are eligible, and they are considered in registration order.
//!
//! ## Strategies
//!
//! - **FirstFit**: First eligible node (cheap, predictable)
//! - **BestFit**: Node left with the least spare capacity (bin packing)
//! - **WorstFit**: Node with the most available capacity (spreading)
//!
//! Ties always go to the earliest-registered node, so a given snapshot and
//! strategy always yield the same choice.

use crate::error::SchedulerError;
use crate::node::{Node, NodeId};
use crate::pod::PodId;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

/// Placement strategy types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// First eligible node in registration order
    #[default]
    FirstFit,

    /// Eligible node minimizing `available - demand`
    BestFit,

    /// Eligible node maximizing `available`
    WorstFit,
}

impl PlacementStrategy {
    /// Every supported strategy, in presentation order
    pub const ALL: [PlacementStrategy; 3] = [Self::FirstFit, Self::BestFit, Self::WorstFit];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstFit => "first_fit",
            Self::BestFit => "best_fit",
            Self::WorstFit => "worst_fit",
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacementStrategy {
    type Err = SchedulerError;

    /// Accepts `first_fit`, `first-fit`, `firstfit` and `FirstFit` spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "firstfit" => Ok(Self::FirstFit),
            "bestfit" => Ok(Self::BestFit),
            "worstfit" => Ok(Self::WorstFit),
            _ => Err(SchedulerError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Outcome of a placement request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Pod created and bound to a node
    Placed {
        /// New pod
        pod_id: PodId,
        /// Node that received it
        node_id: NodeId,
    },

    /// No eligible node; nothing was mutated
    NoCapacity,
}

impl PlacementOutcome {
    /// Check if a pod was placed
    pub fn is_placed(&self) -> bool {
        matches!(self, Self::Placed { .. })
    }
}

/// Node selector for a single strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSelector {
    strategy: PlacementStrategy,
}

impl NodeSelector {
    /// Create a selector for the given strategy
    pub fn new(strategy: PlacementStrategy) -> Self {
        Self { strategy }
    }

    /// Get the strategy
    pub fn strategy(&self) -> PlacementStrategy {
        self.strategy
    }

    /// Select a node for `demand`.
    ///
    /// Returns `None` when no healthy node can fit the demand.
    pub fn select<'a, I>(&self, nodes: I, demand: u64) -> Option<NodeId>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        let mut eligible = nodes
            .into_iter()
            .filter(|n| n.is_schedulable() && n.can_fit(demand));

        let chosen = match self.strategy {
            PlacementStrategy::FirstFit => eligible.next(),
            // `min_by_key` keeps the first of equal minima
            PlacementStrategy::BestFit => eligible.min_by_key(|n| n.available_capacity - demand),
            PlacementStrategy::WorstFit => eligible.min_by_key(|n| Reverse(n.available_capacity)),
        };

        chosen.map(|n| n.id)
    }
}
