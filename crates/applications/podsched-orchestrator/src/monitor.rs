//! Node health monitoring
//!
//! A background loop that, on every tick:
//!
//! ```text
//! 1. Probe every non-terminated node concurrently, each bounded by a timeout
//! 2. Terminate nodes whose probe did not answer "alive"
//! 3. Mark healthy nodes with an overdue heartbeat Unhealthy
//! 4. Recover the pods of every node that changed state
//! ```
//!
//! Probing happens without holding the cluster lock; steps 2-4 run under a
//! single write lock (see [`Cluster::evaluate_health`]). A hanging probe
//! costs at most one probe timeout and is treated as a dead node.
//!
//! Each tick's outcome is published on a `watch` channel so callers can
//! observe the monitor without polling the registries.

use crate::cluster::Cluster;
use crate::error::SchedulerError;
use crate::node::NodeId;
use crate::recovery::RecoveryReport;
use crate::runtime::{Liveness, LivenessProbe, ProbeTarget};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

/// Default time between ticks (seconds)
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 3;

/// Default heartbeat age after which a healthy node turns unhealthy (seconds)
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Default bound on a single liveness probe (seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 2;

/// Health monitor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between ticks
    pub interval: Duration,

    /// Maximum heartbeat age for a healthy node
    pub heartbeat_timeout: Duration,

    /// Maximum time a single probe may take
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

impl MonitorConfig {
    /// Set tick interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set heartbeat timeout
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set probe timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn heartbeat_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.heartbeat_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

/// Outcome of one monitor tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Evaluation time
    pub at: DateTime<Utc>,

    /// Nodes terminated this tick
    pub terminated: Vec<NodeId>,

    /// Nodes marked unhealthy this tick
    pub unhealthy: Vec<NodeId>,

    /// One recovery pass per node that changed state
    pub recoveries: Vec<RecoveryReport>,

    /// Probes that did not answer "alive", including timeouts
    pub probe_failures: usize,
}

impl TickReport {
    /// Empty report for a tick evaluated at `at`
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            terminated: Vec::new(),
            unhealthy: Vec::new(),
            recoveries: Vec::new(),
            probe_failures: 0,
        }
    }

    /// Check if no node changed state
    pub fn is_quiet(&self) -> bool {
        self.terminated.is_empty() && self.unhealthy.is_empty()
    }

    /// Total pods relocated this tick
    pub fn relocated_count(&self) -> usize {
        self.recoveries.iter().map(RecoveryReport::relocated_count).sum()
    }

    /// Total pods failed this tick
    pub fn failed_count(&self) -> usize {
        self.recoveries.iter().map(RecoveryReport::failed_count).sum()
    }
}

/// Periodic liveness and heartbeat checker
pub struct HealthMonitor {
    cluster: Cluster,
    probe: Arc<dyn LivenessProbe>,
    config: MonitorConfig,
    reports: watch::Sender<Option<TickReport>>,
}

impl HealthMonitor {
    /// Create a monitor for `cluster`
    pub fn new(cluster: Cluster, probe: Arc<dyn LivenessProbe>, config: MonitorConfig) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            cluster,
            probe,
            config,
            reports,
        }
    }

    /// Get the monitor configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Receive the report of every completed tick
    pub fn subscribe(&self) -> watch::Receiver<Option<TickReport>> {
        self.reports.subscribe()
    }

    /// Probe all targets concurrently
    async fn probe_all(&self, targets: &[ProbeTarget]) -> Vec<(NodeId, Liveness)> {
        let probes = targets.iter().map(|target| async move {
            let liveness = match timeout(self.config.probe_timeout, self.probe.probe(target)).await {
                Ok(liveness) => liveness,
                Err(_) => {
                    let err = SchedulerError::ProbeTimeout {
                        node_id: target.node_id,
                        timeout: self.config.probe_timeout,
                    };
                    warn!(node_id = %target.node_id, error = %err, "Liveness probe timed out");
                    Liveness::Error(err.to_string())
                }
            };
            (target.node_id, liveness)
        });

        join_all(probes).await
    }

    /// Run one tick now
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick, judging heartbeat age against `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let targets = self.cluster.probe_targets().await;
        let probes = self.probe_all(&targets).await;
        let probe_failures = probes.iter().filter(|(_, l)| !l.is_alive()).count();

        let mut report = self
            .cluster
            .evaluate_health(&probes, now, self.config.heartbeat_timeout_chrono())
            .await;
        report.probe_failures = probe_failures;

        if report.is_quiet() {
            debug!(probed = targets.len(), "Health check passed");
        } else {
            info!(
                terminated = report.terminated.len(),
                unhealthy = report.unhealthy.len(),
                relocated = report.relocated_count(),
                failed = report.failed_count(),
                "Health check found failed nodes"
            );
        }

        self.reports.send_replace(Some(report.clone()));
        report
    }

    /// Tick until `shutdown` turns true or its sender is dropped.
    ///
    /// A tick that has started always completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            heartbeat_timeout_secs = self.config.heartbeat_timeout.as_secs(),
            probe_timeout_ms = self.config.probe_timeout.as_millis() as u64,
            "Health monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            self.tick().await;
        }

        info!("Health monitor stopped");
    }

    /// Run the monitor on a background task
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reports = self.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx));

        MonitorHandle {
            shutdown_tx,
            task,
            reports,
        }
    }
}

/// Handle to a spawned [`HealthMonitor`]
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    reports: watch::Receiver<Option<TickReport>>,
}

impl MonitorHandle {
    /// Receiver for tick reports
    pub fn reports(&self) -> watch::Receiver<Option<TickReport>> {
        self.reports.clone()
    }

    /// Stop the monitor and wait for the in-flight tick to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Health monitor task ended abnormally");
        }
    }
}
