//! End-to-end scheduling scenarios.
//!
//! Drives placement, heartbeats and the health monitor through the public
//! API, checking the capacity and assignment invariants after every step.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use podsched_orchestrator::{
    Cluster, ClusterSnapshot, HealthMonitor, MonitorConfig, NodeHealth, NodeId, PlacementOutcome,
    PlacementStrategy, PodId, PodState, ScriptedProbe,
};

fn placed(outcome: PlacementOutcome) -> (PodId, NodeId) {
    match outcome {
        PlacementOutcome::Placed { pod_id, node_id } => (pod_id, node_id),
        PlacementOutcome::NoCapacity => panic!("expected placement"),
    }
}

/// Capacity matches held demand, assigned sets match pod owners, and no pod
/// is listed by two nodes.
fn assert_invariants(snapshot: &ClusterSnapshot) {
    for node in &snapshot.nodes {
        let held: Vec<_> = snapshot
            .pods
            .iter()
            .filter(|p| p.node_id == Some(node.id) && p.state.holds_capacity())
            .collect();

        let demand: u64 = held.iter().map(|p| p.demand).sum();
        assert_eq!(
            node.available_capacity + demand,
            node.total_capacity,
            "capacity drift on {}",
            node.id
        );

        let owned: BTreeSet<PodId> = held.iter().map(|p| p.id).collect();
        assert_eq!(node.assigned_pods, owned, "assigned set drift on {}", node.id);
    }

    for pod in &snapshot.pods {
        let owners = snapshot
            .nodes
            .iter()
            .filter(|n| n.assigned_pods.contains(&pod.id))
            .count();
        assert!(owners <= 1, "{} assigned to {} nodes", pod.id, owners);

        if pod.state == PodState::Failed {
            assert_eq!(pod.node_id, None);
            assert_eq!(owners, 0);
        }
    }
}

fn monitor(cluster: &Cluster, probe: Arc<ScriptedProbe>) -> HealthMonitor {
    let config = MonitorConfig::default()
        .with_heartbeat_timeout(Duration::from_secs(30))
        .with_probe_timeout(Duration::from_millis(100));
    HealthMonitor::new(cluster.clone(), probe, config)
}

#[tokio::test]
async fn test_first_fit_reserves_capacity() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(4).await.unwrap();

    let (p1, node) = placed(cluster.place(2, PlacementStrategy::FirstFit).await.unwrap());

    assert_eq!(node, a);
    assert_eq!(cluster.node(a).await.unwrap().available_capacity, 2);
    assert_eq!(cluster.pod(p1).await.unwrap().state, PodState::Running);
    assert_invariants(&cluster.snapshot().await);
}

#[tokio::test]
async fn test_best_fit_no_capacity() {
    let cluster = Cluster::in_memory();
    cluster.register(4).await.unwrap();
    placed(cluster.place(2, PlacementStrategy::FirstFit).await.unwrap());
    cluster.register(2).await.unwrap();
    let before = cluster.snapshot().await;

    let outcome = cluster.place(3, PlacementStrategy::BestFit).await.unwrap();

    assert_eq!(outcome, PlacementOutcome::NoCapacity);
    let after = cluster.snapshot().await;
    assert_eq!(before.nodes, after.nodes);
    assert_eq!(before.pods, after.pods);
}

#[tokio::test]
async fn test_best_fit_picks_tightest_node() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(2).await.unwrap();
    placed(cluster.place(1, PlacementStrategy::FirstFit).await.unwrap());
    let b = cluster.register(3).await.unwrap();

    let (_, node) = placed(cluster.place(1, PlacementStrategy::BestFit).await.unwrap());

    assert_eq!(node, a);
    assert_eq!(cluster.node(b).await.unwrap().available_capacity, 3);
    assert_invariants(&cluster.snapshot().await);
}

#[tokio::test]
async fn test_worst_fit_picks_roomiest_node() {
    let cluster = Cluster::in_memory();
    cluster.register(3).await.unwrap();
    let b = cluster.register(5).await.unwrap();

    let (_, node) = placed(cluster.place(1, PlacementStrategy::WorstFit).await.unwrap());

    assert_eq!(node, b);
}

#[tokio::test]
async fn test_dead_node_pods_recovered_independently() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(3).await.unwrap();
    let (p1, _) = placed(cluster.place(2, PlacementStrategy::FirstFit).await.unwrap());
    let (p2, _) = placed(cluster.place(1, PlacementStrategy::FirstFit).await.unwrap());
    let b = cluster.register(1).await.unwrap();

    let probe = Arc::new(ScriptedProbe::new());
    probe.kill(a);
    let report = monitor(&cluster, probe).tick().await;

    assert_eq!(report.terminated, vec![a]);
    assert_eq!(report.relocated_count(), 1);
    assert_eq!(report.failed_count(), 1);

    let p1 = cluster.pod(p1).await.unwrap();
    assert_eq!(p1.state, PodState::Failed);
    assert_eq!(p1.node_id, None);

    let p2 = cluster.pod(p2).await.unwrap();
    assert_eq!(p2.state, PodState::Running);
    assert_eq!(p2.node_id, Some(b));
    assert_eq!(p2.relocations, 1);

    assert_eq!(cluster.node(a).await.unwrap().health, NodeHealth::Terminated);
    assert_eq!(cluster.node(b).await.unwrap().available_capacity, 0);
    assert_invariants(&cluster.snapshot().await);
}

#[tokio::test]
async fn test_silent_node_becomes_unhealthy() {
    let cluster = Cluster::in_memory();
    let c = cluster.register(2).await.unwrap();
    let (pod_id, _) = placed(cluster.place(2, PlacementStrategy::FirstFit).await.unwrap());
    let d = cluster.register(4).await.unwrap();

    let later = Utc::now() + chrono::Duration::seconds(31);
    cluster.heartbeat_at(d, later).await.unwrap();

    let report = monitor(&cluster, Arc::new(ScriptedProbe::new()))
        .tick_at(later)
        .await;

    assert_eq!(report.unhealthy, vec![c]);
    assert!(report.terminated.is_empty());
    assert_eq!(cluster.node(c).await.unwrap().health, NodeHealth::Unhealthy);

    let pod = cluster.pod(pod_id).await.unwrap();
    assert_eq!(pod.node_id, Some(d));
    assert_eq!(pod.state, PodState::Running);
    assert_invariants(&cluster.snapshot().await);

    // A flaky node comes back on its next heartbeat and is schedulable again
    assert_eq!(cluster.heartbeat_at(c, later).await.unwrap(), NodeHealth::Healthy);
    let (_, node) = placed(cluster.place(2, PlacementStrategy::FirstFit).await.unwrap());
    assert_eq!(node, c);
}

#[tokio::test]
async fn test_terminated_node_absorbs_heartbeats() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(4).await.unwrap();

    let probe = Arc::new(ScriptedProbe::new());
    probe.fail(a, "container missing");
    let monitor = monitor(&cluster, probe);
    monitor.tick().await;

    for _ in 0..3 {
        assert_eq!(cluster.heartbeat(a).await.unwrap(), NodeHealth::Terminated);
    }
    assert_eq!(
        cluster.place(1, PlacementStrategy::WorstFit).await.unwrap(),
        PlacementOutcome::NoCapacity
    );

    // Terminated nodes are no longer probed, so later ticks leave them alone
    let report = monitor.tick().await;
    assert!(report.is_quiet());
    assert_eq!(report.probe_failures, 0);
}

#[tokio::test]
async fn test_failed_pod_is_never_revived() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(2).await.unwrap();
    let (pod_id, _) = placed(cluster.place(2, PlacementStrategy::FirstFit).await.unwrap());

    let probe = Arc::new(ScriptedProbe::new());
    probe.kill(a);
    let monitor = monitor(&cluster, probe);
    monitor.tick().await;
    assert_eq!(cluster.pod(pod_id).await.unwrap().state, PodState::Failed);

    // Capacity appears, but nothing retries the failed pod
    cluster.register(8).await.unwrap();
    monitor.tick().await;
    cluster.recover(a).await.unwrap();

    let pod = cluster.pod(pod_id).await.unwrap();
    assert_eq!(pod.state, PodState::Failed);
    assert_eq!(pod.node_id, None);
    assert_invariants(&cluster.snapshot().await);
}

#[tokio::test]
async fn test_recovery_twice_matches_once() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(4).await.unwrap();
    placed(cluster.place(3, PlacementStrategy::FirstFit).await.unwrap());
    placed(cluster.place(1, PlacementStrategy::FirstFit).await.unwrap());
    cluster.register(3).await.unwrap();

    let probe = Arc::new(ScriptedProbe::new());
    probe.kill(a);
    let tick = monitor(&cluster, probe).tick().await;
    let after_first = cluster.snapshot().await;
    let second = cluster.recover(a).await.unwrap();
    let after_second = cluster.snapshot().await;

    assert_eq!(tick.relocated_count() + tick.failed_count(), 2);
    assert!(second.is_noop());
    assert_eq!(after_first.pods, after_second.pods);
    assert_eq!(after_first.nodes, after_second.nodes);
    assert_invariants(&after_second);
}

#[tokio::test]
async fn test_late_heartbeat_keeps_node_unschedulable() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(4).await.unwrap();
    let t0 = cluster.node(a).await.unwrap().last_heartbeat;
    let monitor = monitor(&cluster, Arc::new(ScriptedProbe::new()));

    let report = monitor.tick_at(t0 + chrono::Duration::seconds(45)).await;
    assert_eq!(report.unhealthy, vec![a]);

    // A delayed heartbeat from before the outage does not bring the node back
    let delayed = t0 - chrono::Duration::seconds(100);
    assert_eq!(cluster.heartbeat_at(a, delayed).await.unwrap(), NodeHealth::Unhealthy);
    assert_eq!(
        cluster.place(2, PlacementStrategy::FirstFit).await.unwrap(),
        PlacementOutcome::NoCapacity
    );

    let report = monitor.tick_at(t0 + chrono::Duration::seconds(46)).await;
    assert!(report.is_quiet());
    assert!(cluster.list_pods().await.is_empty());
    assert_invariants(&cluster.snapshot().await);
}

#[tokio::test]
async fn test_placement_is_deterministic() {
    async fn build() -> Cluster {
        let cluster = Cluster::in_memory();
        for capacity in [4, 2, 6, 2, 6] {
            cluster.register(capacity).await.unwrap();
        }
        cluster
    }

    for strategy in PlacementStrategy::ALL {
        let left = build().await;
        let right = build().await;

        for demand in [1, 2, 2, 3, 1, 4] {
            let l = left.place(demand, strategy).await.unwrap();
            let r = right.place(demand, strategy).await.unwrap();
            assert_eq!(l, r, "{} diverged on demand {}", strategy, demand);
        }
    }
}

#[tokio::test]
async fn test_worst_fit_tie_goes_to_earliest() {
    let cluster = Cluster::in_memory();
    let first = cluster.register(6).await.unwrap();
    cluster.register(6).await.unwrap();

    let (_, node) = placed(cluster.place(1, PlacementStrategy::WorstFit).await.unwrap());
    assert_eq!(node, first);
}

#[tokio::test]
async fn test_recovery_ignores_original_strategy() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(8).await.unwrap();
    let (pod_id, _) = placed(cluster.place(2, PlacementStrategy::WorstFit).await.unwrap());
    let b = cluster.register(3).await.unwrap();
    cluster.register(10).await.unwrap();

    let probe = Arc::new(ScriptedProbe::new());
    probe.kill(a);
    let report = monitor(&cluster, probe).tick().await;

    // First fit lands on b even though worst fit would pick the larger node
    assert_eq!(report.recoveries[0].relocated[0].to, b);
    let pod = cluster.pod(pod_id).await.unwrap();
    assert_eq!(pod.node_id, Some(b));
    assert_eq!(pod.strategy, PlacementStrategy::WorstFit);
}
