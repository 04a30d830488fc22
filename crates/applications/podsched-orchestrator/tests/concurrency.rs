//! Concurrent placement, heartbeats and recovery against one cluster.
//!
//! Runs on a multi-threaded runtime so operations genuinely interleave, then
//! checks that capacity accounting and ownership survived.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use podsched_orchestrator::{
    Cluster, ClusterSnapshot, HealthMonitor, Liveness, MonitorConfig, NodeHealth,
    PlacementOutcome, PlacementStrategy, PodId, PodState, ScriptedProbe,
};

fn assert_consistent(snapshot: &ClusterSnapshot) {
    let mut owners: HashMap<PodId, usize> = HashMap::new();

    for node in &snapshot.nodes {
        let held: u64 = snapshot
            .pods
            .iter()
            .filter(|p| p.node_id == Some(node.id) && p.state.holds_capacity())
            .map(|p| p.demand)
            .sum();
        assert_eq!(node.available_capacity + held, node.total_capacity, "drift on {}", node.id);

        for pod_id in &node.assigned_pods {
            *owners.entry(*pod_id).or_default() += 1;
        }
    }

    assert!(owners.values().all(|n| *n == 1), "pod listed by several nodes");

    for pod in &snapshot.pods {
        match pod.state {
            PodState::Running => {
                let node_id = pod.node_id.expect("running pod has a node");
                let node = snapshot.nodes.iter().find(|n| n.id == node_id).unwrap();
                assert!(node.assigned_pods.contains(&pod.id));
            }
            PodState::Failed => assert!(!owners.contains_key(&pod.id)),
            PodState::Rescheduling => panic!("{} left mid-recovery", pod.id),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_placements_never_overcommit() {
    let cluster = Cluster::in_memory();
    for capacity in [5, 3, 8, 2] {
        cluster.register(capacity).await.unwrap();
    }

    let tasks = (0..120).map(|i| {
        let cluster = cluster.clone();
        let strategy = PlacementStrategy::ALL[i % 3];
        tokio::spawn(async move { cluster.place((i % 3 + 1) as i64, strategy).await })
    });

    let outcomes: Vec<PlacementOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let placed = outcomes.iter().filter(|o| o.is_placed()).count();
    let snapshot = cluster.snapshot().await;

    assert_eq!(snapshot.pods.len(), placed);
    assert!(snapshot.nodes.iter().all(|n| n.available_capacity == 0));
    assert_consistent(&snapshot);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_recoveries_move_each_pod_once() {
    let cluster = Cluster::in_memory();
    let a = cluster.register(10).await.unwrap();
    for _ in 0..10 {
        cluster.place(1, PlacementStrategy::FirstFit).await.unwrap();
    }
    cluster.register(6).await.unwrap();
    cluster.register(6).await.unwrap();

    // Several health rounds see the same dead node at once
    let rounds = (0..8).map(|_| {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            cluster
                .evaluate_health(&[(a, Liveness::NotAlive)], Utc::now(), chrono::Duration::seconds(30))
                .await
        })
    });

    let reports: Vec<_> = join_all(rounds)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let moved: Vec<PodId> = reports
        .iter()
        .flat_map(|r| r.recoveries.iter())
        .flat_map(|r| r.relocated.iter().map(|m| m.pod_id))
        .collect();
    let unique: BTreeSet<PodId> = moved.iter().copied().collect();

    assert_eq!(moved.len(), 10);
    assert_eq!(unique.len(), 10);
    assert_eq!(reports.iter().filter(|r| r.terminated == vec![a]).count(), 1);

    // Explicit recoveries racing afterwards find nothing left to move
    let tasks = (0..8).map(|_| {
        let cluster = cluster.clone();
        tokio::spawn(async move { cluster.recover(a).await })
    });
    for joined in join_all(tasks).await {
        assert!(joined.unwrap().unwrap().is_noop());
    }

    assert_consistent(&cluster.snapshot().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_placement_races_monitor() {
    let cluster = Cluster::in_memory();
    let mut nodes = Vec::new();
    for _ in 0..6 {
        nodes.push(cluster.register(4).await.unwrap());
    }

    let probe = Arc::new(ScriptedProbe::new());
    let config = MonitorConfig::default()
        .with_interval(Duration::from_millis(5))
        .with_probe_timeout(Duration::from_millis(50));
    let handle = HealthMonitor::new(cluster.clone(), probe.clone(), config).spawn();

    let placers = (0..4).map(|worker| {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            for i in 0..25 {
                let strategy = PlacementStrategy::ALL[(worker + i) % 3];
                cluster.place(1, strategy).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    });

    let heartbeats = {
        let cluster = cluster.clone();
        let nodes = nodes.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                for node_id in &nodes {
                    cluster.heartbeat(*node_id).await.unwrap();
                }
                tokio::task::yield_now().await;
            }
        })
    };

    // Take nodes down while placements are in flight
    for node_id in &nodes[..3] {
        probe.kill(*node_id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for joined in join_all(placers).await {
        joined.unwrap();
    }
    heartbeats.await.unwrap();

    // Let the monitor observe the last kill before stopping it
    let killed = nodes[2];
    tokio::time::timeout(Duration::from_secs(2), async {
        while cluster.node(killed).await.unwrap().health != NodeHealth::Terminated {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("monitor should terminate the killed node");
    handle.shutdown().await;

    let snapshot = cluster.snapshot().await;
    for node_id in &nodes[..3] {
        let node = snapshot.nodes.iter().find(|n| n.id == *node_id).unwrap();
        assert_eq!(node.health, NodeHealth::Terminated);
        assert!(node.assigned_pods.is_empty());
    }
    assert_consistent(&snapshot);
}
