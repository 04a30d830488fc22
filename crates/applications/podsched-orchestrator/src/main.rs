//! Podsched - minimal cluster scheduler
//!
//! ## Usage
//!
//! ```bash
//! # Serve the HTTP API with container-backed nodes
//! podsched serve --bind 0.0.0.0:5000
//!
//! # Pure in-memory nodes (every node reported alive)
//! podsched serve --runtime none
//!
//! # Write logs to a daily rolling file as well as stdout
//! podsched --log-dir ./logs serve
//!
//! # List placement strategies
//! podsched strategies
//! ```
//!
//! On Ctrl+C the server stops accepting requests, the health monitor finishes
//! its current tick, and every backing container this process created is
//! removed.

use clap::{Args, Parser, Subcommand, ValueEnum};
use podsched_orchestrator::{
    Cluster, DockerConfig, DockerRuntime, HealthMonitor, LivenessProbe, MonitorConfig, NoopRuntime,
    PlacementStrategy, Provisioner, SchedulerError, router,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Podsched: place pods on nodes, move them when nodes fail
#[derive(Parser)]
#[command(name = "podsched")]
#[command(about = "Minimal cluster scheduler with failure recovery", long_about = None)]
struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, env = "PODSCHED_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and its HTTP API
    Serve(ServeArgs),

    /// Print the supported placement strategies
    Strategies,
}

/// Node runtime backing each registered node
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeKind {
    /// One idle container per node
    Docker,
    /// No backing units; probes always report alive
    #[value(name = "none")]
    InMemory,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PODSCHED_BIND", default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Seconds between health checks
    #[arg(long, env = "PODSCHED_MONITOR_INTERVAL_SECS", default_value_t = podsched_orchestrator::DEFAULT_MONITOR_INTERVAL_SECS)]
    monitor_interval_secs: u64,

    /// Heartbeat age (seconds) after which a node is unhealthy
    #[arg(long, env = "PODSCHED_HEARTBEAT_TIMEOUT_SECS", default_value_t = podsched_orchestrator::DEFAULT_HEARTBEAT_TIMEOUT_SECS)]
    heartbeat_timeout_secs: u64,

    /// Bound on a single liveness probe (seconds)
    #[arg(long, env = "PODSCHED_PROBE_TIMEOUT_SECS", default_value_t = podsched_orchestrator::DEFAULT_PROBE_TIMEOUT_SECS)]
    probe_timeout_secs: u64,

    /// Node runtime
    #[arg(long, value_enum, env = "PODSCHED_RUNTIME", default_value_t = RuntimeKind::Docker)]
    runtime: RuntimeKind,

    /// Image for backing containers
    #[arg(long, env = "PODSCHED_IMAGE", default_value = "alpine")]
    image: String,

    /// Limit each backing container to its node's capacity in CPUs
    #[arg(long, env = "PODSCHED_LIMIT_CPUS")]
    limit_cpus: bool,
}

impl ServeArgs {
    fn monitor_config(&self) -> Result<MonitorConfig, SchedulerError> {
        if self.monitor_interval_secs == 0 {
            return Err(SchedulerError::config("monitor interval must be at least 1 second"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(SchedulerError::config("probe timeout must be at least 1 second"));
        }

        Ok(MonitorConfig::default()
            .with_interval(Duration::from_secs(self.monitor_interval_secs))
            .with_heartbeat_timeout(Duration::from_secs(self.heartbeat_timeout_secs))
            .with_probe_timeout(Duration::from_secs(self.probe_timeout_secs)))
    }
}

/// Install the stdout layer and, with `log_dir`, a non-blocking file layer.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "podsched.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podsched=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Strategies => {
            for strategy in Cluster::supported_strategies() {
                let marker = if *strategy == PlacementStrategy::default() {
                    " (default)"
                } else {
                    ""
                };
                println!("{}{}", strategy, marker);
            }
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.monitor_config()?;
    let listener = tokio::net::TcpListener::bind(args.bind).await?;

    let (provisioner, probe): (Arc<dyn Provisioner>, Arc<dyn LivenessProbe>) = match args.runtime {
        RuntimeKind::Docker => {
            let runtime = Arc::new(DockerRuntime::new(
                DockerConfig::default()
                    .with_image(&args.image)
                    .with_cpu_limits(args.limit_cpus),
            ));
            let version = runtime.check_available().await?;
            info!(version = %version, run_id = %runtime.run_id(), image = %args.image, "Docker daemon available");

            let provisioner: Arc<dyn Provisioner> = runtime.clone();
            let probe: Arc<dyn LivenessProbe> = runtime;
            (provisioner, probe)
        }
        RuntimeKind::InMemory => (Arc::new(NoopRuntime), Arc::new(NoopRuntime)),
    };

    let cluster = Cluster::new(provisioner.clone());
    let monitor = HealthMonitor::new(cluster.clone(), probe, config).spawn();

    info!(addr = %args.bind, runtime = ?args.runtime, "Scheduler listening");

    let served = axum::serve(listener, router(cluster))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    monitor.shutdown().await;

    match provisioner.teardown().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Backing units removed"),
        Err(e) => warn!(error = %e, "Failed to remove backing units"),
    }

    served?;
    info!("Scheduler stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
