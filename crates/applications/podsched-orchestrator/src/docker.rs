//! Container-backed node runtime
//!
//! Each registered node is backed by an idle container. The container being
//! up is what "the node is alive" means to the health monitor; stopping or
//! removing it by hand simulates a node crash.

use crate::error::{Result, SchedulerError};
use crate::runtime::{Liveness, LivenessProbe, ProbeTarget, Provisioner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

/// Label set on every container this crate creates
pub const MANAGED_LABEL: &str = "podsched";

/// Label carrying the id of the runtime that created the container
pub const RUN_LABEL: &str = "podsched.run";

/// Container configuration for backing units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Image for backing containers
    #[serde(default = "default_image")]
    pub image: String,

    /// Command keeping the container alive
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Container name prefix
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Pass node capacity to `--cpus`
    #[serde(default)]
    pub limit_cpus: bool,
}

fn default_image() -> String {
    "alpine".to_string()
}

fn default_command() -> Vec<String> {
    vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]
}

fn default_name_prefix() -> String {
    "podsched-node".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            command: default_command(),
            name_prefix: default_name_prefix(),
            limit_cpus: false,
        }
    }
}

impl DockerConfig {
    /// Set image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set container name prefix
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Limit each container to its node's capacity in CPUs
    pub fn with_cpu_limits(mut self, enabled: bool) -> Self {
        self.limit_cpus = enabled;
        self
    }

    /// Build Docker run arguments
    fn docker_run_args(&self, run_id: &str, name: &str, total_capacity: u64) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{}=true", MANAGED_LABEL),
            "--label".to_string(),
            format!("{}={}", RUN_LABEL, run_id),
        ];

        if self.limit_cpus {
            args.push("--cpus".to_string());
            args.push(total_capacity.to_string());
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Docker runtime: provisions backing containers and probes them
pub struct DockerRuntime {
    /// Container configuration
    config: DockerConfig,

    /// Unique id of this runtime, used to scope teardown
    run_id: String,
}

impl DockerRuntime {
    /// Create a runtime with a fresh run id
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            run_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Get the run id
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Check that the Docker daemon is reachable, returning its version
    pub async fn check_available(&self) -> Result<String> {
        let output = AsyncCommand::new("docker")
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::docker(format!(
                "Docker daemon unavailable: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn container_name(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.config.name_prefix, &suffix[..12])
    }

    /// Ask Docker whether a container is running
    async fn inspect_running(&self, container_id: &str) -> Liveness {
        let output = AsyncCommand::new("docker")
            .args(["inspect", "-f", "{{.State.Running}}", container_id])
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(o) if o.status.success() => {
                parse_inspect_output(&String::from_utf8_lossy(&o.stdout))
            }
            Ok(o) => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                if stderr.contains("No such object") || stderr.contains("No such container") {
                    Liveness::NotAlive
                } else {
                    Liveness::Error(stderr.trim().to_string())
                }
            }
            Err(e) => Liveness::Error(format!("Failed to run docker: {}", e)),
        }
    }

    async fn list_run_containers(&self) -> Result<Vec<String>> {
        let output = AsyncCommand::new("docker")
            .args([
                "ps",
                "-aq",
                "--filter",
                &format!("label={}={}", RUN_LABEL, self.run_id),
            ])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::docker(format!(
                "Failed to list containers: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Map `docker inspect -f {{.State.Running}}` output to liveness
fn parse_inspect_output(stdout: &str) -> Liveness {
    match stdout.trim() {
        "true" => Liveness::Alive,
        "false" => Liveness::NotAlive,
        other => Liveness::Error(format!("Unexpected inspect output: {:?}", other)),
    }
}

#[async_trait]
impl Provisioner for DockerRuntime {
    async fn provision(&self, total_capacity: u64) -> Result<Option<String>> {
        let name = self.container_name();
        let args = self.config.docker_run_args(&self.run_id, &name, total_capacity);

        debug!("Docker run command: {:?}", args);

        let output = AsyncCommand::new("docker")
            .args(&args)
            .output()
            .await
            .map_err(|e| SchedulerError::provision(format!("Failed to run docker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::provision(format!(
                "Container failed to start: {}",
                stderr.trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(container = %name, container_id = %container_id, "Backing container started");

        Ok(Some(container_id))
    }

    async fn teardown(&self) -> Result<usize> {
        let containers = self.list_run_containers().await?;
        if containers.is_empty() {
            return Ok(0);
        }

        info!(count = containers.len(), run_id = %self.run_id, "Removing backing containers");

        let output = AsyncCommand::new("docker")
            .arg("rm")
            .arg("-f")
            .args(&containers)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(error = %stderr.trim(), "Some backing containers could not be removed");
        }

        Ok(containers.len())
    }
}

#[async_trait]
impl LivenessProbe for DockerRuntime {
    async fn probe(&self, target: &ProbeTarget) -> Liveness {
        match target.backing_unit.as_deref() {
            Some(container_id) => self.inspect_running(container_id).await,
            None => Liveness::Error(format!("{} has no backing container", target.node_id)),
        }
    }
}
