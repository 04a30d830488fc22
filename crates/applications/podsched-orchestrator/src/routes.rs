//! HTTP adapter
//!
//! Thin axum routes over [`Cluster`]. Handlers parse input, call exactly one
//! cluster operation and shape the JSON response; validation and scheduling
//! decisions all live in the core.
//!
//! | Route                                | Operation                   |
//! |--------------------------------------|-----------------------------|
//! | `POST /nodes`                        | register a node             |
//! | `GET /nodes`, `GET /nodes/{id}`      | list / look up nodes        |
//! | `POST /pods`                         | place a pod                 |
//! | `GET /pods`, `GET /pods/{id}`        | list / look up pods         |
//! | `POST /heartbeat/{id}`               | record a heartbeat          |
//! | `POST /simulate/heartbeat/{id}`      | same, for manual testing    |
//! | `GET /scheduling-algorithms`         | supported strategies        |
//! | `GET /healthz`                       | liveness of the scheduler   |

use crate::cluster::Cluster;
use crate::error::SchedulerError;
use crate::node::{Node, NodeHealth, NodeId};
use crate::placement::{PlacementOutcome, PlacementStrategy};
use crate::pod::{Pod, PodId};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Scheduler handle
    pub cluster: Cluster,
}

/// Errors returned by HTTP handlers
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// Malformed request input
    #[error("{0}")]
    BadRequest(String),

    /// No healthy node can take the pod
    #[error("No available nodes with sufficient resources")]
    NoCapacity,

    /// Error from the scheduler core
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ApiError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NoCapacity => StatusCode::CONFLICT,
            ApiError::Scheduler(SchedulerError::NodeNotFound(_))
            | ApiError::Scheduler(SchedulerError::PodNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Scheduler(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = ErrorBody {
            status: "error",
            message: self.to_string(),
        };
        (status_code, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn default_units() -> i64 {
    1
}

/// `POST /nodes` body
#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    /// Total capacity in resource units
    #[serde(default = "default_units", alias = "cpu_cores")]
    pub capacity: i64,
}

/// `POST /pods` body
#[derive(Debug, Deserialize)]
pub struct PlacePodRequest {
    /// Resource units required
    #[serde(default = "default_units", alias = "cpu_required")]
    pub demand: i64,

    /// Strategy name; defaults to first fit
    #[serde(default, alias = "strategy")]
    pub algorithm: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterNodeResponse {
    status: &'static str,
    message: String,
    node_id: NodeId,
}

#[derive(Debug, Serialize)]
struct PlacePodResponse {
    status: &'static str,
    message: &'static str,
    pod_id: PodId,
    node_id: NodeId,
    algorithm: PlacementStrategy,
}

/// Node as rendered on the wire
#[derive(Debug, Serialize)]
struct NodeView {
    #[serde(flatten)]
    node: Node,
    pods_count: usize,
}

impl From<Node> for NodeView {
    fn from(node: Node) -> Self {
        let pods_count = node.assigned_pods.len();
        Self { node, pods_count }
    }
}

#[derive(Debug, Serialize)]
struct NodeList {
    nodes: Vec<NodeView>,
}

#[derive(Debug, Serialize)]
struct PodList {
    pods: Vec<Pod>,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    status: &'static str,
    node_id: NodeId,
    health: NodeHealth,
}

#[derive(Debug, Serialize)]
struct StrategiesResponse {
    algorithms: Vec<PlacementStrategy>,
    default: PlacementStrategy,
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

fn parse_node_id(raw: &str) -> ApiResult<NodeId> {
    raw.parse().map_err(ApiError::BadRequest)
}

fn parse_pod_id(raw: &str) -> ApiResult<PodId> {
    raw.parse().map_err(ApiError::BadRequest)
}

async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> ApiResult<(StatusCode, Json<RegisterNodeResponse>)> {
    let node_id = state.cluster.register(req.capacity).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterNodeResponse {
            status: "success",
            message: format!("Node {} added successfully", node_id),
            node_id,
        }),
    ))
}

async fn list_nodes(State(state): State<AppState>) -> Json<NodeList> {
    let nodes = state.cluster.list_nodes().await;
    Json(NodeList {
        nodes: nodes.into_iter().map(NodeView::from).collect(),
    })
}

async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeView>> {
    let node_id = parse_node_id(&node_id)?;
    let node = state.cluster.node(node_id).await?;
    Ok(Json(node.into()))
}

async fn place_pod(
    State(state): State<AppState>,
    Json(req): Json<PlacePodRequest>,
) -> ApiResult<(StatusCode, Json<PlacePodResponse>)> {
    let strategy = match req.algorithm.as_deref() {
        Some(name) => name.parse::<PlacementStrategy>()?,
        None => PlacementStrategy::default(),
    };

    match state.cluster.place(req.demand, strategy).await? {
        PlacementOutcome::Placed { pod_id, node_id } => Ok((
            StatusCode::CREATED,
            Json(PlacePodResponse {
                status: "success",
                message: "Pod launched successfully",
                pod_id,
                node_id,
                algorithm: strategy,
            }),
        )),
        PlacementOutcome::NoCapacity => Err(ApiError::NoCapacity),
    }
}

async fn list_pods(State(state): State<AppState>) -> Json<PodList> {
    Json(PodList {
        pods: state.cluster.list_pods().await,
    })
}

async fn get_pod(
    State(state): State<AppState>,
    Path(pod_id): Path<String>,
) -> ApiResult<Json<Pod>> {
    let pod_id = parse_pod_id(&pod_id)?;
    Ok(Json(state.cluster.pod(pod_id).await?))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let node_id = parse_node_id(&node_id)?;
    let health = state.cluster.heartbeat(node_id).await?;

    Ok(Json(HeartbeatResponse {
        status: "success",
        node_id,
        health,
    }))
}

async fn strategies() -> Json<StrategiesResponse> {
    Json(StrategiesResponse {
        algorithms: Cluster::supported_strategies().to_vec(),
        default: PlacementStrategy::default(),
    })
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

/// Build the router
pub fn router(cluster: Cluster) -> Router {
    Router::new()
        .route("/nodes", post(register_node).get(list_nodes))
        .route("/nodes/{node_id}", get(get_node))
        .route("/pods", post(place_pod).get(list_pods))
        .route("/pods/{pod_id}", get(get_pod))
        .route("/heartbeat/{node_id}", post(heartbeat))
        .route("/simulate/heartbeat/{node_id}", post(heartbeat))
        .route("/scheduling-algorithms", get(strategies))
        .route("/healthz", get(healthz))
        .with_state(AppState { cluster })
}
