//! HTTP front door (spec §6 "EXTERNAL INTERFACES"). JSON over HTTP, one
//! route per representative RPC method. The per-method four-phase
//! semantics all live in `vf-engine`/`vf-scheduler`; this module is pure
//! translation between an axum `Json` request/response and
//! `Scheduler::create_and_execute` or a direct `Store` read.
//!
//! Authentication, XSRF, and cookie handling are out of scope (spec §1)
//! -- every handler trusts `user_id`/`device_id` in the request body, the
//! way the teacher's own test harness exercises its API without a real
//! auth layer in front of it.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use vf_core::asset_id::IdPrefix;
use vf_core::errors::VfError;
use vf_core::types::{DeviceId, UserId};
use vf_telemetry::middleware::metrics_middleware;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rpc/allocate_ids", post(allocate_ids))
        .route("/rpc/:method", post(create_and_execute))
        .route("/admin/scan_orphans", post(scan_orphans))
        .route("/rpc/query_viewpoint/:viewpoint_id", get(query_viewpoint))
        .route("/rpc/query_followers/:viewpoint_id", get(query_followers))
        .route("/rpc/query_episode/:episode_id", get(query_episode))
        .route("/rpc/query_notifications/:user_id", get(query_notifications))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Maps a `VfError` to an HTTP status and a stable JSON error envelope
/// (spec §7: "a stable string `id` and a formatted message").
impl IntoResponse for VfErrorResponse {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_retryable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorEnvelope {
            id: self.0.client_id().unwrap_or("internal_error").to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub struct VfErrorResponse(VfError);

impl From<VfError> for VfErrorResponse {
    fn from(e: VfError) -> Self {
        VfErrorResponse(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    id: String,
    message: String,
}

// ---------------------------------------------------------------------
// allocate_ids
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AllocateIdsRequest {
    user_id: UserId,
    /// One of "photo" | "episode" | "comment" | "activity" | "operation" | "viewpoint".
    asset_type: String,
    device_id: DeviceId,
    #[serde(default = "default_count")]
    count: u64,
}

fn default_count() -> u64 {
    1
}

#[derive(Debug, Serialize)]
struct AllocateIdsResponse {
    ids: Vec<String>,
}

fn asset_prefix(asset_type: &str) -> Result<IdPrefix, VfError> {
    match asset_type {
        "photo" => Ok(IdPrefix::Photo),
        "episode" => Ok(IdPrefix::Episode),
        "comment" => Ok(IdPrefix::Comment),
        "activity" => Ok(IdPrefix::Activity),
        "operation" => Ok(IdPrefix::Operation),
        "viewpoint" => Ok(IdPrefix::Viewpoint),
        other => Err(VfError::invalid_request("UNKNOWN_ASSET_TYPE", format!("{other:?} is not a known asset type"))),
    }
}

async fn allocate_ids(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocateIdsRequest>,
) -> Result<Json<AllocateIdsResponse>, VfErrorResponse> {
    let prefix = asset_prefix(&req.asset_type)?;
    let ids = match prefix {
        IdPrefix::Operation | IdPrefix::Viewpoint => {
            let mut ids = Vec::with_capacity(req.count as usize);
            for _ in 0..req.count {
                ids.push(state.allocator.reserve_device_local_id(&req.user_id, prefix, req.device_id).await?);
            }
            ids
        }
        _ => {
            let timestamp = state.clock.now().timestamp() as u64;
            let reverse_ts = prefix == IdPrefix::Photo;
            state
                .allocator
                .reserve_timestamp_ids(&req.user_id, prefix, timestamp, req.device_id, reverse_ts, req.count)
                .await?
        }
    };
    Ok(Json(AllocateIdsResponse { ids }))
}

// ---------------------------------------------------------------------
// CreateAndExecute (all queued operation methods)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateAndExecuteRequest {
    user_id: UserId,
    device_id: DeviceId,
    #[serde(default)]
    synchronous: bool,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CreateAndExecuteResponse {
    operation_id: String,
}

async fn create_and_execute(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    Json(req): Json<CreateAndExecuteRequest>,
) -> Result<Json<CreateAndExecuteResponse>, VfErrorResponse> {
    let operation_id = state
        .scheduler
        .create_and_execute(req.user_id, req.device_id, method, req.args, req.synchronous)
        .await?;
    Ok(Json(CreateAndExecuteResponse { operation_id }))
}

// ---------------------------------------------------------------------
// admin (spec §6 "CLI surface ... reuse the same CreateAndExecute entry
// point"; the orphan scan itself is the one admin action that isn't an
// operation, since it only wakes the Scheduler's existing drain loops)
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ScanOrphansResponse {
    users_enqueued: usize,
}

async fn scan_orphans(State(state): State<Arc<AppState>>) -> Result<Json<ScanOrphansResponse>, VfErrorResponse> {
    let users_enqueued = state.scheduler.scan_for_orphans().await?;
    Ok(Json(ScanOrphansResponse { users_enqueued }))
}

// ---------------------------------------------------------------------
// query_* (pure reads, not operations -- spec §6)
// ---------------------------------------------------------------------

async fn query_viewpoint(
    State(state): State<Arc<AppState>>,
    Path(viewpoint_id): Path<String>,
) -> Result<Response, VfErrorResponse> {
    match state.store.get_viewpoint(&viewpoint_id).await? {
        Some(viewpoint) => Ok(Json(viewpoint).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn query_followers(
    State(state): State<Arc<AppState>>,
    Path(viewpoint_id): Path<String>,
) -> Result<Json<Vec<vf_core::types::Follower>>, VfErrorResponse> {
    Ok(Json(state.store.query_followers(&viewpoint_id).await?))
}

async fn query_episode(
    State(state): State<Arc<AppState>>,
    Path(episode_id): Path<String>,
) -> Result<Response, VfErrorResponse> {
    match state.store.get_episode(&episode_id).await? {
        Some(episode) => {
            let posts = state.store.query_posts(&episode_id).await?;
            Ok(Json(EpisodeResponse { episode, posts }).into_response())
        }
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[derive(Debug, Serialize)]
struct EpisodeResponse {
    episode: vf_core::types::Episode,
    posts: Vec<vf_core::types::Post>,
}

#[derive(Debug, Deserialize)]
struct NotificationsQuery {
    start_after: Option<i64>,
    #[serde(default = "default_notifications_limit")]
    limit: usize,
}

fn default_notifications_limit() -> usize {
    50
}

async fn query_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(q): Query<NotificationsQuery>,
) -> Result<Json<Vec<vf_core::types::Notification>>, VfErrorResponse> {
    Ok(Json(state.store.query_notifications_since(&user_id, q.start_after, q.limit).await?))
}
