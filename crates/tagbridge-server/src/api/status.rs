//! Bridge status endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::AppState;

/// Creates the status router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/readers/{name}", get(get_reader))
}

/// Bridge status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "version": "0.1.0",
    "uptime_secs": 3600,
    "readers": ["ACS ACR122U PICC Interface 00 00"],
    "current_reader": "ACS ACR122U PICC Interface 00 00",
    "clients": 1
}))]
pub struct StatusResponse {
    /// Server version.
    pub version: String,

    /// Server uptime in seconds.
    pub uptime_secs: u64,

    /// Attached readers, oldest first.
    pub readers: Vec<String>,

    /// The reader that receives client commands.
    #[schema(nullable)]
    pub current_reader: Option<String>,

    /// Open WebSocket connections.
    pub clients: usize,
}

/// One attached reader.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReaderResponse {
    /// PC/SC reader name.
    pub name: String,

    /// Presence epoch; advances on every tag arrival and departure.
    pub presence_epoch: u64,

    /// Whether client commands are routed to this reader.
    pub current: bool,
}

/// Report uptime and attached readers.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Get bridge status",
    responses(
        (status = 200, description = "Bridge status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let registry = state.registry();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        readers: registry.readers(),
        current_reader: registry.current_reader(),
        clients: state.clients(),
    })
}

/// Look up one attached reader.
#[utoipa::path(
    get,
    path = "/api/readers/{name}",
    tag = "readers",
    operation_id = "getReader",
    summary = "Get an attached reader",
    params(
        ("name" = String, Path, description = "PC/SC reader name")
    ),
    responses(
        (status = 200, description = "Reader found", body = ReaderResponse),
        (status = 404, description = "No reader with that name", body = ErrorResponse)
    )
)]
pub async fn get_reader(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ReaderResponse>> {
    let registry = state.registry();
    let link = registry
        .link(&name)
        .ok_or_else(|| ApiError::reader_not_found(&name))?;
    Ok(Json(ReaderResponse {
        current: registry.current_reader().as_deref() == Some(link.name()),
        presence_epoch: link.clock().current(),
        name: link.name().to_string(),
    }))
}
