//! HTTP and WebSocket routes.
//!
//! - `ws` - the bridge event and command channel
//! - `health` - service health check
//! - `status` - uptime and attached readers
//! - `error` - API error types
//! - `openapi` - OpenAPI document

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod status;
pub mod ws;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Build the application router.
///
/// ```text
/// /ws                    - WebSocket event and command channel
/// /health                - Health check
/// /api
/// ├── /status            - Uptime and attached readers
/// ├── /readers/{name}    - One attached reader
/// └── /openapi.json      - OpenAPI document
/// ```
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .merge(status::router()),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
