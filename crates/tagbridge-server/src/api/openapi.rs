//! OpenAPI document for the tagbridge HTTP surface and WebSocket frames.
//!
//! The WebSocket frames are not HTTP operations, so they appear only as
//! component schemas (`InboundMessage`, `OutboundEvent` and friends) that
//! client generators can pick up.

use axum::Json;
use tagbridge_core::{
    AuthOutcome, Confidence, InboundMessage, NdefContent, NdefRecord, OutboundEvent,
    OutboundMessage, PasswordFormat, ProtectionStatus, RecordType, TagMemoryInfo, TagStandard,
    TagSummary, WriteOutcome, WriteRequest,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::status::{ReaderResponse, StatusResponse};

/// Serve the document at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The document as pretty-printed JSON, for the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document for tagbridge.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "tagbridge API",
        version = "0.1.0",
        description = r#"
# tagbridge API

A local bridge between an ACR122U NFC reader and browser clients.

## Overview

- **`/ws`**: the event and command channel. Tag arrivals and removals are
  pushed as they happen; clients send `authenticate` and `write` frames
  and get a matching `auth_result` or `write_result`.
- **HTTP**: health, status and reader lookups for monitoring.

Byte sequences (UIDs, ATRs, passwords, NDEF payloads) are uppercase hex
strings. Every outbound frame carries an RFC 3339 `timestamp`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local tagbridge server")
    ),
    tags(
        (name = "system", description = "Health checks and bridge status"),
        (name = "readers", description = "Attached PC/SC readers"),
        (name = "bridge", description = "WebSocket event and command channel")
    ),
    paths(
        super::health::health_check,
        super::status::get_status,
        super::status::get_reader,
        super::ws::ws_handler,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            StatusResponse,
            ReaderResponse,
            // WebSocket frames
            InboundMessage,
            WriteRequest,
            OutboundEvent,
            OutboundMessage,
            TagSummary,
            AuthOutcome,
            WriteOutcome,
            ProtectionStatus,
            TagMemoryInfo,
            TagStandard,
            NdefContent,
            NdefRecord,
            RecordType,
            PasswordFormat,
            Confidence,
        )
    )
)]
pub struct ApiDoc;
