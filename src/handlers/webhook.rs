use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::error::CoreError;
use crate::AppState;

/// Provider callback endpoint. The body must arrive raw — signature
/// verification runs over the exact bytes on the wire.
///
/// Rejected and duplicate events are still acknowledged 200 so the
/// provider does not retry forever; the rejection is visible in the
/// audit trail, not to the sender. Only malformed requests (unknown
/// provider, unparseable body) are 4xx.
pub async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, CoreError> {
    let disposition = state
        .orchestrator
        .handle_webhook(&provider, &body, &headers)
        .await?;

    tracing::debug!(provider = %provider, disposition = ?disposition, "webhook acknowledged");
    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}
