use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Synchronous transport: one POST body, one JSON-RPC response
pub async fn handle_mcp(State(state): State<AppState>, body: Bytes) -> Response {
    match state.mcp.dispatch(&body).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
