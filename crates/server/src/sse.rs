// Streaming transport: GET /sse opens a session, POST /messages?session_id=
// routes a call for that session. The stream carries the handshake,
// heartbeats and the echoed `initialize` response; every call is answered in
// its own POST response.

use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use conduit_mcp::protocol::{JsonRpcError, JsonRpcResponse};
use conduit_mcp::server::parse_request;
use conduit_mcp::session::SessionEvent;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;

/// Event name used when echoing an `initialize` response onto the stream
const INITIALIZED_EVENT: &str = "initialized";

/// Open an SSE session
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state.sessions.open();
    Sse::new(stream.map(|event| Ok(to_sse_event(&event))))
}

fn to_sse_event(event: &SessionEvent) -> Event {
    Event::default().event(event.name()).data(event.data())
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    session_id: Option<String>,
}

/// Route a JSON-RPC call posted for an open session
pub async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let session_id = match query.session_id.as_deref() {
        Some(id) => match state.sessions.lookup(id) {
            Ok(session) => session.id().to_string(),
            Err(e) => {
                tracing::debug!(session_id = id, error = %e, "rejected message for unknown session");
                return invalid_session(&body, Some(id));
            }
        },
        None => return invalid_session(&body, None),
    };

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => return (StatusCode::OK, Json(response)).into_response(),
    };

    let is_initialize = request.method == "initialize";
    let Some(response) = state.mcp.handle(request).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    if is_initialize && !response.is_error() {
        match serde_json::to_value(&response) {
            Ok(data) => {
                let event = SessionEvent::Message {
                    event: INITIALIZED_EVENT.to_string(),
                    data,
                };
                if let Err(e) = state.sessions.notify(&session_id, event) {
                    tracing::debug!(session_id = %session_id, error = %e, "initialize fan-out skipped");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode initialize fan-out"),
        }
    }

    (StatusCode::OK, Json(response)).into_response()
}

/// 400 with an InvalidSession error, echoing the request id when readable
fn invalid_session(body: &[u8], session_id: Option<&str>) -> Response {
    let id = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("id").cloned())
        .filter(|id| id.is_string() || id.is_number())
        .unwrap_or(Value::Null);

    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error(id, JsonRpcError::invalid_session(session_id))),
    )
        .into_response()
}
