use crate::config::{AppState, ServerConfig, TransportMode};
use crate::sse;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use conduit_mcp::protocol::{ServerCapabilities, DEFAULT_PROTOCOL_VERSION};
use conduit_mcp::SessionManager;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server and run until a shutdown signal arrives
pub async fn serve(config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config)?;
    let sessions = state.sessions.clone();

    let app = create_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(
        transport = config.transport.as_str(),
        "API server listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sessions))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Create the API router for the configured transport
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/", get(server_summary));

    let router = match state.config.transport {
        TransportMode::Http => router.route("/mcp", post(handlers::handle_mcp)),
        TransportMode::Sse => router
            .route("/sse", get(sse::sse_handler))
            .route("/messages", post(sse::message_handler)),
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().include_headers(true))
                        .on_response(DefaultOnResponse::new().include_headers(true)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Resolves on Ctrl-C or SIGTERM, closing every open session so that
/// long-lived SSE responses finish and graceful shutdown can complete
async fn shutdown_signal(sessions: SessionManager) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    sessions.close_all();
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Server and capability summary
async fn server_summary(State(state): State<AppState>) -> impl IntoResponse {
    let info = state.mcp.server_info();
    let endpoints = match state.config.transport {
        TransportMode::Http => serde_json::json!({ "mcp": "/mcp", "health": "/health" }),
        TransportMode::Sse => serde_json::json!({
            "sse": "/sse",
            "messages": "/messages?session_id=<id>",
            "health": "/health"
        }),
    };
    let tools: Vec<_> = state
        .mcp
        .registry()
        .list_schemas()
        .into_iter()
        .map(|schema| schema.name)
        .collect();

    Json(serde_json::json!({
        "name": info.name,
        "version": info.version,
        "transport": state.config.transport.as_str(),
        "protocolVersion": DEFAULT_PROTOCOL_VERSION,
        "capabilities": ServerCapabilities::tools_only(),
        "methods": state.mcp.methods(),
        "endpoints": endpoints,
        "tools": tools,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, FileConfig};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state(transport: TransportMode) -> AppState {
        let config = ServerConfig::resolve(
            FileConfig::default(),
            ConfigOverrides {
                transport: Some(transport),
                ..Default::default()
            },
        )
        .unwrap();
        AppState::new(&config).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Reads SSE frames until one with the given event name appears
    async fn next_event(
        stream: &mut (impl futures::Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin),
        name: &str,
    ) -> String {
        let mut buffer = String::new();
        loop {
            let chunk = stream.next().await.expect("stream ended").unwrap();
            buffer.push_str(std::str::from_utf8(&chunk).unwrap());
            while let Some(end) = buffer.find("\n\n") {
                let frame = buffer[..end].to_string();
                buffer.drain(..end + 2);
                let event = frame
                    .lines()
                    .find_map(|l| l.strip_prefix("event: "))
                    .unwrap_or_default();
                if event == name {
                    return frame
                        .lines()
                        .filter_map(|l| l.strip_prefix("data: "))
                        .collect::<Vec<_>>()
                        .join("\n");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state(TransportMode::Http));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_summary_lists_tools() {
        let app = create_router(state(TransportMode::Sse));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["transport"], "sse");
        assert_eq!(body["capabilities"], json!({"tools": {"listChanged": false}}));
        assert_eq!(body["tools"], json!(["echo", "add", "calculate", "current_time"]));
    }

    #[tokio::test]
    async fn test_sync_tools_call() {
        let app = create_router(state(TransportMode::Http));
        let response = app
            .oneshot(post_json(
                "/mcp",
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "tools/call",
                    "params": {"name": "add", "arguments": {"a": 10, "b": 25}}
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["content"][0]["text"], "10 + 25 = 35");
    }

    #[tokio::test]
    async fn test_sync_errors_use_success_status() {
        let app = create_router(state(TransportMode::Http));

        let response = app
            .clone()
            .oneshot(post_json(
                "/mcp",
                json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "tools/call",
                    "params": {"name": "missing", "arguments": {}}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], -32601);

        let response = app
            .oneshot(
                Request::post("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from("{oops"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_sync_notification_accepted() {
        let app = create_router(state(TransportMode::Http));
        let response = app
            .oneshot(post_json(
                "/mcp",
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_transport_routes_are_exclusive() {
        let app = create_router(state(TransportMode::Http));
        let response = app
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let app = create_router(state(TransportMode::Sse));
        let response = app
            .oneshot(post_json("/mcp", json!({"id": 1, "method": "ping"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sse_session_lifecycle() {
        let state = state(TransportMode::Sse);
        let sessions = state.sessions.clone();
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let mut stream = response.into_body().into_data_stream();
        let endpoint = next_event(&mut stream, "endpoint").await;
        let session_id = endpoint
            .strip_prefix("/messages?session_id=")
            .expect("endpoint carries session id")
            .to_string();
        assert!(sessions.contains(&session_id));

        // correlated POST succeeds, and initialize is echoed onto the stream
        let response = app
            .clone()
            .oneshot(post_json(
                &endpoint,
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {"protocolVersion": "2024-11-05"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["result"]["protocolVersion"], "2024-11-05");

        let echoed: Value =
            serde_json::from_str(&next_event(&mut stream, "initialized").await).unwrap();
        assert_eq!(echoed, body);

        let response = app
            .clone()
            .oneshot(post_json(
                &endpoint,
                json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "tools/call",
                    "params": {"name": "echo", "arguments": {"text": "hi"}}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await["result"]["content"][0]["text"],
            "Echo: hi"
        );

        // simulated disconnect
        drop(stream);
        assert!(!sessions.contains(&session_id));

        let response = app
            .oneshot(post_json(
                &endpoint,
                json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["id"], 3);
        assert_eq!(body["error"]["code"], -32602);
        assert_eq!(body["error"]["data"]["sessionId"], session_id.as_str());
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn test_messages_require_session() {
        let app = create_router(state(TransportMode::Sse));

        for uri in ["/messages", "/messages?session_id=unknown"] {
            let response = app
                .clone()
                .oneshot(post_json(uri, json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {}", uri);
            let body = body_json(response).await;
            assert_eq!(body["error"]["message"], "Invalid or expired session");
            assert_eq!(body["id"], 9);
        }
    }
}
