//! Downstream HTTP adapter.
//!
//! `POST /mcp` carries one JSON-RPC message per request; the
//! `mcp-session-id` header is echoed back, minted when absent.
//! `DELETE /mcp` destroys the session. `GET /sse` streams notifications
//! (progress and list_changed) with a 25-second keep-alive comment.
//! `GET /health` always answers; `GET /metrics` only when
//! `HATAGO_METRICS=1`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use hatago_core::error::HubResult;
use hatago_core::messages::{
    JsonRpcError, JsonRpcMessage, JsonRpcResponse, ProgressToken, RequestId,
};

use crate::hub::Hub;

const SESSION_HEADER: &str = "mcp-session-id";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Build the axum router for one hub.
pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post).delete(handle_mcp_delete))
        .route("/sse", get(handle_sse))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(hub)
}

/// Serve the hub over HTTP until the process is stopped.
pub async fn serve_http(hub: Hub, bind: SocketAddr) -> HubResult<()> {
    let app = router(hub);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "http adapter listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| hatago_core::error::HubError::internal(format!("http server: {e}")))?;
    Ok(())
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

async fn handle_mcp_post(
    State(hub): State<Hub>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session = hub.sessions().get_or_create(session_header(&headers));
    let session_id = session.id.clone();

    let message: JsonRpcMessage = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            let error = if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
                JsonRpcError::invalid_request(e.to_string())
            } else {
                JsonRpcError::parse_error(e.to_string())
            };
            let response = JsonRpcResponse::error(RequestId::Null, error);
            return (
                StatusCode::OK,
                [(SESSION_HEADER, session_id)],
                Json(response),
            )
                .into_response();
        }
    };

    match hub.handle_json_rpc_request(message, Some(&session_id)).await {
        Some(response) => (
            StatusCode::OK,
            [(SESSION_HEADER, session_id)],
            Json(response),
        )
            .into_response(),
        None => (StatusCode::ACCEPTED, [(SESSION_HEADER, session_id)]).into_response(),
    }
}

async fn handle_mcp_delete(State(hub): State<Hub>, headers: HeaderMap) -> Response {
    match session_header(&headers) {
        Some(session_id) => {
            hub.broker().detach_session(session_id);
            hub.sessions().destroy(session_id);
            StatusCode::NO_CONTENT.into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing mcp-session-id header" })),
        )
            .into_response(),
    }
}

#[derive(serde::Deserialize, Default)]
struct SseQuery {
    #[serde(rename = "progressToken")]
    progress_token: Option<String>,
}

async fn handle_sse(
    State(hub): State<Hub>,
    headers: HeaderMap,
    Query(query): Query<SseQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // A session-bound stream becomes that session's notification
    // channel; otherwise this is a standalone subscriber that can bind
    // individual progress tokens.
    let receiver = match session_header(&headers) {
        Some(session_id) => {
            let session = hub.sessions().get_or_create(Some(session_id));
            debug!(session = %session.id, "sse stream bound to session");
            hub.broker().attach_session(&session.id)
        }
        None => {
            let client_id = Uuid::new_v4().to_string();
            if let Some(token) = &query.progress_token {
                hub.broker()
                    .register_progress_token(&ProgressToken::from(token.as_str()), &client_id);
            }
            debug!(client = %client_id, "standalone sse subscriber");
            hub.broker().subscribe(&client_id)
        }
    };

    let stream = ReceiverStream::new(receiver).map(|notification| {
        let data = serde_json::to_string(&notification).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event("message").data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

async fn handle_health(State(hub): State<Hub>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime": hub.uptime().as_secs(),
    }))
}

async fn handle_metrics(State(hub): State<Hub>) -> Response {
    if !hatago_common::metrics_enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(hub.metrics_snapshot()).into_response()
}
