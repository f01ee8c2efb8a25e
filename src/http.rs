//! HTTP/JSON-RPC front-end
//!
//! Loopback-only listener carrying the streamable session protocol:
//! `POST /mcp` for requests and `GET /mcp` for the per-session notification
//! stream. Every request passes the full gate chain before any MCP
//! dispatch: body cap, CORS origin rejection, Host allow-list, bearer
//! token.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{FutureExt, StreamExt};
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::context::ContextAggregator;
use crate::hub::SessionHub;
use crate::mcp::{self, Dispatch, McpServer};
use crate::rpc::{self, JsonRpcRequest};

/// Session header used by the streamable transport.
pub const MCP_SESSION_HEADER: &str = "mcp-session-id";

/// Request body cap.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state behind the router. Owns the process-lifetime auth token;
/// handlers never read process-wide globals.
pub struct BridgeState {
    hub: Arc<SessionHub>,
    context: Arc<ContextAggregator>,
    mcp: McpServer,
    auth_token: String,
    port: u16,
}

impl BridgeState {
    pub fn new(
        hub: Arc<SessionHub>,
        context: Arc<ContextAggregator>,
        mcp: McpServer,
        auth_token: String,
        port: u16,
    ) -> Self {
        Self {
            hub,
            context,
            mcp,
            auth_token,
            port,
        }
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub fn context(&self) -> &Arc<ContextAggregator> {
        &self.context
    }
}

/// Assemble the router with the gate chain applied to every route.
pub fn build_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/mcp", post(post_mcp).get(get_mcp))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
                .layer(middleware::from_fn(reject_cross_origin))
                .layer(middleware::from_fn_with_state(
                    Arc::clone(&state),
                    enforce_local_host,
                ))
                .layer(middleware::from_fn_with_state(
                    Arc::clone(&state),
                    require_bearer_token,
                )),
        )
        .with_state(state)
}

/// Browser callers send an `Origin` header; the bridge serves non-browser
/// loopback clients only, so any origin is refused outright.
async fn reject_cross_origin(request: Request, next: Next) -> Response {
    let has_origin = request
        .headers()
        .get(header::ORIGIN)
        .is_some_and(|v| !v.is_empty());
    if has_origin {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Request denied by CORS policy." })),
        )
            .into_response();
    }
    next.run(request).await
}

/// DNS-rebinding guard: the Host header must name this loopback listener.
async fn enforce_local_host(
    State(state): State<Arc<BridgeState>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let allowed = host == format!("localhost:{}", state.port)
        || host == format!("127.0.0.1:{}", state.port);
    if !allowed {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Invalid Host header" })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn require_bearer_token(
    State(state): State<Arc<BridgeState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.auth_token);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

async fn post_mcp(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(rpc::error_response(
                    Value::Null,
                    rpc::PARSE_ERROR,
                    "Parse error",
                )),
            )
                .into_response()
        }
    };

    let session_id = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if let Some(raw_id) = session_id {
        let live = Uuid::parse_str(&raw_id)
            .ok()
            .filter(|id| state.hub.contains(id));
        match live {
            Some(id) => dispatch_on_session(&state, id, raw).await,
            None => bad_session_response(),
        }
    } else if raw.get("method").and_then(Value::as_str) == Some("initialize") {
        initialize_session(&state, raw)
    } else {
        bad_session_response()
    }
}

/// Create a session for an `initialize` request and echo the new id in the
/// response headers.
fn initialize_session(state: &Arc<BridgeState>, raw: Value) -> Response {
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(_) => return invalid_request_response(),
    };
    if !request.is_valid() || request.is_notification() {
        return invalid_request_response();
    }

    let session_id = state.hub.create_session();
    let body = rpc::response(
        request.id.unwrap_or(Value::Null),
        McpServer::initialize_result(),
    );
    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        response.headers_mut().insert(MCP_SESSION_HEADER, value);
    }
    response
}

async fn dispatch_on_session(state: &Arc<BridgeState>, session_id: Uuid, raw: Value) -> Response {
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(_) => return invalid_request_response(),
    };
    if !request.is_valid() {
        return invalid_request_response();
    }
    let request_id = request.id.clone().unwrap_or(Value::Null);
    tracing::debug!(
        "Dispatching {} on session {}",
        request.method,
        session_id
    );

    match AssertUnwindSafe(state.mcp.dispatch(request)).catch_unwind().await {
        Ok(Dispatch::Reply(value)) => (StatusCode::OK, Json(value)).into_response(),
        Ok(Dispatch::Accepted) => StatusCode::ACCEPTED.into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(rpc::error_response(
                request_id,
                rpc::INTERNAL_ERROR,
                "Internal error",
            )),
        )
            .into_response(),
    }
}

async fn get_mcp(State(state): State<Arc<BridgeState>>, headers: HeaderMap) -> Response {
    let session_id = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());
    let Some(session_id) = session_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(rpc::error_response(
                Value::Null,
                rpc::BAD_SESSION,
                "Bad Request: Mcp-Session-Id header is required",
            )),
        )
            .into_response();
    };

    let initial = mcp::context_notification(&state.context.snapshot());
    let Some(rx) = state.hub.attach_stream(&session_id, initial) else {
        return bad_session_response();
    };

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<Event, Infallible>(Event::default().event("message").data(msg.to_string())));
    Sse::new(stream).into_response()
}

fn bad_session_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(rpc::error_response(
            Value::Null,
            rpc::BAD_SESSION,
            "Bad Request: No valid session ID provided for non-initialize request.",
        )),
    )
        .into_response()
}

fn invalid_request_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(rpc::error_response(
            Value::Null,
            rpc::INVALID_REQUEST,
            "Invalid Request",
        )),
    )
        .into_response()
}
