//! HTTP intake and status endpoints.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/` | submit a change request |
//! | `GET` | `/status/{request_id}` | read a request's progress record |
//! | `OPTIONS` | any | CORS preflight |

use std::future::Future;
use std::net::SocketAddr;

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nodes::{AcceptReply, BridgeReply, DispatchBridge, Invocation};
use pipeline::progress::ProgressError;
use pipeline::rate_limit::RateLimitDecision;
use pipeline::{ClientAddress, ProgressTracker, RequestId, Timestamp};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::ListenerError;

/// Largest request body accepted by the intake.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const AT_CAPACITY_MESSAGE: &str =
    "Bot is currently at capacity processing other requests. Please try again in a few minutes.";

#[derive(Clone)]
struct AppState {
    bridge: DispatchBridge,
    tracker: ProgressTracker,
}

/// Builds the intake router.
pub fn router(bridge: DispatchBridge) -> Router {
    let tracker = bridge.tracker().clone();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/", post(submit))
        .route("/status", get(missing_request_id))
        .route("/status/", get(missing_request_id))
        .route("/status/{request_id}", get(status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { bridge, tracker })
}

/// Serves `router` on `addr` until `shutdown` resolves.
///
/// Peer addresses are made available to the intake for rate limiting.
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<(), ListenerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })?;
    info!(addr = %addr, "intake listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(ListenerError::Serve)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn client_address(request: &Request) -> ClientAddress {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    ClientAddress::resolve(forwarded, peer)
}

async fn submit(State(state): State<AppState>, request: Request) -> Response {
    let client = client_address(&request);
    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(client = %client, error = %e, "failed to read request body");
            return error_body(StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}"));
        }
    };

    let reply = state
        .bridge
        .handle(Invocation::External {
            client_address: client,
            body: body.to_vec(),
        })
        .await;

    match reply {
        BridgeReply::Accept(AcceptReply::Accepted {
            request_id,
            repository,
        }) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "processing",
                "message": "Your request is being processed.",
                "repository": repository,
                "requestId": request_id,
            })),
        )
            .into_response(),
        BridgeReply::Accept(AcceptReply::InvalidInput(e)) => {
            error_body(StatusCode::BAD_REQUEST, e.to_string())
        }
        BridgeReply::Accept(AcceptReply::RateLimited(decision)) => rate_limited(decision),
        BridgeReply::Accept(AcceptReply::AtCapacity { .. }) => {
            error_body(StatusCode::SERVICE_UNAVAILABLE, AT_CAPACITY_MESSAGE)
        }
        BridgeReply::Accept(AcceptReply::DispatchFailed { message, .. }) => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to start async processing: {message}"),
        ),
        BridgeReply::Process { request_id, .. } => {
            error!(request_id = %request_id, "intake produced a process reply");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn rate_limited(decision: RateLimitDecision) -> Response {
    let reset = decision.next_available_at.unwrap_or_else(Timestamp::now);
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Rate limit exceeded",
            "rateLimit": {
                "limit": decision.limit,
                "used": decision.used,
                "resetAt": reset.unix_seconds(),
                "resetAtISO": reset.to_rfc3339(),
            },
        })),
    )
        .into_response()
}

async fn status(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let Some(request_id) = RequestId::parse(&raw) else {
        return error_body(StatusCode::NOT_FOUND, "Request not found");
    };
    match state.tracker.get(request_id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(ProgressError::NotFound) => error_body(StatusCode::NOT_FOUND, "Request not found"),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "failed to read progress record");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get status")
        }
    }
}

async fn missing_request_id() -> Response {
    error_body(StatusCode::BAD_REQUEST, "Request ID is required")
}
