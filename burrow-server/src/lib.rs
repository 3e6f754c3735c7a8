//! Burrow's server-side routing core: the public listener, hostname
//! dispatcher, request forwarder, tunnel registry, and the control-channel
//! session that ties them to a connected tunnel client.
//!
//! Split into a library so integration tests can build the same `Router`
//! `burrowd` serves without going through a binary.

pub mod acme;
pub mod attestation;
pub mod config;
pub mod dispatcher;
pub mod error_page;
pub mod forwarder;
pub mod metrics;
pub mod pending;
pub mod registry;
pub mod session;
pub mod state;
pub mod tcp;
pub mod tcp_proxy;
pub mod ws_proxy;
pub mod ws_registry;

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use axum::body::Body;

use dispatcher::Route;
use state::AppState;

/// Build the full application router, wired against `state`.
///
/// Shared by `burrowd`'s plain-HTTP and TLS serve paths, and by integration
/// tests that want the real routing table without a TLS certificate.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/tunnel", get(tunnel_ws_handler))
        .fallback(any(fallback_handler))
        .with_state(state)
}

/// Build the plain-HTTP ACME pass-through router. Bound to its own listener
/// on `http_listener_port` so it can be reachable on port 80 even though
/// `/tunnel` and the subdomain forwarder only ever serve TLS.
pub fn build_acme_router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/acme-challenge/:token", get(acme_challenge_handler))
        .with_state(state)
}

async fn acme_challenge_handler(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    match state.acme_responder.respond(&token).await {
        Some(key_authorization) => (StatusCode::OK, key_authorization).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_tunnels": state.registry.count(),
        "active_tcp_tunnels": state.tcp_manager.count(),
        "cluster_tunnels": state.registry.cluster_count().await,
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.to_prometheus().await;
    (axum::http::StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body)
}

/// The tunnel client's control-channel endpoint: `wss://<base_domain>/tunnel`.
async fn tunnel_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| session::run(socket, state))
}

/// Everything that isn't `/health`, `/metrics`, or `/tunnel`: dispatched by
/// `Host` header to either the control surface (404 here — those routes
/// are registered above) or a tunnel subdomain's forwarder.
async fn fallback_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    match dispatcher::dispatch(&host, &state.config.base_domain) {
        Route::ControlSurface | Route::Invalid => error_page::invalid_host(),
        Route::Subdomain(subdomain) => {
            let has_upgrade_header = req
                .headers()
                .get(axum::http::header::UPGRADE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("websocket"))
                .unwrap_or(false);
            let has_connection_upgrade = req
                .headers()
                .get(axum::http::header::CONNECTION)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_ascii_lowercase().contains("upgrade"))
                .unwrap_or(false);
            let is_ws_upgrade = has_upgrade_header && has_connection_upgrade;

            if is_ws_upgrade {
                let path = req.uri().path().to_string();
                let (mut parts, _body) = req.into_parts();
                match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
                    Ok(ws) => forwarder::forward_ws_upgrade(state, subdomain, ws, path, parts.headers).await,
                    Err(rejection) => rejection.into_response(),
                }
            } else {
                forwarder::forward_http(&state, &subdomain, addr.ip().to_string(), req).await
            }
        }
    }
}
