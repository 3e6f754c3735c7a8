//! Public-side request forwarding: turns an inbound HTTP request (or a
//! WebSocket upgrade) addressed to a tunnel's subdomain into a frame sent
//! down that tunnel's session, and turns the eventual `tunnel_response`
//! (or `ws_upgraded`) back into a public-facing response.

use std::time::Instant;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use burrow_protocol::frame::{encode_body, HeaderPair};
use burrow_protocol::{new_id, Frame};

use crate::error_page;
use crate::pending::Outcome;
use crate::state::AppState;
use crate::ws_proxy;
use crate::ws_registry::UpgradeOutcome;

/// Headers the public listener recomputes itself; forwarding them from the
/// tunnel client's response would desynchronize framing.
const HOP_BY_HOP: &[&str] = &["content-length", "transfer-encoding", "connection"];

/// Forward an HTTP request to the tunnel client owning `subdomain`,
/// returning the public-facing response once the client replies, times
/// out, or the tunnel disconnects mid-flight. Every resolution, including
/// the error branches, is recorded against the process-wide metrics.
pub async fn forward_http(app: &AppState, subdomain: &str, client_ip: String, req: Request<Body>) -> Response {
    let start = Instant::now();
    let (response, bytes_in) = forward_http_inner(app, subdomain, client_ip, req).await;

    let status = response.status().as_u16();
    let bytes_out = response.body().size_hint().lower();
    app.metrics
        .record_request(status, start.elapsed().as_micros() as u64, bytes_in, bytes_out)
        .await;

    response
}

async fn forward_http_inner(app: &AppState, subdomain: &str, client_ip: String, req: Request<Body>) -> (Response, u64) {
    let Some(tunnel) = app.registry.lookup(subdomain).await else {
        return (error_page::not_found(subdomain), 0);
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, app.config.max_request_body).await {
        Ok(b) => b,
        Err(_) => return (error_page::body_too_large(app.config.max_request_body), 0),
    };
    let bytes_in = body_bytes.len() as u64;

    let (body, body_encoding) = encode_body(&body_bytes);
    let headers: Vec<HeaderPair> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let request_id = new_id().to_string();
    let frame = Frame::TunnelRequest {
        request_id: request_id.clone(),
        tunnel_id: tunnel.tunnel_id.clone(),
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query_string: parts.uri.query().unwrap_or("").to_string(),
        headers,
        body,
        body_encoding,
        client_ip,
    };

    let rx = app
        .pending
        .register(request_id.clone(), tunnel.tunnel_id.clone(), app.config.request_timeout());

    if tunnel.outbox.send(frame).await.is_err() {
        app.pending.cancel(&request_id);
        return (error_page::bad_gateway("tunnel session is no longer connected"), bytes_in);
    }

    let response = match rx.await {
        Ok(Ok(response)) => build_response(response),
        Ok(Err(Outcome::Timeout)) => error_page::gateway_timeout(),
        Ok(Err(Outcome::Cancelled)) => error_page::bad_gateway("tunnel session disconnected"),
        Err(_) => error_page::bad_gateway("tunnel session disconnected"),
    };
    (response, bytes_in)
}

/// Prefixes a tunnel client uses on the body of a 502/504 it originates
/// itself (as opposed to relaying its local service's own error page).
const BAD_GATEWAY_PREFIX: &str = "Bad Gateway:";
const GATEWAY_TIMEOUT_PREFIX: &str = "Gateway Timeout:";

/// If `body` is UTF-8 and starts with `prefix`, return the text after it.
fn tunnel_error_detail<'a>(body: &'a [u8], prefix: &str) -> Option<&'a str> {
    std::str::from_utf8(body).ok()?.strip_prefix(prefix)
}

fn build_response(response: crate::state::TunnelResponseMsg) -> Response {
    if response.status == 502 {
        if let Some(detail) = tunnel_error_detail(&response.body, BAD_GATEWAY_PREFIX) {
            return error_page::bad_gateway(detail.trim());
        }
    }
    if response.status == 504 && tunnel_error_detail(&response.body, GATEWAY_TIMEOUT_PREFIX).is_some() {
        return error_page::gateway_timeout();
    }

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = HeaderMap::new();
    for (name, value) in response.headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    (status, headers, response.body).into_response()
}

/// Forward a WebSocket upgrade request: ask the tunnel client to open the
/// matching local connection, then hand the public socket to the ws-proxy
/// module once (or if) it confirms.
pub async fn forward_ws_upgrade(
    app: AppState,
    subdomain: String,
    ws: WebSocketUpgrade,
    path: String,
    req_headers: HeaderMap,
) -> Response {
    let Some(tunnel) = app.registry.lookup(&subdomain).await else {
        return error_page::not_found(&subdomain);
    };

    let headers: Vec<HeaderPair> = req_headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let ws_id = new_id().to_string();
    let rx = app.ws_registry.register_pending(ws_id.clone());

    let frame = Frame::WsUpgrade {
        ws_id: ws_id.clone(),
        tunnel_id: tunnel.tunnel_id.clone(),
        path,
        headers,
    };
    if tunnel.outbox.send(frame).await.is_err() {
        app.ws_registry.cancel_pending(&ws_id);
        return error_page::bad_gateway("tunnel session is no longer connected");
    }

    let outcome = tokio::time::timeout(app.config.ws_upgrade_timeout(), rx).await;
    match outcome {
        Ok(Ok(UpgradeOutcome::Ok { .. })) => {
            let tunnel_outbox = tunnel.outbox.clone();
            ws.on_upgrade(move |socket| ws_proxy::run(socket, app, ws_id, tunnel_outbox))
        }
        Ok(Ok(UpgradeOutcome::Error { reason })) => error_page::bad_gateway(&reason),
        Ok(Err(_)) => error_page::bad_gateway("tunnel session disconnected"),
        Err(_) => {
            app.ws_registry.cancel_pending(&ws_id);
            warn!(ws_id, "ws upgrade confirmation timed out");
            error_page::gateway_timeout()
        }
    }
}
