//! Branded HTML error pages for the request-forwarder's error branches.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

fn page(status: StatusCode, message: &str, hint: &str) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{code} {reason}</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
  <h1>{code} {reason}</h1>
  <p>{message}</p>
  <p style="color: #888;">{hint}</p>
</body>
</html>"#,
        code = status.as_u16(),
        reason = status.canonical_reason().unwrap_or(""),
        message = message,
        hint = hint,
    );
    (status, Html(body)).into_response()
}

pub fn not_found(subdomain: &str) -> Response {
    page(
        StatusCode::NOT_FOUND,
        &format!("No tunnel is registered for '{subdomain}'."),
        "Check that your tunnel client is connected and the subdomain is correct.",
    )
}

pub fn body_too_large(limit_bytes: usize) -> Response {
    page(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("Request body exceeds the {limit_bytes}-byte limit."),
        "Split large uploads or raise the configured limit.",
    )
}

pub fn bad_gateway(detail: &str) -> Response {
    page(
        StatusCode::BAD_GATEWAY,
        &format!("The tunnel client reported an error: {detail}"),
        "The local service behind the tunnel may be down.",
    )
}

pub fn gateway_timeout() -> Response {
    page(
        StatusCode::GATEWAY_TIMEOUT,
        "The tunnel client did not respond in time.",
        "The local service may be slow, unreachable, or the tunnel disconnected.",
    )
}

pub fn invalid_host() -> Response {
    page(
        StatusCode::NOT_FOUND,
        "This host is not served here.",
        "Check the domain you are connecting to.",
    )
}
