//! End-to-end scenarios driven against a real listening `burrowd` router:
//! a fake tunnel client speaks the control-channel protocol over a real
//! WebSocket, a plain HTTP client plays the public caller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use burrow_server::attestation::{signed_message, AllowAllGate};
use burrow_server::config::Config;
use burrow_server::state::AppState;
use burrow_protocol::frame::Attestation;
use burrow_protocol::Frame;

const BASE_DOMAIN: &str = "burrow.test";

fn test_config() -> Config {
    Config {
        base_domain: BASE_DOMAIN.to_string(),
        listener_port: 0,
        http_listener_port: 0,
        tls_cert_file: None,
        tls_key_file: None,
        tcp_port_range_low: 41000,
        tcp_port_range_high: 41001,
        request_timeout_secs: 1,
        ws_upgrade_timeout_secs: 1,
        ws_buffer_ttl_secs: 5,
        ws_buffer_sweep_interval_secs: 1,
        max_request_body: 64,
        heartbeat_interval_secs: 3600,
        attestation_future_skew_secs: 60,
        attestation_max_age_secs: 300,
        log_filter: "off".to_string(),
    }
}

/// Bind a real listener and serve the router on it, returning its address.
async fn spawn_server() -> SocketAddr {
    let state = AppState::new(test_config(), Arc::new(AllowAllGate));
    let app = burrow_server::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

fn attestation_for(signing_key: &SigningKey, requested_subdomain: Option<&str>) -> Attestation {
    let timestamp = 1_700_000_000;
    let message = signed_message(timestamp, requested_subdomain);
    let signature = signing_key.sign(message.as_bytes());
    Attestation {
        public_key: base64::engine::general_purpose::STANDARD.encode(signing_key.verifying_key().to_bytes()),
        timestamp,
        signature: base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
        requested_subdomain: requested_subdomain.map(str::to_string),
    }
}

type TunnelSocket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_tunnel(addr: SocketAddr) -> TunnelSocket {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/tunnel"))
        .await
        .expect("tunnel client connects");
    ws
}

async fn send_frame(ws: &mut TunnelSocket, frame: Frame) {
    ws.send(WsMessage::Text(frame.encode().unwrap())).await.unwrap();
}

async fn recv_frame(ws: &mut TunnelSocket) -> Frame {
    loop {
        match ws.next().await.expect("socket open").unwrap() {
            WsMessage::Text(text) => return Frame::decode(&text).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn register(ws: &mut TunnelSocket, requested: Option<&str>) -> Frame {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    send_frame(
        ws,
        Frame::RegisterTunnel {
            attestation: attestation_for(&signing_key, requested),
            local_host: "localhost".to_string(),
            local_port: 3000,
        },
    )
    .await;
    recv_frame(ws).await
}

#[tokio::test]
async fn registration_happy_path() {
    let addr = spawn_server().await;
    let mut ws = connect_tunnel(addr).await;

    match register(&mut ws, Some("myapp")).await {
        Frame::TunnelRegistered { subdomain, full_url, .. } => {
            assert_eq!(subdomain, "myapp");
            assert_eq!(full_url, format!("https://myapp.{BASE_DOMAIN}"));
        }
        other => panic!("expected tunnel_registered, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_subdomain_is_rejected_without_affecting_the_holder() {
    let addr = spawn_server().await;

    let mut session_a = connect_tunnel(addr).await;
    match register(&mut session_a, Some("myapp")).await {
        Frame::TunnelRegistered { .. } => {}
        other => panic!("session A should register cleanly, got {other:?}"),
    }

    let mut session_b = connect_tunnel(addr).await;
    match register(&mut session_b, Some("myapp")).await {
        Frame::Error { code, .. } => assert_eq!(code, "subdomain_taken"),
        other => panic!("expected subdomain_taken error, got {other:?}"),
    }

    // session A's registration is untouched by B's failed attempt.
    let client = reqwest::Client::new();
    let handle = {
        let mut session_a = session_a;
        tokio::spawn(async move {
            match recv_frame(&mut session_a).await {
                Frame::TunnelRequest { request_id, .. } => {
                    send_frame(
                        &mut session_a,
                        Frame::TunnelResponse {
                            request_id,
                            status: 200,
                            headers: vec![],
                            body: None,
                            body_encoding: None,
                        },
                    )
                    .await;
                }
                other => panic!("expected tunnel_request, got {other:?}"),
            }
        })
    };

    let resp = client
        .get(format!("http://{addr}/"))
        .header("host", format!("myapp.{BASE_DOMAIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    handle.await.unwrap();
}

#[tokio::test]
async fn http_round_trip_preserves_method_path_query_headers_and_body() {
    let addr = spawn_server().await;
    let mut ws = connect_tunnel(addr).await;
    register(&mut ws, Some("roundtrip")).await;

    let server_side = tokio::spawn(async move {
        match recv_frame(&mut ws).await {
            Frame::TunnelRequest {
                request_id,
                method,
                path,
                query_string,
                headers,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/api/users");
                assert_eq!(query_string, "page=2");
                assert!(headers.iter().any(|(k, v)| k == "user-agent" && v == "curl/8"));

                send_frame(
                    &mut ws,
                    Frame::TunnelResponse {
                        request_id,
                        status: 200,
                        headers: vec![("content-type".to_string(), "application/json".to_string())],
                        body: Some(r#"{"ok":true}"#.to_string()),
                        body_encoding: None,
                    },
                )
                .await;
            }
            other => panic!("expected tunnel_request, got {other:?}"),
        }
    });

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/api/users?page=2"))
        .header("host", format!("roundtrip.{BASE_DOMAIN}"))
        .header("user-agent", "curl/8")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert!(resp.headers().get("transfer-encoding").is_none());
    let body = resp.text().await.unwrap();
    assert_eq!(body, r#"{"ok":true}"#);

    server_side.await.unwrap();
}

#[tokio::test]
async fn oversized_request_body_is_rejected_with_413() {
    let addr = spawn_server().await; // test_config caps max_request_body at 64 bytes
    let mut ws = connect_tunnel(addr).await;
    register(&mut ws, Some("bigbody")).await;

    let client = reqwest::Client::new();
    let oversized = vec![b'x'; 65];
    let resp = client
        .post(format!("http://{addr}/upload"))
        .header("host", format!("bigbody.{BASE_DOMAIN}"))
        .body(oversized)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 413);
}

#[tokio::test]
async fn request_to_unregistered_subdomain_is_404() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/"))
        .header("host", format!("nobody-home.{BASE_DOMAIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn request_times_out_when_tunnel_client_never_replies() {
    let addr = spawn_server().await; // test_config caps request_timeout_secs at 1
    let mut ws = connect_tunnel(addr).await;
    register(&mut ws, Some("silent")).await;

    // Keep the session alive but never answer the tunnel_request it receives.
    let _keepalive = tokio::spawn(async move {
        let _ = recv_frame(&mut ws).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/"))
        .header("host", format!("silent.{BASE_DOMAIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
}

#[tokio::test]
async fn abrupt_session_death_frees_the_subdomain_and_fails_in_flight_requests() {
    let addr = spawn_server().await; // request_timeout_secs is 1s; disconnect should resolve faster
    let mut ws = connect_tunnel(addr).await;
    register(&mut ws, Some("dying")).await;

    let client = reqwest::Client::new();
    let in_flight = {
        let client = client.clone();
        let addr = addr;
        tokio::spawn(async move {
            client
                .get(format!("http://{addr}/"))
                .header("host", format!("dying.{BASE_DOMAIN}"))
                .send()
                .await
                .unwrap()
        })
    };

    // Let the request reach the tunnel session, then kill the session
    // before it answers.
    let _ = recv_frame(&mut ws).await;
    drop(ws);

    let resp = tokio::time::timeout(Duration::from_millis(500), in_flight)
        .await
        .expect("in-flight request resolves promptly on session death")
        .unwrap();
    assert_eq!(resp.status(), 502);

    let resp = client
        .get(format!("http://{addr}/"))
        .header("host", format!("dying.{BASE_DOMAIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn metrics_active_tunnels_gauge_drops_back_to_zero_after_session_death() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let mut ws = connect_tunnel(addr).await;
    register(&mut ws, Some("gauged")).await;

    let metrics_body = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics_body.contains("burrow_active_tunnels 1"));

    drop(ws);
    // Give the session's write/read loop a beat to notice the close and run teardown.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let metrics_body = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics_body.contains("burrow_active_tunnels 0"));
}

#[tokio::test]
async fn health_endpoint_reports_active_tunnel_count() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let before: serde_json::Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["active_tunnels"], 0);

    let mut ws = connect_tunnel(addr).await;
    register(&mut ws, Some("counted")).await;

    let after: serde_json::Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["active_tunnels"], 1);
}
