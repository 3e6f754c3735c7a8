//! Tunnel session: one per connected tunnel client. Parses and validates
//! incoming control frames, registers tunnels, and dispatches responses
//! back to the waiting public-side handlers.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use burrow_protocol::frame::decode_body;
use burrow_protocol::subdomain;
use burrow_protocol::{new_id, Frame};

use crate::attestation::{self, GateDecision};
use crate::registry::TunnelInfo;
use crate::state::{AppState, TunnelResponseMsg};
use crate::ws_registry::UpgradeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    AwaitingRegistration,
    Connected,
}

struct SessionCtx {
    session_id: String,
    status: Status,
    owner_key: Option<Vec<u8>>,
}

/// Drive a single tunnel client's WebSocket connection until it closes.
pub async fn run(socket: WebSocket, app: AppState) {
    let session_id = new_id().to_string();
    let (mut sender, mut receiver) = socket.split();

    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(256);

    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            match frame.encode() {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode outbound frame"),
            }
        }
    });

    let mut ctx = SessionCtx {
        session_id: session_id.clone(),
        status: Status::AwaitingRegistration,
        owner_key: None,
    };

    let mut heartbeat = tokio::time::interval(app.config.heartbeat_interval());
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(&text) {
                            Ok(frame) => handle_frame(frame, &mut ctx, &app, &outbox_tx).await,
                            Err(e) => {
                                let _ = outbox_tx
                                    .send(Frame::error("invalid_json", e.to_string()))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {
                        let _ = outbox_tx
                            .send(Frame::error("unsupported_format", "binary frames are not accepted on the control channel"))
                            .await;
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let timestamp = unix_now();
                if outbox_tx.send(Frame::Heartbeat { timestamp }).await.is_err() {
                    break;
                }
            }
        }
    }

    write_task.abort();
    teardown(&ctx, &app).await;
    info!(session_id = %session_id, "tunnel session closed");
}

async fn teardown(ctx: &SessionCtx, app: &AppState) {
    let closed = app.registry.unregister_session(&ctx.session_id).await;
    for _ in 0..closed {
        app.metrics.tunnel_closed();
    }

    let tcp_closed = app.tcp_manager.unregister_session(&ctx.session_id);
    for _ in 0..tcp_closed {
        app.metrics.tcp_tunnel_closed();
    }

    app.pending.cancel_for_tunnel(&ctx.session_id);
}

async fn handle_frame(frame: Frame, ctx: &mut SessionCtx, app: &AppState, outbox: &mpsc::Sender<Frame>) {
    if ctx.status == Status::AwaitingRegistration && !matches!(frame, Frame::RegisterTunnel { .. }) {
        let _ = outbox
            .send(Frame::error(
                "missing_attestation",
                "first frame on a tunnel session must be register_tunnel",
            ))
            .await;
        return;
    }

    match frame {
        Frame::RegisterTunnel {
            attestation,
            local_host,
            local_port,
        } => handle_register_tunnel(ctx, app, outbox, attestation, local_host, local_port).await,

        Frame::RegisterTcpTunnel { local_port } => {
            match app
                .tcp_manager
                .register(ctx.session_id.clone(), local_port, outbox.clone())
                .await
            {
                Ok((tcp_tunnel_id, server_port)) => {
                    app.metrics.tcp_tunnel_opened();
                    let _ = outbox
                        .send(Frame::TcpTunnelRegistered {
                            tcp_tunnel_id,
                            server_port,
                            local_port,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = outbox.send(Frame::error(e.code(), e.to_string())).await;
                }
            }
        }

        Frame::TunnelResponse {
            request_id,
            status,
            headers,
            body,
            body_encoding,
        } => match decode_body(body.as_deref(), body_encoding.as_deref()) {
            Ok(body) => app.pending.complete(
                &request_id,
                TunnelResponseMsg {
                    status,
                    headers,
                    body,
                },
            ),
            Err(e) => {
                let _ = outbox.send(Frame::error(e.code(), e.to_string())).await;
            }
        },

        Frame::WsUpgraded { ws_id, headers } => {
            app.ws_registry
                .complete_pending(&ws_id, UpgradeOutcome::Ok { headers });
        }

        Frame::WsFrame {
            ws_id,
            opcode,
            data,
            data_encoding,
        } => match decode_body(data.as_deref(), data_encoding.as_deref()) {
            Ok(bytes) => app.ws_registry.forward_frame(&ws_id, opcode, bytes).await,
            Err(e) => {
                let _ = outbox.send(Frame::error(e.code(), e.to_string())).await;
            }
        },

        Frame::WsClose { ws_id, code, reason } => {
            // `ws_proxy::run`'s own exit path records `ws_proxy_closed`,
            // whichever side (public or tunnel) triggers the close.
            app.ws_registry.notify_close(&ws_id, code, reason);
        }

        Frame::TcpConnected { tcp_id } => {
            if let Some(conn) = app.tcp_manager.connection(&tcp_id) {
                conn.mark_connected();
            } else {
                warn!(tcp_id, "tcp_connected for unknown tcp_id");
            }
        }

        Frame::TcpData { tcp_id, data, data_encoding } => {
            match decode_body(Some(&data), Some(&data_encoding)) {
                Ok(bytes) => {
                    if let Some(conn) = app.tcp_manager.connection(&tcp_id) {
                        conn.forward_data(bytes).await;
                    } else {
                        warn!(tcp_id, "tcp_data for unknown tcp_id, dropped");
                    }
                }
                Err(e) => {
                    let _ = outbox.send(Frame::error(e.code(), e.to_string())).await;
                }
            }
        }

        Frame::TcpClose { tcp_id, reason } => {
            if let Some(conn) = app.tcp_manager.connection(&tcp_id) {
                conn.close_remote(reason);
            }
            app.tcp_manager.connection_closed(&tcp_id);
        }

        Frame::Heartbeat { .. } => {
            let _ = outbox
                .send(Frame::Heartbeat {
                    timestamp: unix_now(),
                })
                .await;
        }

        other => {
            let type_name = frame_type_name(&other);
            let _ = outbox
                .send(Frame::error("unknown_message", format!("unhandled frame type: {type_name}")))
                .await;
        }
    }
}

async fn handle_register_tunnel(
    ctx: &mut SessionCtx,
    app: &AppState,
    outbox: &mpsc::Sender<Frame>,
    att: burrow_protocol::frame::Attestation,
    local_host: String,
    local_port: u16,
) {
    let now = unix_now();
    let public_key = match attestation::verify(
        &att,
        app.config.attestation_max_age_secs,
        app.config.attestation_future_skew_secs,
        now,
    ) {
        Ok(key) => key,
        Err(e) => {
            let _ = outbox.send(Frame::error(e.code(), e.to_string())).await;
            return;
        }
    };

    let requested = att.requested_subdomain.as_deref();
    let candidate = match requested {
        Some(r) if subdomain::is_valid(r) => r.to_string(),
        _ => subdomain::derive_from_public_key(&public_key),
    };

    if matches!(app.reservation_gate.check(&public_key, &candidate), GateDecision::Deny) {
        let _ = outbox
            .send(Frame::error("subdomain_taken", "subdomain is reserved"))
            .await;
        return;
    }

    let tunnel_id = new_id().to_string();
    let info = TunnelInfo {
        tunnel_id: tunnel_id.clone(),
        subdomain: candidate.clone(),
        session_id: ctx.session_id.clone(),
        owner_key: public_key.clone(),
        local_host,
        local_port,
        created_at: std::time::Instant::now(),
        outbox: outbox.clone(),
    };

    match app.registry.register(info).await {
        Ok(()) => {
            ctx.status = Status::Connected;
            ctx.owner_key = Some(public_key);
            app.metrics.tunnel_opened();
            let full_url = format!("https://{}.{}", candidate, app.config.base_domain);
            let _ = outbox
                .send(Frame::TunnelRegistered {
                    tunnel_id,
                    subdomain: candidate,
                    full_url,
                })
                .await;
        }
        Err(e) => {
            let _ = outbox.send(Frame::error(e.code(), e.to_string())).await;
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

fn frame_type_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::RegisterTunnel { .. } => "register_tunnel",
        Frame::TunnelRegistered { .. } => "tunnel_registered",
        Frame::TunnelRequest { .. } => "tunnel_request",
        Frame::TunnelResponse { .. } => "tunnel_response",
        Frame::WsUpgrade { .. } => "ws_upgrade",
        Frame::WsUpgraded { .. } => "ws_upgraded",
        Frame::WsFrame { .. } => "ws_frame",
        Frame::WsClose { .. } => "ws_close",
        Frame::RegisterTcpTunnel { .. } => "register_tcp_tunnel",
        Frame::TcpTunnelRegistered { .. } => "tcp_tunnel_registered",
        Frame::TcpConnect { .. } => "tcp_connect",
        Frame::TcpConnected { .. } => "tcp_connected",
        Frame::TcpData { .. } => "tcp_data",
        Frame::TcpClose { .. } => "tcp_close",
        Frame::Heartbeat { .. } => "heartbeat",
        Frame::Error { .. } => "error",
    }
}
