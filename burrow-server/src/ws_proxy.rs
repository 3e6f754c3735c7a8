//! Public-side WebSocket proxy: the two-way bridge between a public
//! browser's WebSocket connection and the tunnel client's `ws_frame`
//! stream for the same `ws_id`.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::warn;

use burrow_protocol::frame::WsOpcode;
use burrow_protocol::Frame;

use crate::state::AppState;
use crate::ws_registry::PublicEvent;

/// Drive one public-side WebSocket connection until it or its paired
/// tunnel-side `ws_id` closes.
pub async fn run(socket: WebSocket, app: AppState, ws_id: String, to_session: mpsc::Sender<Frame>) {
    app.metrics.ws_proxy_opened();
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<PublicEvent>(64);
    app.ws_registry.attach(ws_id.clone(), event_tx);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let frame = Frame::WsFrame {
                            ws_id: ws_id.clone(),
                            opcode: WsOpcode::Text,
                            data: Some(text.to_string()),
                            data_encoding: None,
                        };
                        if to_session.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Non-text opcodes are always base64 on the wire, regardless of
                        // whether the payload happens to be valid UTF-8.
                        let data = base64::engine::general_purpose::STANDARD.encode(&data);
                        let frame = Frame::WsFrame {
                            ws_id: ws_id.clone(),
                            opcode: WsOpcode::Binary,
                            data: Some(data),
                            data_encoding: Some("base64".to_string()),
                        };
                        if to_session.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code, f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        let _ = to_session
                            .send(Frame::WsClose { ws_id: ws_id.clone(), code, reason })
                            .await;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(ws_id, error = %e, "public ws receive error");
                        let _ = to_session
                            .send(Frame::WsClose {
                                ws_id: ws_id.clone(),
                                code: 1011,
                                reason: "public socket error".to_string(),
                            })
                            .await;
                        break;
                    }
                    None => {
                        let _ = to_session
                            .send(Frame::WsClose {
                                ws_id: ws_id.clone(),
                                code: 1006,
                                reason: "public socket closed".to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(PublicEvent::Frame { opcode, data }) => {
                        let message = match opcode {
                            WsOpcode::Text => Message::Text(Utf8Bytes::from(
                                String::from_utf8_lossy(&data).into_owned(),
                            )),
                            WsOpcode::Binary => Message::Binary(data.into()),
                            WsOpcode::Ping => Message::Ping(data.into()),
                            WsOpcode::Pong => Message::Pong(data.into()),
                            WsOpcode::Close => Message::Close(None),
                        };
                        if sender.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(PublicEvent::Close { code, reason }) => {
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: Utf8Bytes::from(reason),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    app.ws_registry.dispose(&ws_id);
    app.metrics.ws_proxy_closed();
}
