//! Per-connection TCP proxy state machine: `waiting-client` ->
//! `connected` -> `terminated`. No backpressure buffering: a failed local
//! write tears the proxy down and notifies the tunnel client.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::warn;

use burrow_protocol::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ConnState {
    WaitingClient = 0,
    Connected = 1,
    Terminated = 2,
}

enum WriteCmd {
    Data(Vec<u8>),
    Shutdown,
}

/// Handle to a live TCP connection proxy. Cloneable; every clone refers
/// to the same underlying socket and state.
#[derive(Clone)]
pub struct TcpConnectionProxy {
    tcp_id: String,
    state: Arc<AtomicU8>,
    write_tx: mpsc::Sender<WriteCmd>,
    to_session: mpsc::Sender<Frame>,
}

impl TcpConnectionProxy {
    /// Take ownership of an accepted socket and start its read/write
    /// tasks. Begins in `waiting-client`: inbound public bytes are read
    /// (to detect close) but discarded with a warning until the tunnel
    /// client confirms the upstream connection.
    pub fn spawn(tcp_id: String, socket: TcpStream, to_session: mpsc::Sender<Frame>) -> Self {
        let state = Arc::new(AtomicU8::new(ConnState::WaitingClient as u8));
        let (write_tx, mut write_rx) = mpsc::channel::<WriteCmd>(64);
        let (mut read_half, mut write_half) = tokio::io::split(socket);

        tokio::spawn(async move {
            while let Some(cmd) = write_rx.recv().await {
                match cmd {
                    WriteCmd::Data(bytes) => {
                        if write_half.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    WriteCmd::Shutdown => {
                        let _ = write_half.shutdown().await;
                        break;
                    }
                }
            }
        });

        {
            let tcp_id = tcp_id.clone();
            let state = state.clone();
            let to_session = to_session.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                loop {
                    let n = match read_half.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if state.load(Ordering::Acquire) != ConnState::Connected as u8 {
                        warn!(tcp_id, "discarding public bytes before upstream connect confirmed");
                        continue;
                    }
                    let frame = Frame::TcpData {
                        tcp_id: tcp_id.clone(),
                        data: base64::engine::general_purpose::STANDARD.encode(&buf[..n]),
                        data_encoding: "base64".to_string(),
                    };
                    if to_session.send(frame).await.is_err() {
                        break;
                    }
                }
                if state.swap(ConnState::Terminated as u8, Ordering::AcqRel) != ConnState::Terminated as u8 {
                    let _ = to_session
                        .send(Frame::TcpClose {
                            tcp_id: tcp_id.clone(),
                            reason: "public socket closed".to_string(),
                        })
                        .await;
                }
            });
        }

        Self {
            tcp_id,
            state,
            write_tx,
            to_session,
        }
    }

    /// The tunnel client confirmed the upstream connection: start
    /// forwarding public bytes as `tcp_data` frames.
    pub fn mark_connected(&self) {
        self.state.store(ConnState::Connected as u8, Ordering::Release);
    }

    /// Write bytes arriving from the tunnel client to the public socket.
    pub async fn forward_data(&self, data: Vec<u8>) {
        let _ = self.write_tx.send(WriteCmd::Data(data)).await;
    }

    /// The remote side closed first: tear down locally, no echo.
    pub fn close_remote(&self, _reason: String) {
        self.state.store(ConnState::Terminated as u8, Ordering::Release);
        let _ = self.write_tx.try_send(WriteCmd::Shutdown);
    }

    /// Close was initiated on this side (local write failure, session
    /// death): tear down and notify the tunnel client.
    pub fn close_locally(&self, reason: String) {
        if self.state.swap(ConnState::Terminated as u8, Ordering::AcqRel) == ConnState::Terminated as u8 {
            return;
        }
        let _ = self.write_tx.try_send(WriteCmd::Shutdown);
        let to_session = self.to_session.clone();
        let tcp_id = self.tcp_id.clone();
        tokio::spawn(async move {
            let _ = to_session.send(Frame::TcpClose { tcp_id, reason }).await;
        });
    }
}
