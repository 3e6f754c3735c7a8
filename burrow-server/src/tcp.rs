//! TCP-listener manager: dynamic port allocation and the accept loop for
//! a single TCP tunnel.

use std::ops::RangeInclusive;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use burrow_protocol::{new_id, Error, Frame};

use crate::tcp_proxy::TcpConnectionProxy;

/// A single registered TCP tunnel: its accept loop and the ids of the
/// connections it has spawned (the connections themselves live in the
/// manager's flat `tcp_id`-keyed index, since inbound frames only carry
/// `tcp_id`, not `tcp_tunnel_id`).
pub struct TcpTunnel {
    pub tcp_tunnel_id: String,
    pub server_port: u16,
    pub local_port: u16,
    pub session_id: String,
    accept_task: tokio::task::JoinHandle<()>,
    pub connection_ids: Arc<DashSet<String>>,
}

/// Manages every TCP tunnel's port allocation and accept loop.
pub struct TcpListenerManager {
    port_range: RangeInclusive<u16>,
    in_use: DashMap<u16, String>,
    tunnels: DashMap<String, TcpTunnel>,
    connections: Arc<DashMap<String, TcpConnectionProxy>>,
}

impl TcpListenerManager {
    pub fn new(port_range: RangeInclusive<u16>) -> Self {
        Self {
            port_range,
            in_use: DashMap::new(),
            tunnels: DashMap::new(),
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Find the first bindable port in the configured range, bind it, and
    /// start its accept loop. `to_session` is the owning session's inbox,
    /// used to forward `tcp_connect` frames for each accepted connection.
    pub async fn register(
        &self,
        session_id: String,
        local_port: u16,
        to_session: mpsc::Sender<Frame>,
    ) -> Result<(String, u16), Error> {
        for port in self.port_range.clone() {
            if self.in_use.contains_key(&port) {
                continue;
            }
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(_) => continue,
            };

            let tcp_tunnel_id = new_id().to_string();
            self.in_use.insert(port, tcp_tunnel_id.clone());

            let connection_ids = Arc::new(DashSet::new());
            let accept_task = spawn_accept_loop(
                tcp_tunnel_id.clone(),
                listener,
                to_session.clone(),
                connection_ids.clone(),
                self.connections.clone(),
            );

            self.tunnels.insert(
                tcp_tunnel_id.clone(),
                TcpTunnel {
                    tcp_tunnel_id: tcp_tunnel_id.clone(),
                    server_port: port,
                    local_port,
                    session_id,
                    accept_task,
                    connection_ids,
                },
            );

            return Ok((tcp_tunnel_id, port));
        }
        Err(Error::NoPortsAvailable)
    }

    pub fn connection(&self, tcp_id: &str) -> Option<TcpConnectionProxy> {
        self.connections.get(tcp_id).map(|c| c.clone())
    }

    pub fn connection_closed(&self, tcp_id: &str) {
        self.connections.remove(tcp_id);
    }

    /// Tear down every TCP tunnel owned by a session, freeing their ports.
    /// Returns the number of TCP tunnels removed, so the caller can keep
    /// gauges in sync.
    pub fn unregister_session(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .tunnels
            .iter()
            .filter(|e| e.session_id == session_id)
            .map(|e| e.tcp_tunnel_id.clone())
            .collect();
        let count = ids.len();
        for id in ids {
            self.unregister(&id);
        }
        count
    }

    pub fn unregister(&self, tcp_tunnel_id: &str) {
        if let Some((_, tunnel)) = self.tunnels.remove(tcp_tunnel_id) {
            tunnel.accept_task.abort();
            for tcp_id in tunnel.connection_ids.iter() {
                if let Some((_, proxy)) = self.connections.remove(tcp_id.as_str()) {
                    proxy.close_locally("tcp tunnel torn down".to_string());
                }
            }
            self.in_use.retain(|_, v| v != tcp_tunnel_id);
            info!(tcp_tunnel_id, port = tunnel.server_port, "tcp tunnel closed, port freed");
        }
    }

    pub fn count(&self) -> usize {
        self.tunnels.len()
    }
}

fn spawn_accept_loop(
    tcp_tunnel_id: String,
    listener: TcpListener,
    to_session: mpsc::Sender<Frame>,
    connection_ids: Arc<DashSet<String>>,
    connections: Arc<DashMap<String, TcpConnectionProxy>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(tcp_tunnel_id, error = %e, "tcp accept failed");
                    continue;
                }
            };
            let tcp_id = new_id().to_string();
            info!(tcp_tunnel_id, tcp_id, %peer, "tcp connection accepted");

            let proxy = TcpConnectionProxy::spawn(tcp_id.clone(), socket, to_session.clone());
            connections.insert(tcp_id.clone(), proxy);
            connection_ids.insert(tcp_id.clone());

            let frame = Frame::TcpConnect {
                tcp_id,
                tcp_tunnel_id: tcp_tunnel_id.clone(),
            };
            if to_session.send(frame).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_allocates_first_free_port_in_range() {
        let manager = TcpListenerManager::new(40000..=40001);
        let (tx, _rx) = mpsc::channel(8);
        let (tcp_tunnel_id, port) = manager
            .register("s1".to_string(), 3000, tx)
            .await
            .unwrap();
        assert!((40000..=40001).contains(&port));
        assert_eq!(manager.count(), 1);
        manager.unregister(&tcp_tunnel_id);
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn exhausted_range_yields_no_ports_available() {
        let manager = TcpListenerManager::new(40010..=40010);
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        manager.register("s1".to_string(), 3000, tx1).await.unwrap();
        let err = manager.register("s2".to_string(), 3001, tx2).await.unwrap_err();
        assert!(matches!(err, Error::NoPortsAvailable));
    }

    #[tokio::test]
    async fn freeing_a_port_allows_next_allocation() {
        let manager = TcpListenerManager::new(40020..=40020);
        let (tx1, _rx1) = mpsc::channel(8);
        let (tcp_tunnel_id, port1) = manager.register("s1".to_string(), 3000, tx1).await.unwrap();
        manager.unregister(&tcp_tunnel_id);

        let (tx2, _rx2) = mpsc::channel(8);
        let (_id2, port2) = manager.register("s2".to_string(), 3001, tx2).await.unwrap();
        assert_eq!(port1, port2);
    }

    #[tokio::test]
    async fn unregister_session_frees_every_tunnel_it_owns() {
        let manager = TcpListenerManager::new(40030..=40032);
        let (tx, _rx) = mpsc::channel(8);
        manager.register("s1".to_string(), 3000, tx.clone()).await.unwrap();
        manager.register("s1".to_string(), 3001, tx.clone()).await.unwrap();
        manager.register("s2".to_string(), 3002, tx).await.unwrap();

        let closed = manager.unregister_session("s1");
        assert_eq!(closed, 2);
        assert_eq!(manager.count(), 1);
    }
}
