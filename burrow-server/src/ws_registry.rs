//! WS-proxy registry.
//!
//! Tracks pending WebSocket upgrades, attached public-side proxies, and a
//! TTL'd frame buffer for the race where a `ws_frame` arrives before the
//! public-side proxy has attached. The buffer's `VecDeque` + `Instant` +
//! max-age filter mirrors the queued-request buffering this relay already
//! did for disconnected tunnel clients, repointed at a per-ws-id frame
//! queue instead of a per-tunnel request queue.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{Duration, Instant};
use tracing::warn;

use burrow_protocol::frame::WsOpcode;

/// Resolution of a pending WebSocket upgrade.
#[derive(Debug, Clone)]
pub enum UpgradeOutcome {
    Ok { headers: Vec<(String, String)> },
    Error { reason: String },
}

/// An event delivered to an attached public-side proxy.
#[derive(Debug, Clone)]
pub enum PublicEvent {
    Frame { opcode: WsOpcode, data: Vec<u8> },
    Close { code: u16, reason: String },
}

struct BufferedFrame {
    opcode: WsOpcode,
    data: Vec<u8>,
    enqueued_at: Instant,
}

pub struct WsProxyRegistry {
    pending: DashMap<String, oneshot::Sender<UpgradeOutcome>>,
    active: DashMap<String, tokio::sync::mpsc::Sender<PublicEvent>>,
    buffer: DashMap<String, Mutex<VecDeque<BufferedFrame>>>,
    ttl: Duration,
}

impl WsProxyRegistry {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            active: DashMap::new(),
            buffer: DashMap::new(),
            ttl,
        })
    }

    /// Spawn the background sweeper that drops buffered frames older than
    /// the configured TTL. Runs until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        });
    }

    async fn sweep(&self) {
        let cutoff = Instant::now() - self.ttl;
        let ws_ids: Vec<String> = self.buffer.iter().map(|e| e.key().clone()).collect();
        for ws_id in ws_ids {
            let Some(queue) = self.buffer.get(&ws_id) else {
                continue;
            };
            let mut queue = queue.lock().await;
            let before = queue.len();
            queue.retain(|f| f.enqueued_at >= cutoff);
            let dropped = before - queue.len();
            if dropped > 0 {
                warn!(ws_id, dropped, "dropped expired buffered ws frames");
            }
        }
    }

    /// Record a pending upgrade, returning the receiver the forwarder
    /// awaits.
    pub fn register_pending(&self, ws_id: String) -> oneshot::Receiver<UpgradeOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(ws_id, tx);
        rx
    }

    /// Deliver the upgrade outcome to the waiting requester and remove the
    /// pending entry. A no-op if the entry is already gone (e.g. the
    /// forwarder timed out first).
    pub fn complete_pending(&self, ws_id: &str, outcome: UpgradeOutcome) {
        if let Some((_, tx)) = self.pending.remove(ws_id) {
            let _ = tx.send(outcome);
        }
    }

    /// Remove a pending upgrade without delivering an outcome, e.g. after
    /// the forwarder's own wait timed out.
    pub fn cancel_pending(&self, ws_id: &str) {
        self.pending.remove(ws_id);
    }

    /// Attach the public-side proxy's inbox, draining any frames buffered
    /// while the upgrade was in flight, in arrival order.
    pub fn attach(&self, ws_id: String, sender: tokio::sync::mpsc::Sender<PublicEvent>) {
        if let Some((_, queue)) = self.buffer.remove(&ws_id) {
            let mut queue = queue.into_inner();
            let cutoff = Instant::now() - self.ttl;
            for frame in queue.drain(..) {
                if frame.enqueued_at >= cutoff {
                    let _ = sender.try_send(PublicEvent::Frame {
                        opcode: frame.opcode,
                        data: frame.data,
                    });
                }
            }
        }
        self.active.insert(ws_id, sender);
    }

    /// Forward a frame arriving from the tunnel client. If no public-side
    /// proxy has attached yet, buffer it for up to the configured TTL.
    pub async fn forward_frame(&self, ws_id: &str, opcode: WsOpcode, data: Vec<u8>) {
        if let Some(sender) = self.active.get(ws_id) {
            let _ = sender.send(PublicEvent::Frame { opcode, data }).await;
            return;
        }
        self.buffer
            .entry(ws_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()))
            .lock()
            .await
            .push_back(BufferedFrame {
                opcode,
                data,
                enqueued_at: Instant::now(),
            });
    }

    /// Notify the attached proxy of a close, if one exists; otherwise, if
    /// the upgrade is still pending, resolve it with an error.
    pub fn notify_close(&self, ws_id: &str, code: u16, reason: String) {
        if let Some(sender) = self.active.get(ws_id) {
            let _ = sender.try_send(PublicEvent::Close { code, reason });
        } else {
            self.complete_pending(
                ws_id,
                UpgradeOutcome::Error {
                    reason: "closed before public-side proxy attached".to_string(),
                },
            );
        }
        self.dispose(ws_id);
    }

    /// Clear every trace of a ws-id: pending upgrade, active proxy, and
    /// buffered frames.
    pub fn dispose(&self, ws_id: &str) {
        self.pending.remove(ws_id);
        self.active.remove(ws_id);
        self.buffer.remove(ws_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_arriving_before_attach_is_buffered_then_drained_in_order() {
        let registry = WsProxyRegistry::new(Duration::from_secs(30));
        registry
            .forward_frame("w1", WsOpcode::Text, b"hello".to_vec())
            .await;
        registry
            .forward_frame("w1", WsOpcode::Text, b"world".to_vec())
            .await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.attach("w1".to_string(), tx);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (PublicEvent::Frame { data: d1, .. }, PublicEvent::Frame { data: d2, .. }) => {
                assert_eq!(d1, b"hello");
                assert_eq!(d2, b"world");
            }
            _ => panic!("expected buffered frames"),
        }
    }

    #[tokio::test]
    async fn frame_after_attach_is_delivered_directly() {
        let registry = WsProxyRegistry::new(Duration::from_secs(30));
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.attach("w1".to_string(), tx);
        registry
            .forward_frame("w1", WsOpcode::Binary, vec![1, 2, 3])
            .await;
        let event = rx.recv().await.unwrap();
        matches!(event, PublicEvent::Frame { .. });
    }

    #[tokio::test]
    async fn pending_upgrade_resolves_with_outcome() {
        let registry = WsProxyRegistry::new(Duration::from_secs(30));
        let rx = registry.register_pending("w1".to_string());
        registry.complete_pending(
            "w1",
            UpgradeOutcome::Ok {
                headers: vec![("x".into(), "y".into())],
            },
        );
        match rx.await.unwrap() {
            UpgradeOutcome::Ok { headers } => assert_eq!(headers.len(), 1),
            UpgradeOutcome::Error { .. } => panic!("expected ok"),
        }
    }

    #[tokio::test]
    async fn completing_pending_twice_is_harmless() {
        let registry = WsProxyRegistry::new(Duration::from_secs(30));
        registry.complete_pending("ghost", UpgradeOutcome::Error { reason: "x".into() });
    }

    #[tokio::test]
    async fn expired_buffered_frame_is_dropped_before_attach() {
        let registry = WsProxyRegistry::new(Duration::from_millis(10));
        registry
            .forward_frame("w1", WsOpcode::Text, b"stale".to_vec())
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.attach("w1".to_string(), tx);
        drop(rx.try_recv());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispose_clears_all_three_categories() {
        let registry = WsProxyRegistry::new(Duration::from_secs(30));
        let _rx = registry.register_pending("w1".to_string());
        registry
            .forward_frame("w1", WsOpcode::Text, b"x".to_vec())
            .await;
        registry.dispose("w1");
        assert!(registry.pending.is_empty());
        assert!(registry.buffer.is_empty());
        assert!(registry.active.is_empty());
    }
}
