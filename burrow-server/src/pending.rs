//! Pending-request correlation table.
//!
//! Generalizes the relay's original `Tunnel::pending_requests` map (a
//! `DashMap<request_id, oneshot::Sender<TunnelResponse>>`) with the
//! timeout and tunnel-scoped bulk-cancellation behaviour the routing core
//! requires, plus a secondary `tunnel_id -> request_ids` index so
//! cancelling a whole session stays O(its own request count).

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use tracing::debug;

use burrow_protocol::Error;

/// Why a pending request resolved without a `tunnel_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Timeout,
    Cancelled,
}

/// The table's own entry holds a hand-off sender, not the requester's real
/// oneshot sender: the monitor task spawned by `register` keeps the real
/// sender so it can watch it for requester death (`Sender::closed`) at the
/// same time as it forwards whatever arrives over this hand-off channel.
struct Entry<R> {
    tunnel_id: String,
    tx: oneshot::Sender<std::result::Result<R, Outcome>>,
}

/// Correlates an outbound public request with the eventual tunnel
/// response, enforcing a per-request deadline and supporting bulk
/// cancellation when a tunnel session dies.
pub struct PendingTable<R: Send + 'static> {
    entries: Arc<DashMap<String, Entry<R>>>,
    by_tunnel: Arc<DashMap<String, DashSet<String>>>,
}

impl<R: Send + 'static> Default for PendingTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + 'static> PendingTable<R> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            by_tunnel: Arc::new(DashMap::new()),
        }
    }

    /// Register a pending request and begin monitoring both its deadline
    /// and the requester handle itself. Returns a receiver resolved exactly
    /// once: by `complete`, by `cancel`/`cancel_for_tunnel`, by the deadline
    /// firing, or — silently, with no delivery — by the requester dropping
    /// its receiver before any of those happen.
    pub fn register(
        &self,
        request_id: String,
        tunnel_id: String,
        deadline: Duration,
    ) -> oneshot::Receiver<std::result::Result<R, Outcome>> {
        let (requester_tx, requester_rx) = oneshot::channel();
        let (handoff_tx, handoff_rx) = oneshot::channel();
        self.entries.insert(
            request_id.clone(),
            Entry {
                tunnel_id: tunnel_id.clone(),
                tx: handoff_tx,
            },
        );
        self.by_tunnel
            .entry(tunnel_id)
            .or_insert_with(DashSet::new)
            .insert(request_id.clone());

        let entries = self.entries.clone();
        let by_tunnel = self.by_tunnel.clone();
        tokio::spawn(async move {
            let mut requester_tx = requester_tx;
            tokio::select! {
                _ = requester_tx.closed() => {
                    // The requester went away (e.g. the public client
                    // disconnected mid-wait) before resolution or timeout.
                    // Drop the entry immediately rather than waiting it out.
                    if entries.remove(&request_id).is_some() {
                        Self::prune_index(&by_tunnel, &tunnel_id, &request_id);
                    }
                }
                _ = tokio::time::sleep_until(Instant::now() + deadline) => {
                    if entries.remove(&request_id).is_some() {
                        Self::prune_index(&by_tunnel, &tunnel_id, &request_id);
                    }
                    let _ = requester_tx.send(Err(Outcome::Timeout));
                }
                resolution = handoff_rx => {
                    let _ = requester_tx.send(resolution.unwrap_or(Err(Outcome::Cancelled)));
                }
            }
        });

        requester_rx
    }

    /// Deliver a response to the requester iff the entry is still
    /// pending. At-most-once: resolving a missing entry is the normal
    /// outcome of a race with cancellation or timeout, not an error.
    pub fn complete(&self, request_id: &str, response: R) {
        if let Some((_, entry)) = self.entries.remove(request_id) {
            Self::prune_index(&self.by_tunnel, &entry.tunnel_id, request_id);
            let _ = entry.tx.send(Ok(response));
        } else {
            debug!(request_id, "completion for unknown or already-resolved request");
        }
    }

    /// Remove an entry without delivering a response. Idempotent.
    pub fn cancel(&self, request_id: &str) {
        if let Some((_, entry)) = self.entries.remove(request_id) {
            Self::prune_index(&self.by_tunnel, &entry.tunnel_id, request_id);
            let _ = entry.tx.send(Err(Outcome::Cancelled));
        }
    }

    /// Cancel every pending request owned by a tunnel session, e.g. on
    /// session disconnect. O(requests currently pending for that tunnel).
    pub fn cancel_for_tunnel(&self, tunnel_id: &str) {
        let Some((_, ids)) = self.by_tunnel.remove(tunnel_id) else {
            return;
        };
        for request_id in ids.iter() {
            if let Some((_, entry)) = self.entries.remove(request_id.as_str()) {
                let _ = entry.tx.send(Err(Outcome::Cancelled));
            }
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn prune_index(by_tunnel: &DashMap<String, DashSet<String>>, tunnel_id: &str, request_id: &str) {
        if let Some(set) = by_tunnel.get(tunnel_id) {
            set.remove(request_id);
            if set.is_empty() {
                drop(set);
                by_tunnel.remove(tunnel_id);
            }
        }
    }
}
