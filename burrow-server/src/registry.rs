//! Tunnel registry: `subdomain -> owning tunnel session`, with a
//! cluster-membership seam so a single-node deployment and a
//! multi-process deployment share one registration path.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use burrow_protocol::{Error, Frame};

/// Everything the routing core needs to know about a live HTTP tunnel.
#[derive(Clone)]
pub struct TunnelInfo {
    pub tunnel_id: String,
    pub subdomain: String,
    pub session_id: String,
    pub owner_key: Vec<u8>,
    pub local_host: String,
    pub local_port: u16,
    pub created_at: Instant,
    /// The session's inbox: frames destined for the tunnel client are sent
    /// here and serialized onto its WebSocket by the session task.
    pub outbox: mpsc::Sender<Frame>,
}

/// Cluster-wide name service for subdomain ownership. A single-node
/// deployment uses `LocalDirectory`, whose claim/release are no-ops beyond
/// the process-local map; a clustered deployment backs this with a
/// consensus- or gossip-replicated directory as described for the tunnel
/// registry, exposing the same `claim`/`release`/`lookup_remote` seam.
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    /// Atomically claim `subdomain` for `tunnel_id`. Fails if another
    /// cluster member already holds it.
    async fn claim(&self, subdomain: &str, tunnel_id: &str) -> Result<(), ()>;

    /// Release a previously claimed subdomain.
    async fn release(&self, subdomain: &str);

    /// Ask another cluster member for the full tunnel info it holds for
    /// `subdomain`. Always `None` for a single-node directory.
    async fn lookup_remote(&self, subdomain: &str) -> Option<TunnelInfo>;

    /// Global count of claimed subdomains across the cluster.
    async fn cluster_count(&self) -> usize;
}

/// Single-node cluster directory: claims are resolved purely against the
/// registry's own local map, so this is effectively a pass-through.
pub struct LocalDirectory;

#[async_trait]
impl ClusterDirectory for LocalDirectory {
    async fn claim(&self, _subdomain: &str, _tunnel_id: &str) -> Result<(), ()> {
        Ok(())
    }

    async fn release(&self, _subdomain: &str) {}

    async fn lookup_remote(&self, _subdomain: &str) -> Option<TunnelInfo> {
        None
    }

    async fn cluster_count(&self) -> usize {
        0
    }
}

const REMOTE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// `subdomain -> tunnel-info` registry, plus a `public-key -> subdomains`
/// index for `list_by_client`.
pub struct TunnelRegistry {
    local: DashMap<String, TunnelInfo>,
    by_client: DashMap<Vec<u8>, DashSet<String>>,
    directory: Arc<dyn ClusterDirectory>,
}

impl TunnelRegistry {
    pub fn new(directory: Arc<dyn ClusterDirectory>) -> Self {
        Self {
            local: DashMap::new(),
            by_client: DashMap::new(),
            directory,
        }
    }

    pub fn local_only() -> Self {
        Self::new(Arc::new(LocalDirectory))
    }

    /// Register a tunnel, claiming cluster-wide uniqueness for its
    /// subdomain first. On failure the caller has registered nothing.
    pub async fn register(&self, info: TunnelInfo) -> Result<(), Error> {
        if self.local.contains_key(&info.subdomain) {
            return Err(Error::SubdomainTaken);
        }
        self.directory
            .claim(&info.subdomain, &info.tunnel_id)
            .await
            .map_err(|_| Error::SubdomainTaken)?;

        self.by_client
            .entry(info.owner_key.clone())
            .or_insert_with(DashSet::new)
            .insert(info.subdomain.clone());
        self.local.insert(info.subdomain.clone(), info);
        Ok(())
    }

    /// Look up a tunnel by subdomain: local state first, then a
    /// bounded cross-node RPC that treats timeout as not-found.
    pub async fn lookup(&self, subdomain: &str) -> Option<TunnelInfo> {
        if let Some(info) = self.local.get(subdomain) {
            return Some(info.clone());
        }
        timeout(REMOTE_LOOKUP_TIMEOUT, self.directory.lookup_remote(subdomain))
            .await
            .ok()
            .flatten()
    }

    /// All tunnels on this node registered under `public_key`.
    pub fn list_by_client(&self, public_key: &[u8]) -> Vec<TunnelInfo> {
        let Some(subdomains) = self.by_client.get(public_key) else {
            return Vec::new();
        };
        subdomains
            .iter()
            .filter_map(|s| self.local.get(s.as_str()).map(|e| e.clone()))
            .collect()
    }

    /// Remove a single subdomain's registration, e.g. as part of session
    /// teardown.
    pub async fn unregister(&self, subdomain: &str) {
        if let Some((_, info)) = self.local.remove(subdomain) {
            self.directory.release(subdomain).await;
            if let Some(set) = self.by_client.get(&info.owner_key) {
                set.remove(subdomain);
                if set.is_empty() {
                    drop(set);
                    self.by_client.remove(&info.owner_key);
                }
            }
        }
    }

    /// Remove every tunnel owned by a session, e.g. on disconnect. Returns
    /// the number of tunnels removed, so the caller can keep gauges in sync.
    pub async fn unregister_session(&self, session_id: &str) -> usize {
        let subdomains: Vec<String> = self
            .local
            .iter()
            .filter(|e| e.session_id == session_id)
            .map(|e| e.subdomain.clone())
            .collect();
        let count = subdomains.len();
        for subdomain in subdomains {
            self.unregister(&subdomain).await;
        }
        count
    }

    pub fn count(&self) -> usize {
        self.local.len()
    }

    pub async fn cluster_count(&self) -> usize {
        self.directory.cluster_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_info(subdomain: &str, session_id: &str) -> TunnelInfo {
        let (tx, _rx) = mpsc::channel(8);
        TunnelInfo {
            tunnel_id: format!("tun-{subdomain}"),
            subdomain: subdomain.to_string(),
            session_id: session_id.to_string(),
            owner_key: vec![1, 2, 3],
            local_host: "localhost".to_string(),
            local_port: 3000,
            created_at: Instant::now(),
            outbox: tx,
        }
    }

    #[tokio::test]
    async fn register_then_lookup_round_trips() {
        let registry = TunnelRegistry::local_only();
        registry.register(make_info("myapp", "s1")).await.unwrap();
        let found = registry.lookup("myapp").await.unwrap();
        assert_eq!(found.tunnel_id, "tun-myapp");
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn duplicate_subdomain_is_rejected() {
        let registry = TunnelRegistry::local_only();
        registry.register(make_info("myapp", "s1")).await.unwrap();
        let err = registry.register(make_info("myapp", "s2")).await.unwrap_err();
        assert!(matches!(err, Error::SubdomainTaken));
    }

    #[tokio::test]
    async fn unregister_session_clears_all_its_tunnels_and_index() {
        let registry = TunnelRegistry::local_only();
        registry.register(make_info("a", "s1")).await.unwrap();
        registry.register(make_info("b", "s1")).await.unwrap();
        registry.register(make_info("c", "s2")).await.unwrap();

        let closed = registry.unregister_session("s1").await;

        assert_eq!(closed, 2);
        assert!(registry.lookup("a").await.is_none());
        assert!(registry.lookup("b").await.is_none());
        assert!(registry.lookup("c").await.is_some());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn list_by_client_reflects_only_that_key() {
        let registry = TunnelRegistry::local_only();
        let mut a = make_info("a", "s1");
        a.owner_key = vec![9, 9];
        registry.register(a).await.unwrap();
        registry.register(make_info("b", "s2")).await.unwrap();

        assert_eq!(registry.list_by_client(&[9, 9]).len(), 1);
        assert_eq!(registry.list_by_client(&[1, 2, 3]).len(), 1);
        assert_eq!(registry.list_by_client(&[0]).len(), 0);
    }

    #[tokio::test]
    async fn unregister_prunes_empty_client_index() {
        let registry = TunnelRegistry::local_only();
        registry.register(make_info("a", "s1")).await.unwrap();
        registry.unregister("a").await;
        assert_eq!(registry.list_by_client(&[1, 2, 3]).len(), 0);
        assert!(registry.by_client.is_empty());
    }
}
