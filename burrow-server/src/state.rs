//! Process-wide shared state: the five registries plus configuration,
//! handed to every connection handler as an `Arc`-backed clone.

use std::sync::Arc;

use crate::acme::AcmeChallengeResponder;
use crate::attestation::ReservationGate;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::pending::PendingTable;
use crate::registry::TunnelRegistry;
use crate::tcp::TcpListenerManager;
use crate::ws_registry::WsProxyRegistry;

/// The tunnel client's reply to a forwarded HTTP request, decoded from its
/// `tunnel_response` frame.
#[derive(Debug, Clone)]
pub struct TunnelResponseMsg {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TunnelRegistry>,
    pub ws_registry: Arc<WsProxyRegistry>,
    pub tcp_manager: Arc<TcpListenerManager>,
    pub pending: Arc<PendingTable<TunnelResponseMsg>>,
    pub metrics: Metrics,
    pub reservation_gate: Arc<dyn ReservationGate>,
    pub acme_responder: Arc<dyn AcmeChallengeResponder>,
}

impl AppState {
    pub fn new(config: Config, reservation_gate: Arc<dyn ReservationGate>) -> Self {
        Self::with_acme_responder(config, reservation_gate, Arc::new(crate::acme::NoAcmeResponder))
    }

    pub fn with_acme_responder(
        config: Config,
        reservation_gate: Arc<dyn ReservationGate>,
        acme_responder: Arc<dyn AcmeChallengeResponder>,
    ) -> Self {
        let ws_registry = WsProxyRegistry::new(config.ws_buffer_ttl());
        ws_registry.spawn_sweeper(config.ws_buffer_sweep_interval());
        Self {
            tcp_manager: Arc::new(TcpListenerManager::new(config.tcp_port_range())),
            registry: Arc::new(TunnelRegistry::local_only()),
            ws_registry,
            pending: Arc::new(PendingTable::new()),
            metrics: Metrics::new(),
            reservation_gate,
            acme_responder,
            config: Arc::new(config),
        }
    }
}
