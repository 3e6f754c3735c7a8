//! Server configuration: CLI flags with environment-variable fallback.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "burrowd", about = "Burrow reverse-tunnel server")]
pub struct Config {
    /// Base domain under which tunnel subdomains are routed.
    #[arg(long, env = "BURROW_BASE_DOMAIN", default_value = "burrow.dev")]
    pub base_domain: String,

    /// HTTPS listener port.
    #[arg(long, env = "BURROW_LISTENER_PORT", default_value_t = 443)]
    pub listener_port: u16,

    /// Plain-HTTP listener port, used only for ACME HTTP-01 challenge
    /// responses handled by an external collaborator.
    #[arg(long, env = "BURROW_HTTP_LISTENER_PORT", default_value_t = 80)]
    pub http_listener_port: u16,

    /// PEM certificate chain file.
    #[arg(long, env = "BURROW_TLS_CERT_FILE")]
    pub tls_cert_file: Option<PathBuf>,

    /// PEM private key file.
    #[arg(long, env = "BURROW_TLS_KEY_FILE")]
    pub tls_key_file: Option<PathBuf>,

    /// Low end of the dynamic TCP tunnel port range.
    #[arg(long, env = "BURROW_TCP_PORT_RANGE_LOW", default_value_t = 40000)]
    pub tcp_port_range_low: u16,

    /// High end of the dynamic TCP tunnel port range (inclusive).
    #[arg(long, env = "BURROW_TCP_PORT_RANGE_HIGH", default_value_t = 40019)]
    pub tcp_port_range_high: u16,

    /// Seconds to wait for a tunnel_response before failing a request with 504.
    #[arg(long, env = "BURROW_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Seconds to wait for a WebSocket upgrade confirmation from the client.
    #[arg(long, env = "BURROW_WS_UPGRADE_TIMEOUT_SECS", default_value_t = 10)]
    pub ws_upgrade_timeout_secs: u64,

    /// TTL for buffered ws_frame messages that arrive before the public-side
    /// proxy attaches.
    #[arg(long, env = "BURROW_WS_BUFFER_TTL_SECS", default_value_t = 30)]
    pub ws_buffer_ttl_secs: u64,

    /// Interval at which the WS-proxy registry sweeps expired buffered frames.
    #[arg(long, env = "BURROW_WS_BUFFER_SWEEP_INTERVAL_SECS", default_value_t = 10)]
    pub ws_buffer_sweep_interval_secs: u64,

    /// Maximum inbound request body, in bytes.
    #[arg(long, env = "BURROW_MAX_REQUEST_BODY", default_value_t = 10 * 1024 * 1024)]
    pub max_request_body: usize,

    /// Interval at which a tunnel session sends a WebSocket PING.
    #[arg(long, env = "BURROW_HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Bound on clock skew tolerated when an attestation's timestamp is in
    /// the future.
    #[arg(long, env = "BURROW_ATTESTATION_FUTURE_SKEW_SECS", default_value_t = 60)]
    pub attestation_future_skew_secs: i64,

    /// Bound on how old an attestation's timestamp may be.
    #[arg(long, env = "BURROW_ATTESTATION_MAX_AGE_SECS", default_value_t = 300)]
    pub attestation_max_age_secs: i64,

    /// Log filter directive passed to the tracing env-filter.
    #[arg(long, env = "BURROW_LOG", default_value = "burrow_server=info")]
    pub log_filter: String,
}

impl Config {
    pub fn tcp_port_range(&self) -> RangeInclusive<u16> {
        self.tcp_port_range_low..=self.tcp_port_range_high
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ws_upgrade_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ws_upgrade_timeout_secs)
    }

    pub fn ws_buffer_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ws_buffer_ttl_secs)
    }

    pub fn ws_buffer_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ws_buffer_sweep_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Validate configuration that can't be enforced by clap alone.
    /// Returns a human-readable message on failure; callers exit non-zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_domain.trim().is_empty() {
            return Err("base_domain must not be empty".to_string());
        }
        if self.tcp_port_range_low > self.tcp_port_range_high {
            return Err(format!(
                "tcp_port_range low ({}) is greater than high ({})",
                self.tcp_port_range_low, self.tcp_port_range_high
            ));
        }
        if self.tls_cert_file.is_some() != self.tls_key_file.is_some() {
            return Err("tls_cert_file and tls_key_file must be set together".to_string());
        }
        for (name, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("ws_upgrade_timeout_secs", self.ws_upgrade_timeout_secs),
            ("ws_buffer_ttl_secs", self.ws_buffer_ttl_secs),
            ("ws_buffer_sweep_interval_secs", self.ws_buffer_sweep_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("{name} must be non-zero"));
            }
        }
        Ok(())
    }
}
