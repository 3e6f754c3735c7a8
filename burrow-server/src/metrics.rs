//! Process-wide metrics: atomic counters, a latency histogram, and a
//! Prometheus-text `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    total_requests: AtomicU64,
    active_tunnels: AtomicU64,
    active_tcp_tunnels: AtomicU64,
    active_ws_proxies: AtomicU64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    latencies: Mutex<LatencyHistogram>,
}

struct LatencyHistogram {
    values: Vec<u64>,
    pos: usize,
    count: u64,
    sum: u64,
}

impl LatencyHistogram {
    fn new(capacity: usize) -> Self {
        Self {
            values: vec![0; capacity],
            pos: 0,
            count: 0,
            sum: 0,
        }
    }

    fn record(&mut self, latency_us: u64) {
        self.values[self.pos] = latency_us;
        self.pos = (self.pos + 1) % self.values.len();
        self.count += 1;
        self.sum += latency_us;
    }

    fn percentile(&self, p: f64) -> u64 {
        let count = self.count.min(self.values.len() as u64) as usize;
        if count == 0 {
            return 0;
        }
        let mut sorted: Vec<u64> = if self.count < self.values.len() as u64 {
            self.values[..count].to_vec()
        } else {
            self.values.clone()
        };
        sorted.sort_unstable();
        let idx = ((count as f64 * p / 100.0) as usize).min(count - 1);
        sorted[idx]
    }

    fn average(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum / self.count
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                total_requests: AtomicU64::new(0),
                active_tunnels: AtomicU64::new(0),
                active_tcp_tunnels: AtomicU64::new(0),
                active_ws_proxies: AtomicU64::new(0),
                status_2xx: AtomicU64::new(0),
                status_3xx: AtomicU64::new(0),
                status_4xx: AtomicU64::new(0),
                status_5xx: AtomicU64::new(0),
                bytes_in: AtomicU64::new(0),
                bytes_out: AtomicU64::new(0),
                latencies: Mutex::new(LatencyHistogram::new(10_000)),
            }),
        }
    }

    pub async fn record_request(&self, status: u16, latency_us: u64, bytes_in: u64, bytes_out: u64) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.inner.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        match status / 100 {
            2 => {
                self.inner.status_2xx.fetch_add(1, Ordering::Relaxed);
            }
            3 => {
                self.inner.status_3xx.fetch_add(1, Ordering::Relaxed);
            }
            4 => {
                self.inner.status_4xx.fetch_add(1, Ordering::Relaxed);
            }
            5 => {
                self.inner.status_5xx.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.inner.latencies.lock().await.record(latency_us);
    }

    pub fn tunnel_opened(&self) {
        self.inner.active_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tunnel_closed(&self) {
        self.inner.active_tunnels.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn tcp_tunnel_opened(&self) {
        self.inner.active_tcp_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tcp_tunnel_closed(&self) {
        self.inner.active_tcp_tunnels.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn ws_proxy_opened(&self) {
        self.inner.active_ws_proxies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_proxy_closed(&self) {
        self.inner.active_ws_proxies.fetch_sub(1, Ordering::Relaxed);
    }

    pub async fn to_prometheus(&self) -> String {
        let lat = self.inner.latencies.lock().await;
        let p50 = lat.percentile(50.0);
        let p95 = lat.percentile(95.0);
        let p99 = lat.percentile(99.0);
        let avg = lat.average();
        drop(lat);

        format!(
            r#"# HELP burrow_requests_total Total number of HTTP requests forwarded
# TYPE burrow_requests_total counter
burrow_requests_total {}

# HELP burrow_active_tunnels Number of active HTTP tunnels
# TYPE burrow_active_tunnels gauge
burrow_active_tunnels {}

# HELP burrow_active_tcp_tunnels Number of active TCP tunnels
# TYPE burrow_active_tcp_tunnels gauge
burrow_active_tcp_tunnels {}

# HELP burrow_active_ws_proxies Number of active WebSocket proxy sessions
# TYPE burrow_active_ws_proxies gauge
burrow_active_ws_proxies {}

# HELP burrow_requests_by_status Requests by HTTP status class
# TYPE burrow_requests_by_status counter
burrow_requests_by_status{{status="2xx"}} {}
burrow_requests_by_status{{status="3xx"}} {}
burrow_requests_by_status{{status="4xx"}} {}
burrow_requests_by_status{{status="5xx"}} {}

# HELP burrow_bytes_total Total bytes transferred
# TYPE burrow_bytes_total counter
burrow_bytes_total{{direction="in"}} {}
burrow_bytes_total{{direction="out"}} {}

# HELP burrow_latency_us Request latency in microseconds
# TYPE burrow_latency_us summary
burrow_latency_us{{quantile="0.5"}} {}
burrow_latency_us{{quantile="0.95"}} {}
burrow_latency_us{{quantile="0.99"}} {}
burrow_latency_us_avg {}
"#,
            self.inner.total_requests.load(Ordering::Relaxed),
            self.inner.active_tunnels.load(Ordering::Relaxed),
            self.inner.active_tcp_tunnels.load(Ordering::Relaxed),
            self.inner.active_ws_proxies.load(Ordering::Relaxed),
            self.inner.status_2xx.load(Ordering::Relaxed),
            self.inner.status_3xx.load(Ordering::Relaxed),
            self.inner.status_4xx.load(Ordering::Relaxed),
            self.inner.status_5xx.load(Ordering::Relaxed),
            self.inner.bytes_in.load(Ordering::Relaxed),
            self.inner.bytes_out.load(Ordering::Relaxed),
            p50,
            p95,
            p99,
            avg,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
