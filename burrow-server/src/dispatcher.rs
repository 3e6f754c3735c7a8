//! Hostname dispatcher: routes each inbound public request to either the
//! control surface or the subdomain forwarder.

use burrow_protocol::subdomain::{extract_from_host, HostRoute};

/// Where an inbound public request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Base domain, `localhost`, or an IP literal: health checks, the
    /// auth UI, and the request inspector live here, all external
    /// collaborators to this routing core.
    ControlSurface,
    /// A tunnel subdomain to forward through.
    Subdomain(String),
    /// Host doesn't belong to the configured base domain at all.
    Invalid,
}

pub fn dispatch(host: &str, base_domain: &str) -> Route {
    let bare = strip_port(host);
    if bare.eq_ignore_ascii_case("localhost") || bare.parse::<std::net::IpAddr>().is_ok() {
        return Route::ControlSurface;
    }
    match extract_from_host(host, base_domain) {
        HostRoute::BaseDomain => Route::ControlSurface,
        HostRoute::Subdomain(s) => Route::Subdomain(s),
        HostRoute::InvalidDomain => Route::Invalid,
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host;
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_domain_routes_to_control_surface() {
        assert_eq!(dispatch("burrow.dev", "burrow.dev"), Route::ControlSurface);
    }

    #[test]
    fn localhost_routes_to_control_surface_regardless_of_base() {
        assert_eq!(dispatch("localhost:8080", "burrow.dev"), Route::ControlSurface);
    }

    #[test]
    fn ip_literal_routes_to_control_surface() {
        assert_eq!(dispatch("127.0.0.1", "burrow.dev"), Route::ControlSurface);
        assert_eq!(dispatch("[::1]:443", "burrow.dev"), Route::ControlSurface);
    }

    #[test]
    fn subdomain_routes_to_forwarder() {
        assert_eq!(
            dispatch("myapp.burrow.dev", "burrow.dev"),
            Route::Subdomain("myapp".to_string())
        );
    }

    #[test]
    fn unrelated_host_is_invalid() {
        assert_eq!(dispatch("evil.com", "burrow.dev"), Route::Invalid);
    }
}
