//! Subdomain validation and derivation.

use sha2::{Digest, Sha256};

/// Reserved labels that can never be claimed as a tunnel subdomain.
const RESERVED: &[&str] = &[
    "www", "api", "admin", "app", "dashboard", "status", "health", "metrics",
];

/// Why a candidate subdomain was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    BadLength,
    BadCharacters,
    LeadingOrTrailingHyphen,
    Reserved,
}

/// Validate a candidate subdomain label.
///
/// Valid iff length is in `[2, 32]`, every character is in `[a-z0-9-]`, it
/// does not begin or end with `-`, and it is not a reserved label.
pub fn validate(candidate: &str) -> Result<(), InvalidReason> {
    if candidate.len() < 2 || candidate.len() > 32 {
        return Err(InvalidReason::BadLength);
    }
    if !candidate
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(InvalidReason::BadCharacters);
    }
    if candidate.starts_with('-') || candidate.ends_with('-') {
        return Err(InvalidReason::LeadingOrTrailingHyphen);
    }
    if RESERVED.contains(&candidate) {
        return Err(InvalidReason::Reserved);
    }
    Ok(())
}

pub fn is_valid(candidate: &str) -> bool {
    validate(candidate).is_ok()
}

/// Derive the deterministic subdomain for a client's public key: lowercase
/// hex of the first 8 bytes of SHA-256(public_key).
pub fn derive_from_public_key(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..8])
}

/// Outcome of extracting a subdomain from a `Host` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRoute {
    /// The host is the bare base domain — route to the control surface.
    BaseDomain,
    /// The host carries a tunnel subdomain.
    Subdomain(String),
    /// The host does not belong to the configured base domain at all.
    InvalidDomain,
}

/// Extract the routing decision for an inbound `Host` header, given the
/// configured base domain. Strips an optional `:port` suffix first.
pub fn extract_from_host(host: &str, base_domain: &str) -> HostRoute {
    let host = strip_port(host);
    if host.eq_ignore_ascii_case(base_domain) {
        return HostRoute::BaseDomain;
    }
    let suffix = format!(".{}", base_domain);
    if let Some(prefix) = host.strip_suffix(suffix.as_str()) {
        if !prefix.is_empty() {
            return HostRoute::Subdomain(prefix.to_string());
        }
    }
    HostRoute::InvalidDomain
}

fn strip_port(host: &str) -> &str {
    // IPv6 literals carry colons of their own; only strip a port off a
    // plain `host:port` pair, not a bracketed `[::1]:8080` address.
    if host.starts_with('[') {
        return host;
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}
