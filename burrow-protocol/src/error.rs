//! Error taxonomy for the Burrow wire protocol.
//!
//! Every variant carries a stable wire `code()` used both in `error` frames
//! sent to tunnel clients and in structured log fields.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid JSON frame: {0}")]
    InvalidJson(String),

    #[error("unsupported body encoding: {0}")]
    UnsupportedFormat(String),

    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    #[error("missing attestation")]
    MissingAttestation,

    #[error("invalid attestation signature")]
    InvalidSignature,

    #[error("attestation expired")]
    AttestationExpired,

    #[error("subdomain already taken")]
    SubdomainTaken,

    #[error("no ports available in configured range")]
    NoPortsAvailable,

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("request timed out")]
    Timeout,

    #[error("request body exceeds configured limit")]
    BodyTooLarge,

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable wire/log code, matching the catalogue in the spec's error
    /// handling section.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "invalid_json",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::UnknownMessage(_) => "unknown_message",
            Error::MissingAttestation => "missing_attestation",
            Error::InvalidSignature => "invalid_signature",
            Error::AttestationExpired => "attestation_expired",
            Error::SubdomainTaken => "subdomain_taken",
            Error::NoPortsAvailable => "no_ports_available",
            Error::RegistrationFailed(_) => "registration_failed",
            Error::Timeout => "timeout",
            Error::BodyTooLarge => "body_too_large",
            Error::BadGateway(_) => "bad_gateway",
            Error::Io(_) => "io_error",
        }
    }
}
