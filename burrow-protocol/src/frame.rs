//! The tunnel control wire format: one JSON object per WebSocket text
//! message, discriminated by a `type` field, mirroring the
//! `#[serde(tag = "type", rename_all = "snake_case")]` convention already
//! used for this kind of multiplexed frame catalogue elsewhere in the
//! stack this crate follows.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single name/value header pair, preserving declaration order and
/// duplicates (unlike a map).
pub type HeaderPair = (String, String);

/// The Ed25519 attestation proving control of a public key, carried in the
/// first `register_tunnel` frame of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    /// Base64-encoded 32-byte Ed25519 public key.
    pub public_key: String,
    /// Unix timestamp (seconds) the attestation was signed at.
    pub timestamp: i64,
    /// Base64-encoded 64-byte Ed25519 signature.
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_subdomain: Option<String>,
}

/// WebSocket opcode carried by a `ws_frame` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsOpcode {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

/// The full tunnel control frame catalogue (see the wire protocol section
/// of the specification for the authoritative field list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    RegisterTunnel {
        attestation: Attestation,
        local_host: String,
        local_port: u16,
    },
    TunnelRegistered {
        tunnel_id: String,
        subdomain: String,
        full_url: String,
    },
    TunnelRequest {
        request_id: String,
        tunnel_id: String,
        method: String,
        path: String,
        query_string: String,
        headers: Vec<HeaderPair>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body_encoding: Option<String>,
        client_ip: String,
    },
    TunnelResponse {
        request_id: String,
        status: u16,
        headers: Vec<HeaderPair>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body_encoding: Option<String>,
    },
    WsUpgrade {
        ws_id: String,
        tunnel_id: String,
        path: String,
        headers: Vec<HeaderPair>,
    },
    WsUpgraded {
        ws_id: String,
        headers: Vec<HeaderPair>,
    },
    WsFrame {
        ws_id: String,
        opcode: WsOpcode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_encoding: Option<String>,
    },
    WsClose {
        ws_id: String,
        code: u16,
        reason: String,
    },
    RegisterTcpTunnel {
        local_port: u16,
    },
    TcpTunnelRegistered {
        tcp_tunnel_id: String,
        server_port: u16,
        local_port: u16,
    },
    TcpConnect {
        tcp_id: String,
        tcp_tunnel_id: String,
    },
    TcpConnected {
        tcp_id: String,
    },
    TcpData {
        tcp_id: String,
        data: String,
        data_encoding: String,
    },
    TcpClose {
        tcp_id: String,
        reason: String,
    },
    Heartbeat {
        timestamp: i64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Frame {
    /// Encode this frame as the single JSON text message sent over the
    /// WebSocket.
    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::InvalidJson(e.to_string()))
    }

    /// Decode a JSON text message received over the WebSocket.
    pub fn decode(text: &str) -> Result<Frame, Error> {
        serde_json::from_str(text).map_err(|e| Error::InvalidJson(e.to_string()))
    }

    /// Build an out-of-band `error` frame.
    pub fn error(code: &str, message: impl Into<String>) -> Frame {
        Frame::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Encode a body for the wire: raw UTF-8 when possible, otherwise base64
/// with the accompanying `_encoding` field set to `"base64"`.
pub fn encode_body(bytes: &[u8]) -> (Option<String>, Option<String>) {
    if bytes.is_empty() {
        return (None, None);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => (Some(s.to_string()), None),
        Err(_) => (
            Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            Some("base64".to_string()),
        ),
    }
}

/// Decode a body/data field per its optional `_encoding` field. An absent
/// or null encoding means the value is raw UTF-8.
pub fn decode_body(value: Option<&str>, encoding: Option<&str>) -> Result<Vec<u8>, Error> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    match encoding {
        None => Ok(value.as_bytes().to_vec()),
        Some("base64") => base64::engine::general_purpose::STANDARD
            .decode(value)
            .map_err(|e| Error::UnsupportedFormat(e.to_string())),
        Some(other) => Err(Error::UnsupportedFormat(other.to_string())),
    }
}
