//! Error taxonomy for the server.

use crate::security::SecurityEvent;
use shared::CodecError;
use thiserror::Error;

/// Why an inbound packet was dropped.
///
/// Neither variant is fatal: the dispatcher logs and moves on.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Malformed or truncated data, or a sender that is not seated.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Data that looks like tampering.
    #[error("security violation: {0}")]
    Security(SecurityEvent),
}

impl From<CodecError> for PacketError {
    fn from(err: CodecError) -> Self {
        PacketError::Protocol(err.to_string())
    }
}

impl From<SecurityEvent> for PacketError {
    fn from(event: SecurityEvent) -> Self {
        PacketError::Security(event)
    }
}

/// Failures talking to, or rejections from, the identity service.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity service unreachable: {0}")]
    Unreachable(String),

    #[error("identity service timed out")]
    Timeout,

    #[error("malformed identity service response: {0}")]
    Malformed(String),

    #[error("ticket rejected: {0}")]
    Rejected(String),

    #[error("implausible identity {0}")]
    ImplausibleIdentity(u64),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Timeout
        } else if err.is_decode() {
            AuthError::Malformed(err.to_string())
        } else {
            AuthError::Unreachable(err.to_string())
        }
    }
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Failures in the datagram transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encoding failed: {0}")]
    Frame(#[from] bincode::Error),

    #[error("unknown peer {0}")]
    UnknownPeer(std::net::SocketAddr),
}
