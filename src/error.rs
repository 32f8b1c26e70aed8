//! Error kinds per the engine's error handling design (spec §7).
//!
//! These are connection- or process-scoped outcomes, not values handed back
//! to an LDAP client (those are [`crate::reply::LdapResult`] result codes
//! instead). [`ConnError`] is what `Connection::respond` and its helpers
//! return internally to decide whether to keep a connection alive.

use thiserror::Error;

/// A fatal condition for a single connection: decode failure, an
/// unsupported protocolOp, an encoder failure, or an I/O error. All of
/// these close the connection without attempting to send an LDAP-level
/// diagnostic ("Protocol-fatal" / "I/O-fatal" in spec §7).
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("malformed BER message")]
    Decode(#[from] nssldapd_ber::Error),
    #[error("unsupported protocolOp")]
    UnsupportedOp,
    #[error("DER encode failure")]
    Encode,
    #[error("inbound buffer full with no complete message")]
    BufferFull,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection")]
    PeerClosed,
}

/// Process-fatal conditions: these abort startup rather than closing a
/// single connection ("Process-fatal" in spec §7).
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind listening socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to build TLS server config: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),
}
