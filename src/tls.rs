//! TLS engine (spec §6, "TLS interface (consumed)"; §4.3).
//!
//! `rustls`'s `ServerConnection` already is the non-blocking state machine
//! the spec describes; this module only adds the PEM loading step and maps
//! its read/write/process cycle onto the four-way `{done, wants_read,
//! wants_write, fatal}` outcome the Connection engine dispatches on.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::sync::Arc;

use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig, ServerConnection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("reading {path}: {source}")]
    Read { path: String, #[source] source: io::Error },
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("building TLS server config: {0}")]
    Config(#[from] rustls::Error),
}

/// Process-wide TLS configuration, built once at startup from PEM paths
/// (spec §6: "Construct server context from PEM cert chain, optional CA
/// path, and key path").
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

fn load_certs(path: &str) -> Result<Vec<Certificate>, TlsConfigError> {
    let file = File::open(path).map_err(|e| TlsConfigError::Read { path: path.to_string(), source: e })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|e| TlsConfigError::Read { path: path.to_string(), source: e })?;
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &str) -> Result<PrivateKey, TlsConfigError> {
    let file = File::open(path).map_err(|e| TlsConfigError::Read { path: path.to_string(), source: e })?;
    let mut reader = BufReader::new(file);
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|e| TlsConfigError::Read { path: path.to_string(), source: e })?;
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| TlsConfigError::NoPrivateKey(path.to_string()))
}

impl TlsContext {
    pub fn new(cert_path: &str, key_path: &str, ca_path: Option<&str>) -> Result<Self, TlsConfigError> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let builder = ServerConfig::builder().with_safe_defaults();
        let builder = if let Some(ca_path) = ca_path {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                let _ = roots.add(&cert);
            }
            builder.with_client_cert_verifier(Arc::new(
                rustls::server::AllowAnyAuthenticatedClient::new(roots),
            ))
        } else {
            builder.with_no_client_auth()
        };

        let config = builder.with_single_cert(certs, key)?;
        Ok(TlsContext { config: Arc::new(config) })
    }

    pub fn new_session(&self) -> Result<ServerConnection, rustls::Error> {
        ServerConnection::new(self.config.clone())
    }
}

/// Outcome of a single non-blocking handshake (or close-notify) step, spec
/// §4.3 step 3 and §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Done,
    WantsRead,
    WantsWrite,
    Fatal,
}

/// Drive `session` through one read/process/write cycle against `socket`,
/// the shape both the handshake procedure and the goodbye procedure share.
pub fn drive<S: Read + Write>(session: &mut ServerConnection, socket: &mut S) -> Step {
    if session.wants_write() {
        match session.write_tls(socket) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Step::WantsWrite,
            Err(_) => return Step::Fatal,
        }
    }

    if session.wants_read() {
        match session.read_tls(socket) {
            Ok(0) => return Step::Fatal,
            Ok(_) => {
                if session.process_new_packets().is_err() {
                    return Step::Fatal;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => return Step::Fatal,
        }
    }

    if session.is_handshaking() {
        if session.wants_write() {
            Step::WantsWrite
        } else {
            Step::WantsRead
        }
    } else {
        Step::Done
    }
}
