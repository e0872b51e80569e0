use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::report::ErrorKind;

/// Errors raised by [`Transport`](super::Transport) operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not resolve hostname {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Lookup of {0} timed out after {secs} seconds", secs = .1.as_secs())]
    ResolveTimeout(String, Duration),

    #[error("Could not resolve host {0}")]
    NoAddress(String),

    #[error("Hostname {0} points to localhost!")]
    Loopback(String),

    #[error("Could not connect to host: {0}")]
    Connect(#[source] io::Error),

    #[error("Could not connect to host: timed out after {} seconds", .0.as_secs())]
    ConnectTimeout(Duration),

    #[error("Invalid TLS server name {0}")]
    ServerName(String),

    #[error("TLS configuration failed: {0}")]
    TlsConfig(String),

    #[error("Certificate rejected: {0}")]
    Certificate(#[source] rustls::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("TLS handshake timed out after {} seconds", .0.as_secs())]
    HandshakeTimeout(Duration),

    #[error("Socket timeout after {} seconds", .0.as_secs())]
    ReadTimeout(Duration),

    #[error("Socket is not connected")]
    NotConnected,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// The report error category this failure belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Resolve { .. }
            | TransportError::ResolveTimeout(..)
            | TransportError::NoAddress(_)
            | TransportError::Loopback(_) => ErrorKind::Dns,
            TransportError::Connect(_) | TransportError::ConnectTimeout(_) => ErrorKind::Connect,
            TransportError::Certificate(_) => ErrorKind::Certificate,
            TransportError::ServerName(_)
            | TransportError::TlsConfig(_)
            | TransportError::Handshake(_)
            | TransportError::HandshakeTimeout(_)
            | TransportError::ReadTimeout(_)
            | TransportError::NotConnected
            | TransportError::Io(_) => ErrorKind::Response,
        }
    }
}
