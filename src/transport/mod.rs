//! Connection abstraction driven by the probes.
//!
//! A [`Transport`] owns the [`Report`] of the probe run it serves and records
//! every phase into it: `init` on construction, then `dns`, `connect` and
//! `tls` as the connection moves through its states.

pub mod error;
pub mod lines;
pub mod stream;
pub mod tls;

pub use error::TransportError;
pub use lines::{LineReader, READ_TIMEOUT};
pub use stream::Stream;
pub use tls::VerifyMode;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::report::Report;

/// Upper bound for the TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = READ_TIMEOUT;
/// Upper bound for the hostname lookup.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for establishing the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub ipv6: bool,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, ipv6: bool) -> Self {
        Self {
            host: host.into(),
            port,
            ipv6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unresolved,
    Resolved,
    Connected,
    Secured,
    Closed,
}

pub struct Transport {
    target: Target,
    allow_loopback: bool,
    address: Option<SocketAddr>,
    stream: Option<Stream>,
    state: ConnectionState,
    report: Report,
}

impl Transport {
    pub fn new(target: Target, mut report: Report) -> Self {
        report.debug("Initialising socket");
        report.timer("init");
        Self {
            target,
            allow_loopback: false,
            address: None,
            stream: None,
            state: ConnectionState::Unresolved,
            report,
        }
    }

    /// Permit targets that resolve to the local machine.
    pub fn allow_loopback(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut Report {
        &mut self.report
    }

    /// Hand the report back, closing the connection.
    pub fn into_report(mut self) -> Report {
        self.stream.take();
        self.report
    }

    /// Looks up the target in the requested address family.
    pub async fn resolve(&mut self) -> Result<SocketAddr, TransportError> {
        if let Some(address) = self.address {
            return Ok(address);
        }
        let host = self.target.host.clone();
        self.report.debug(format!("Looking up hostname {host}..."));

        let lookup = lookup_host((host.clone(), self.target.port));
        let candidates: Vec<SocketAddr> = match timeout(RESOLVE_TIMEOUT, lookup).await {
            Ok(Ok(found)) => found.collect(),
            Ok(Err(source)) => {
                self.report.debug(format!("Lookup of {host} failed: {source}"));
                return Err(TransportError::Resolve { host, source });
            }
            Err(_elapsed) => {
                self.report.debug(format!("Lookup of {host} timed out"));
                return Err(TransportError::ResolveTimeout(host, RESOLVE_TIMEOUT));
            }
        };

        let wanted_v6 = self.target.ipv6;
        let Some(address) = candidates.into_iter().find(|a| a.is_ipv6() == wanted_v6) else {
            self.report
                .debug(format!("No {} address for {host}", family_name(wanted_v6)));
            return Err(TransportError::NoAddress(host));
        };
        self.report.timer("dns");

        if is_loopback(address.ip()) && !self.allow_loopback {
            self.report
                .debug(format!("{host} resolved to loopback address {}", address.ip()));
            return Err(TransportError::Loopback(host));
        }

        self.report.debug(format!("Resolved {host} to {}", address.ip()));
        self.address = Some(address);
        self.state = ConnectionState::Resolved;
        Ok(address)
    }

    /// Opens the TCP connection, resolving first if needed.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let address = self.resolve().await?;
        self.report
            .debug(format!("Connecting to {}:{}", address.ip(), address.port()));

        match timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                self.report.timer("connect");
                self.stream = Some(Stream::Plain(stream));
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Ok(Err(err)) => {
                self.report
                    .debug(format!("Connection to {} failed: {err}", address.ip()));
                self.state = ConnectionState::Closed;
                Err(TransportError::Connect(err))
            }
            Err(_elapsed) => {
                self.report
                    .debug(format!("Connection to {} timed out", address.ip()));
                self.state = ConnectionState::Closed;
                Err(TransportError::ConnectTimeout(CONNECT_TIMEOUT))
            }
        }
    }

    /// Upgrades the connection to TLS.
    ///
    /// With `sni` the name is sent and must match the certificate; without
    /// it the handshake is bare and nothing is verified. `verify_cert`
    /// additionally requires a trusted, currently valid chain.
    pub async fn secure(&mut self, sni: Option<&str>, verify_cert: bool) -> Result<(), TransportError> {
        let peer = match &self.stream {
            Some(Stream::Plain(tcp)) => tcp.peer_addr(),
            _ => {
                self.report.debug("TLS upgrade requested without a plain connection");
                return Err(TransportError::NotConnected);
            }
        };
        self.report.debug("Wrapping socket for TLS");

        let prepared = match sni {
            Some(name) => {
                self.report.debug(format!("Using SNI extension for {name}"));
                let mode = if verify_cert {
                    VerifyMode::Strict
                } else {
                    VerifyMode::Lenient
                };
                ServerName::try_from(name.to_string())
                    .map(|server_name| (mode, server_name))
                    .map_err(|_| TransportError::ServerName(name.to_string()))
            }
            None => peer
                .map(|peer| (VerifyMode::Bare, ServerName::from(peer.ip())))
                .map_err(TransportError::Io),
        };
        let prepared = prepared.and_then(|(mode, server_name)| {
            let config = tls::client_config(mode, self.report.offset())?;
            Ok((TlsConnector::from(config), server_name))
        });
        let (connector, server_name) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.report.debug(format!("TLS setup failed: {err}"));
                self.close().await;
                return Err(err);
            }
        };

        let Some(Stream::Plain(tcp)) = self.stream.take() else {
            return Err(TransportError::NotConnected);
        };
        let tls_stream = match timeout(HANDSHAKE_TIMEOUT, connector.connect(server_name, tcp)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.report.debug(format!("TLS handshake failed: {err}"));
                self.state = ConnectionState::Closed;
                return Err(match tls::certificate_failure(&err) {
                    Some(reason) => TransportError::Certificate(reason),
                    None => TransportError::Handshake(err),
                });
            }
            Err(_elapsed) => {
                self.report.debug("TLS handshake timed out");
                self.state = ConnectionState::Closed;
                return Err(TransportError::HandshakeTimeout(HANDSHAKE_TIMEOUT));
            }
        };

        self.report.cert = Some(tls::describe_session(tls_stream.get_ref().1));
        self.report.timer("tls");
        self.report.debug("Shook hands, TLS ready");
        self.stream = Some(Stream::Tls(Box::new(tls_stream)));
        self.state = ConnectionState::Secured;
        Ok(())
    }

    /// Writes raw bytes.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            self.report.debug("Send attempted without a connection");
            return Err(TransportError::NotConnected);
        };
        let mut written = stream.write_all(bytes).await;
        if written.is_ok() {
            written = stream.flush().await;
        }

        match written {
            Ok(()) => {
                self.report.debug(format!("Sent {} bytes", bytes.len()));
                Ok(())
            }
            Err(err) => {
                self.report.debug(format!("Send failed: {err}"));
                Err(TransportError::Io(err))
            }
        }
    }

    /// Writes text, replacing anything outside ASCII with `?`.
    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.send(&encode_lossy(text)).await
    }

    /// Line reader over the connection with the default chunk size,
    /// delimiter and timeout.
    pub fn lines(&mut self) -> Result<LineReader<'_, Stream>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        Ok(LineReader::new(stream, &mut self.report))
    }

    /// Reads at most `max` bytes, waiting up to [`READ_TIMEOUT`]. An empty
    /// result means the peer closed the connection.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = vec![0u8; max];
        let read = timeout(READ_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| TransportError::ReadTimeout(READ_TIMEOUT))??;
        buf.truncate(read);
        self.report.bytes += read as u64;
        Ok(buf)
    }

    /// Shuts the connection down. Safe to call in any state, any number of
    /// times.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.state = ConnectionState::Closed;
    }
}

fn family_name(ipv6: bool) -> &'static str {
    if ipv6 { "IPv6" } else { "IPv4" }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}

fn encode_lossy(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}
