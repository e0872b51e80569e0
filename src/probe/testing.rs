//! Throwaway servers and certificates for probe tests.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::config::AgentConfig;

pub fn test_config() -> Arc<AgentConfig> {
    Arc::new(AgentConfig {
        allow_loopback: true,
        version: "9.9.9".to_string(),
        ..Default::default()
    })
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let port = listener.local_addr().expect("Failed to get local address").port();
    (listener, port)
}

/// Reads until the end of an HTTP request head (or EOF).
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut request = Vec::new();
    let mut buf = [0u8; 512];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    request
}

async fn answer<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, response: &[u8]) -> Vec<u8> {
    let request = read_request(&mut stream).await;
    let _ = stream.write_all(response).await;
    let _ = stream.shutdown().await;
    request
}

/// Accepts one connection, reads the request head, writes `response` and
/// closes. The handle yields the received request.
pub async fn serve_once(response: Vec<u8>) -> (u16, JoinHandle<Vec<u8>>) {
    let (listener, port) = bind().await;
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        answer(stream, &response).await
    });
    (port, handle)
}

/// Accepts one connection and immediately writes `greeting`.
pub async fn serve_greeting(greeting: Vec<u8>) -> u16 {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(&greeting).await;
            let _ = stream.shutdown().await;
        }
    });
    port
}

/// Accepts connections and holds them open without sending anything.
pub async fn serve_silent() -> u16 {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    port
}

/// A self-signed certificate and its PKCS#8 key.
pub struct TestCert {
    pub cert: CertificateDer<'static>,
    pub key: Vec<u8>,
}

/// Self-signed certificate for `name`, valid between the given dates.
pub fn certificate(name: &str, not_before: (i32, u8, u8), not_after: (i32, u8, u8)) -> TestCert {
    let mut params =
        rcgen::CertificateParams::new(vec![name.to_string()]).expect("certificate params");
    params.not_before = rcgen::date_time_ymd(not_before.0, not_before.1, not_before.2);
    params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);
    let key = rcgen::KeyPair::generate().expect("key pair");
    let cert = params.self_signed(&key).expect("self-signed certificate");
    TestCert {
        cert: cert.der().clone(),
        key: key.serialize_der(),
    }
}

/// Date `days` from today as `(year, month, day)`.
pub fn days_from_now(days: i64) -> (i32, u8, u8) {
    let date = Utc::now() + chrono::Duration::days(days);
    (date.year(), date.month() as u8, date.day() as u8)
}

fn acceptor(cert: TestCert) -> TlsAcceptor {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.cert],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key)),
        )
        .expect("server config");
    TlsAcceptor::from(Arc::new(config))
}

/// Like [`serve_once`], behind a TLS handshake presenting `cert`. If the
/// client aborts the handshake the handle yields an empty request.
pub async fn serve_tls_once(cert: TestCert, response: Vec<u8>) -> (u16, JoinHandle<Vec<u8>>) {
    let acceptor = acceptor(cert);
    let (listener, port) = bind().await;
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        match acceptor.accept(stream).await {
            Ok(tls) => answer(tls, &response).await,
            Err(_) => Vec::new(),
        }
    });
    (port, handle)
}

/// Like [`serve_greeting`], behind a TLS handshake presenting `cert`.
pub async fn serve_tls_greeting(cert: TestCert, greeting: Vec<u8>) -> u16 {
    let acceptor = acceptor(cert);
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut tls) = acceptor.accept(stream).await {
                let _ = tls.write_all(&greeting).await;
                let _ = tls.shutdown().await;
            }
        }
    });
    port
}
