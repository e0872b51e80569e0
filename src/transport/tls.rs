//! TLS client setup and certificate inspection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::time_provider::TimeProvider;
use rustls::{CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;
use x509_parser::prelude::X509Certificate;
use x509_parser::x509::AttributeTypeAndValue;

use super::TransportError;
use crate::report::CertInfo;

/// How much of the peer certificate is verified during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// No SNI and no verification at all.
    Bare,
    /// Hostname must match; an untrusted or expired chain is tolerated.
    Lenient,
    /// Full chain and hostname validation.
    Strict,
}

#[derive(Debug)]
struct ProbeVerifier {
    inner: Arc<WebPkiServerVerifier>,
    mode: VerifyMode,
}

impl ServerCertVerifier for ProbeVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);

        match (self.mode, verdict) {
            (_, Ok(verified)) => Ok(verified),
            (VerifyMode::Strict, Err(err)) => Err(err),
            (VerifyMode::Bare, Err(_)) => Ok(ServerCertVerified::assertion()),
            (VerifyMode::Lenient, Err(rustls::Error::InvalidCertificate(reason)))
                if !matches!(reason, CertificateError::NotValidForName)
                    && !matches!(reason, CertificateError::NotValidForNameContext { .. }) =>
            {
                // Chain is optional here, the name is not.
                let parsed = ParsedCertificate::try_from(end_entity)?;
                rustls::client::verify_server_name(&parsed, server_name)?;
                Ok(ServerCertVerified::assertion())
            }
            (VerifyMode::Lenient, Err(err)) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Wall clock minus the agent's clock offset, the same time base the
/// report records in.
#[derive(Debug)]
struct OffsetClock {
    offset: f64,
}

impl TimeProvider for OffsetClock {
    fn current_time(&self) -> Option<UnixTime> {
        let micros = Utc::now().timestamp_micros() - (self.offset * 1_000_000.0) as i64;
        let micros = u64::try_from(micros).ok()?;
        Some(UnixTime::since_unix_epoch(Duration::from_micros(micros)))
    }
}

/// Build a client configuration trusting the Mozilla root set. Certificate
/// validity is judged at `now - offset`.
pub fn client_config(mode: VerifyMode, offset: f64) -> Result<Arc<ClientConfig>, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| TransportError::TlsConfig(e.to_string()))?;

    let config = client_config_with(
        provider,
        Arc::new(OffsetClock { offset }),
        Arc::new(ProbeVerifier { inner, mode }),
    )?;
    Ok(Arc::new(config))
}

fn client_config_with(
    provider: Arc<CryptoProvider>,
    clock: Arc<dyn TimeProvider>,
    verifier: Arc<dyn ServerCertVerifier>,
) -> Result<ClientConfig, TransportError> {
    Ok(ClientConfig::builder_with_details(provider, clock)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::TlsConfig(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth())
}

/// Unwraps the rustls error carried inside a handshake I/O error, if the
/// certificate was the reason the handshake failed.
pub fn certificate_failure(err: &std::io::Error) -> Option<rustls::Error> {
    let inner = err.get_ref()?.downcast_ref::<rustls::Error>()?;
    match inner {
        rustls::Error::InvalidCertificate(_) => Some(inner.clone()),
        _ => None,
    }
}

/// Collect negotiated parameters and peer certificate details.
pub fn describe_session(conn: &ClientConnection) -> CertInfo {
    let mut info = CertInfo {
        protocol: conn.protocol_version().map(|v| format!("{v:?}")),
        cipher: conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        ..Default::default()
    };

    if let Some(der) = conn.peer_certificates().and_then(|certs| certs.first()) {
        if let Ok((_, parsed)) = parse_x509_certificate(der.as_ref()) {
            fill_certificate(&mut info, &parsed);
        }
    }
    info
}

fn fill_certificate(info: &mut CertInfo, cert: &X509Certificate<'_>) {
    let validity = cert.validity();
    info.not_before = Some(validity.not_before.timestamp());
    info.not_after = Some(validity.not_after.timestamp());
    info.subject = Some(subject_summary(cert));
    info.issuer = Some(cert.issuer().to_string());
}

/// `O=<org>/OU=<unit>/CN=<name>`, the name taken from the first DNS
/// subject alternative name when the certificate has one.
pub fn subject_summary(cert: &X509Certificate<'_>) -> String {
    let san_name = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .and_then(|ext| {
            ext.value.general_names.iter().find_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
        });

    let subject = cert.subject();
    let cn = san_name.unwrap_or_else(|| first_value(subject.iter_common_name()));
    let org = first_value(subject.iter_organization());
    let unit = first_value(subject.iter_organizational_unit());

    format!("O={org}/OU={unit}/CN={cn}")
}

fn first_value<'a, 'b: 'a>(mut values: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>) -> String {
    values
        .find_map(|attr| attr.as_str().ok())
        .unwrap_or("Unknown")
        .to_string()
}
