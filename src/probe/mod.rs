//! Protocol probes.
//!
//! Each probe builds a fresh [`Report`], binds it to a [`Transport`], drives
//! the protocol exchange and hands the report back. Probes never fail from
//! the caller's point of view: every problem ends up as the report's error.

pub mod http;
pub mod smtp;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpProbe;
pub use smtp::SmtpProbe;
pub use tcp::TcpProbe;

use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AgentConfig, CheckConfig, ProbeKind, ProbeParams};
use crate::report::{ErrorKind, Report};
use crate::transport::{Target, Transport, TransportError};

/// Status recorded by probes that only prove reachability.
pub const CONNECTION_ACCEPTED: &str = "Connection accepted";

#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// Execute the probe against the target described by `params`.
    async fn run(&self, params: &ProbeParams) -> Report;
}

/// Why a probe run stopped early.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Any error, filed as a generic response failure.
    pub fn response(err: impl std::error::Error + 'static) -> Self {
        Self::new(ErrorKind::Response, describe(&err))
    }
}

impl From<TransportError> for ProbeFailure {
    fn from(err: TransportError) -> Self {
        Self::new(err.kind(), describe(&err))
    }
}

/// Error message including its source chain, skipping causes the message
/// already spells out.
fn describe(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let cause = src.to_string();
        if !s.contains(&cause) {
            let _ = write!(s, ": {}", cause);
        }
        err = src;
    }
    s
}

/// Create a probe of the given kind sharing `config`.
pub fn create_probe(kind: ProbeKind, config: Arc<AgentConfig>) -> Box<dyn Probe> {
    match kind {
        ProbeKind::Tcp => Box::new(TcpProbe::new(config)),
        ProbeKind::Http => Box::new(HttpProbe::new(config)),
        ProbeKind::Smtp => Box::new(SmtpProbe::new(config)),
    }
}

/// Run every check concurrently, one task per probe, returning the
/// reports in the order of `checks`.
pub async fn run_checks(checks: &[CheckConfig], config: Arc<AgentConfig>) -> Vec<Report> {
    let mut handles = vec![];

    for check in checks {
        let probe = create_probe(check.probe, config.clone());
        let params = check.params.clone();
        handles.push(tokio::spawn(async move { probe.run(&params).await }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(err) => {
                log::error!("Probe task failed: {err}");
                let mut report = Report::new(&config);
                report.error(ErrorKind::Response, format!("Probe task failed: {err}"));
                reports.push(report);
            }
        }
    }
    reports
}

/// Validates parameters and binds a fresh report to a transport. An
/// invalid invocation yields the finished report instead.
fn open_transport(
    config: &AgentConfig,
    params: &ProbeParams,
    default_port: u16,
) -> Result<Transport, Report> {
    let mut report = Report::new(config);
    let host = params.host.trim();
    if host.is_empty() {
        report.error(ErrorKind::Init, "No host specified");
        return Err(report);
    }
    if params.port == Some(0) {
        report.error(ErrorKind::Init, "Port must be between 1 and 65535");
        return Err(report);
    }

    let target = Target::new(host, params.port_or(default_port), params.ipv6);
    Ok(Transport::new(target, report).allow_loopback(config.allow_loopback))
}

/// Files the outcome, releases the connection and returns the report.
async fn finish(mut transport: Transport, outcome: Result<(), ProbeFailure>) -> Report {
    if let Err(failure) = outcome {
        log::debug!(
            "Probe against {} failed [{}]: {}",
            transport.target().host,
            failure.kind,
            failure.message
        );
        transport.report_mut().error(failure.kind, failure.message);
    }
    transport.close().await;
    transport.into_report()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckConfig, HttpScheme};
    use testing::{serve_once, test_config};

    #[test]
    fn test_describe_skips_repeated_causes() {
        let err = TransportError::Connect(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(describe(&err), "Could not connect to host: refused");
    }

    #[test]
    fn test_failure_from_transport_error_keeps_kind() {
        let failure = ProbeFailure::from(TransportError::Loopback("x.test".into()));
        assert_eq!(failure.kind, ErrorKind::Dns);
        assert_eq!(failure.message, "Hostname x.test points to localhost!");
    }

    #[tokio::test]
    async fn test_empty_host_is_an_init_error() {
        for kind in [ProbeKind::Tcp, ProbeKind::Http, ProbeKind::Smtp] {
            let probe = create_probe(kind, test_config());
            assert_eq!(probe.kind(), kind);
            let report = probe.run(&ProbeParams::new("  ")).await;
            let error = report.last_error().expect("error");
            assert_eq!(error.component, ErrorKind::Init);
            assert!(report.timers().is_empty());
        }
    }

    #[tokio::test]
    async fn test_run_checks_concurrently_in_order() {
        let (http_port, _server) = serve_once(b"HTTP/1.1 204 No Content\r\n\r\n".to_vec()).await;

        let mut http = ProbeParams::new("127.0.0.1");
        http.port = Some(http_port);
        http.scheme = HttpScheme::Http;

        let checks = vec![
            CheckConfig {
                probe: ProbeKind::Http,
                params: http,
            },
            CheckConfig {
                probe: ProbeKind::Tcp,
                params: ProbeParams::new(""),
            },
        ];

        let reports = run_checks(&checks, test_config()).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].status_code.as_deref(), Some("204 No Content"));
        assert!(!reports[0].has_error());
        assert_eq!(
            reports[1].last_error().map(|e| e.component),
            Some(ErrorKind::Init)
        );
        assert_ne!(reports[0].id, reports[1].id);
    }
}
