//! HTTP(S) request probing

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Probe, ProbeFailure, finish, open_transport};
use crate::config::{AgentConfig, HttpScheme, ProbeKind, ProbeParams};
use crate::report::{CertInfo, ErrorKind, Report};
use crate::transport::Transport;

/// Response body bytes read after the headers.
pub const BODY_LIMIT: usize = 10 * 1024;
const BODY_CHUNK: usize = 1024;
/// `warncert` fails certificates expiring within this many seconds.
const EXPIRY_WARNING: f64 = 7.0 * 86400.0;

static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^HTTP/[0-9.]+ (\d{3})((?: .*)?)$").expect("valid status regex"));
static SERVER_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^Server:\s*(.+)$").expect("valid server regex"));
static LOCATION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^Location:\s*(.+)$").expect("valid location regex"));

/// Sends a minimal HTTP/1.1 request and inspects the status line, a couple
/// of headers and the start of the body.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    config: Arc<AgentConfig>,
}

impl HttpProbe {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    async fn execute(&self, transport: &mut Transport, params: &ProbeParams) -> Result<(), ProbeFailure> {
        transport.connect().await?;

        let vhost = params.vhost().trim().to_string();
        if params.scheme == HttpScheme::Https {
            transport.secure(Some(&vhost), params.checkcert).await?;
            let report = transport.report_mut();
            report.debug("Connected, sending HTTPS payload.");
            if let Some(cert) = report.cert.clone() {
                report.debug("Analyzing server certificate");
                check_certificate(&cert, report.now(), params.checkcert, params.warncert)?;
            }
        } else {
            transport.report_mut().debug("Connected, sending HTTP payload.");
        }

        let request = build_request(&params.method(), params.uri(), &vhost, &self.config.version);
        transport.send_text(&request).await?;
        transport.report_mut().timer("send");
        transport.report_mut().debug("Reading response header from server");

        let threshold = params.ise_threshold();
        let (status_seen, failure_line, remainder) = {
            let mut lines = transport.lines()?;
            let mut status_seen = false;
            let mut failure_line = None;

            while let Some(raw) = lines.next_line().await? {
                let decoded = String::from_utf8_lossy(&raw);
                let line = decoded.trim_end_matches('\r');
                let report = lines.report();

                if !status_seen {
                    report.timer("read");
                    let captures = STATUS_LINE.captures(line).ok_or_else(|| {
                        ProbeFailure::new(
                            ErrorKind::Response,
                            format!("Invalid HTTP response received: {line}"),
                        )
                    })?;
                    let code: u16 = captures[1].parse().map_err(ProbeFailure::response)?;
                    let status_code = format!("{}{}", &captures[1], &captures[2]);
                    report.debug(format!("Server response code: {status_code}"));
                    report.status_code = Some(status_code);
                    if threshold.is_some_and(|limit| code > limit) {
                        failure_line = Some(line.to_string());
                    }
                    status_seen = true;
                    continue;
                }

                if line.is_empty() {
                    break;
                }
                if let Some(captures) = SERVER_HEADER.captures(line) {
                    let server = captures[1].trim().to_string();
                    report.debug(format!("Server software is: {server}"));
                    report.server = Some(server);
                }
                if let Some(captures) = LOCATION_HEADER.captures(line) {
                    report.location = Some(captures[1].trim().to_string());
                }
            }
            (status_seen, failure_line, lines.into_remainder())
        };

        if !status_seen {
            return Err(ProbeFailure::new(
                ErrorKind::Response,
                "Server closed the connection without a response",
            ));
        }
        if let Some(line) = failure_line {
            return Err(ProbeFailure::new(
                ErrorKind::Response,
                format!("Internal Server Error or equivalent bad message received: {line}"),
            ));
        }

        transport
            .report_mut()
            .debug("Reading response body (up to 10kb)");
        let body = read_body(transport, remainder.len()).await;
        let report = transport.report_mut();
        report.body_bytes = Some(body as u64);
        report.timer("data");
        report.debug("All went well, closing socket.");
        transport.close().await;
        transport.report_mut().timer("end");
        Ok(())
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }

    async fn run(&self, params: &ProbeParams) -> Report {
        let default_port = match params.scheme {
            HttpScheme::Http => 80,
            HttpScheme::Https => 443,
        };
        let mut transport = match open_transport(&self.config, params, default_port) {
            Ok(transport) => transport,
            Err(report) => return report,
        };
        let outcome = self.execute(&mut transport, params).await;
        finish(transport, outcome).await
    }
}

/// Request line and the three headers every probe request carries.
pub fn build_request(method: &str, uri: &str, vhost: &str, version: &str) -> String {
    format!(
        "{method} {uri} HTTP/1.1\r\nConnection: close\r\nHost: {vhost}\r\nUser-Agent: oxyprobe/{version}\r\n\r\n"
    )
}

/// Applies the validity (`checkcert`) and expiry warning (`warncert`)
/// policies against `now`, in Unix seconds.
pub fn check_certificate(
    cert: &CertInfo,
    now: f64,
    checkcert: bool,
    warncert: bool,
) -> Result<(), ProbeFailure> {
    if checkcert {
        if cert.not_before.is_some_and(|first| first as f64 > now) {
            return Err(ProbeFailure::new(
                ErrorKind::Certificate,
                "HTTPS certificate is not yet valid (notBefore is greater than today)",
            ));
        }
        if cert.not_after.is_some_and(|last| (last as f64) < now) {
            return Err(ProbeFailure::new(
                ErrorKind::Certificate,
                "HTTPS certificate has expired (notAfter is less than today)",
            ));
        }
    }
    if warncert {
        if let Some(last) = cert.not_after {
            let remaining = last as f64 - now;
            if remaining < EXPIRY_WARNING {
                let days = (remaining / 86400.0) as i64;
                return Err(ProbeFailure::new(
                    ErrorKind::Certificate,
                    format!("HTTPS certificate is about to expire ({days} days from now)!"),
                ));
            }
        }
    }
    Ok(())
}

/// Best-effort body read, counting `already` bytes buffered with the
/// headers. Stops at the limit, at EOF or on the first error.
async fn read_body(transport: &mut Transport, already: usize) -> usize {
    let mut collected = already;
    while collected < BODY_LIMIT {
        let want = (BODY_LIMIT - collected).min(BODY_CHUNK);
        match transport.read_chunk(want).await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => collected += chunk.len(),
            Err(err) => {
                transport
                    .report_mut()
                    .debug(format!("Stopped reading body: {err}"));
                break;
            }
        }
    }
    collected.min(BODY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{
        certificate, days_from_now, serve_once, serve_tls_once, test_config,
    };

    fn params(port: u16) -> ProbeParams {
        let mut params = ProbeParams::new("127.0.0.1");
        params.port = Some(port);
        params
    }

    fn response(head: &str, body: &[u8]) -> Vec<u8> {
        let mut bytes = head.as_bytes().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn test_build_request_is_byte_exact() {
        assert_eq!(
            build_request("GET", "/", "example.test", "1.0.0"),
            "GET / HTTP/1.1\r\nConnection: close\r\nHost: example.test\r\nUser-Agent: oxyprobe/1.0.0\r\n\r\n"
        );
    }

    #[test]
    fn test_status_line_pattern() {
        let caps = STATUS_LINE.captures("http/1.0 404 Not Found").expect("match");
        assert_eq!(&caps[1], "404");
        assert_eq!(&caps[2], " Not Found");
        assert!(STATUS_LINE.captures("SSH-2.0-OpenSSH_9.6").is_none());
        assert!(STATUS_LINE.captures("HTTP/1.1 20 OK").is_none());
        assert!(STATUS_LINE.captures("HTTP/1.1 2000 OK").is_none());
        assert!(STATUS_LINE.captures("HTTP/1.1 200OK").is_none());
        let caps = STATUS_LINE.captures("HTTP/1.1 204").expect("bare code");
        assert_eq!(&caps[1], "204");
        assert_eq!(&caps[2], "");
    }

    #[test]
    fn test_check_certificate_policies() {
        let now = 1_700_000_000.0;
        let cert = |not_before: i64, not_after: i64| CertInfo {
            not_before: Some(not_before),
            not_after: Some(not_after),
            ..Default::default()
        };

        let valid = cert(1_600_000_000, 1_800_000_000);
        assert!(check_certificate(&valid, now, true, true).is_ok());

        let expired = cert(1_600_000_000, 1_650_000_000);
        let failure = check_certificate(&expired, now, true, false).expect_err("expired");
        assert_eq!(failure.kind, ErrorKind::Certificate);
        assert!(failure.message.contains("has expired"));
        assert!(check_certificate(&expired, now, false, false).is_ok());

        let future = cert(1_750_000_000, 1_800_000_000);
        let failure = check_certificate(&future, now, true, false).expect_err("not yet valid");
        assert!(failure.message.contains("not yet valid"));

        let expiring = cert(1_600_000_000, 1_700_000_000 + 3 * 86400 + 60);
        let failure = check_certificate(&expiring, now, false, true).expect_err("expiring");
        assert_eq!(failure.kind, ErrorKind::Certificate);
        assert_eq!(
            failure.message,
            "HTTPS certificate is about to expire (3 days from now)!"
        );
    }

    #[tokio::test]
    async fn test_http_probe_success() {
        let body = vec![b'x'; 4096];
        let (port, server) =
            serve_once(response("HTTP/1.1 200 OK\r\nServer: X\r\nLocation: /next\r\n\r\n", &body)).await;
        let mut params = params(port);
        params.vhost = Some("example.test".to_string());
        params.method = Some("get".to_string());

        let report = HttpProbe::new(test_config()).run(&params).await;

        assert!(!report.has_error(), "unexpected error: {:?}", report.last_error());
        assert!(report.status_code.as_deref().unwrap().starts_with("200"));
        assert_eq!(report.status_code.as_deref(), Some("200 OK"));
        assert_eq!(report.server.as_deref(), Some("X"));
        assert_eq!(report.location.as_deref(), Some("/next"));
        assert_eq!(report.body_bytes, Some(4096));

        let timers = report.timers();
        assert!(timers["send"] <= timers["read"]);
        assert!(timers["read"] <= timers["data"]);
        assert!(timers["data"] <= timers["end"]);

        let request = String::from_utf8(server.await.unwrap()).unwrap();
        assert_eq!(
            request,
            "GET / HTTP/1.1\r\nConnection: close\r\nHost: example.test\r\nUser-Agent: oxyprobe/9.9.9\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_http_probe_caps_body() {
        let body = vec![b'y'; 3 * BODY_LIMIT];
        let (port, _server) = serve_once(response("HTTP/1.1 200 OK\r\n\r\n", &body)).await;

        let report = HttpProbe::new(test_config()).run(&params(port)).await;

        assert!(!report.has_error(), "unexpected error: {:?}", report.last_error());
        assert_eq!(report.body_bytes, Some(BODY_LIMIT as u64));
    }

    #[tokio::test]
    async fn test_http_probe_ise_threshold() {
        let (port, _server) = serve_once(response(
            "HTTP/1.1 503 Service Unavailable\r\nServer: Y\r\n\r\n",
            b"down",
        ))
        .await;
        let mut params = params(port);
        params.ise = Some(499);

        let report = HttpProbe::new(test_config()).run(&params).await;

        let error = report.last_error().expect("response error");
        assert_eq!(error.component, ErrorKind::Response);
        assert!(error.message.contains("HTTP/1.1 503 Service Unavailable"));
        assert_eq!(report.server.as_deref(), Some("Y"));
        assert!(report.body_bytes.is_none());
        assert!(!report.timers().contains_key("data"));
    }

    #[tokio::test]
    async fn test_http_probe_below_threshold_passes() {
        let (port, _server) = serve_once(response("HTTP/1.1 404 Not Found\r\n\r\n", b"")).await;
        let mut params = params(port);
        params.ise = Some(499);

        let report = HttpProbe::new(test_config()).run(&params).await;

        assert!(!report.has_error(), "unexpected error: {:?}", report.last_error());
        assert_eq!(report.body_bytes, Some(0));
    }

    #[tokio::test]
    async fn test_http_probe_invalid_status_line() {
        let (port, _server) = serve_once(b"SSH-2.0-OpenSSH_9.6\r\n".to_vec()).await;

        let report = HttpProbe::new(test_config()).run(&params(port)).await;

        let error = report.last_error().expect("response error");
        assert_eq!(error.component, ErrorKind::Response);
        assert!(error.message.starts_with("Invalid HTTP response received"));
        assert!(report.timers().contains_key("read"));
        assert!(!report.timers().contains_key("data"));
    }

    #[tokio::test]
    async fn test_http_probe_rejects_four_digit_status() {
        let (port, _server) = serve_once(b"HTTP/1.1 2000 OK\r\n\r\nbody".to_vec()).await;

        let report = HttpProbe::new(test_config()).run(&params(port)).await;

        let error = report.last_error().expect("response error");
        assert_eq!(error.component, ErrorKind::Response);
        assert_eq!(error.message, "Invalid HTTP response received: HTTP/1.1 2000 OK");
        assert!(report.status_code.is_none());
        assert!(report.body_bytes.is_none());
    }

    #[tokio::test]
    async fn test_http_probe_empty_response() {
        let (port, _server) = serve_once(Vec::new()).await;

        let report = HttpProbe::new(test_config()).run(&params(port)).await;

        assert_eq!(
            report.last_error().map(|e| e.component),
            Some(ErrorKind::Response)
        );
    }

    #[tokio::test]
    async fn test_https_probe_lenient_accepts_self_signed() {
        let cert = certificate("example.test", (2020, 1, 1), (2099, 1, 1));
        let (port, _server) =
            serve_tls_once(cert, response("HTTP/1.1 200 OK\r\n\r\n", b"secure")).await;
        let mut params = params(port);
        params.scheme = HttpScheme::Https;
        params.vhost = Some("example.test".to_string());

        let report = HttpProbe::new(test_config()).run(&params).await;

        assert!(!report.has_error(), "unexpected error: {:?}", report.last_error());
        assert_eq!(report.body_bytes, Some(6));
        let cert = report.cert.as_ref().expect("certificate captured");
        assert!(cert.protocol.is_some());
        assert!(cert.cipher.is_some());
        assert_eq!(cert.subject.as_deref(), Some("O=Unknown/OU=Unknown/CN=example.test"));
        assert!(report.timers().contains_key("tls"));
    }

    #[tokio::test]
    async fn test_https_probe_checkcert_rejects_expired() {
        let cert = certificate("example.test", (2000, 1, 1), (2001, 1, 1));
        let (port, server) = serve_tls_once(cert, response("HTTP/1.1 200 OK\r\n\r\n", b"")).await;
        let mut params = params(port);
        params.scheme = HttpScheme::Https;
        params.vhost = Some("example.test".to_string());
        params.checkcert = true;

        let report = HttpProbe::new(test_config()).run(&params).await;

        let error = report.last_error().expect("certificate error");
        assert_eq!(error.component, ErrorKind::Certificate);
        assert!(!report.timers().contains_key("send"));
        assert!(!report.timers().contains_key("read"));
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_https_probe_warncert() {
        let cert = certificate("example.test", (2020, 1, 1), days_from_now(3));
        let (port, _server) = serve_tls_once(cert, response("HTTP/1.1 200 OK\r\n\r\n", b"")).await;
        let mut params = params(port);
        params.scheme = HttpScheme::Https;
        params.vhost = Some("example.test".to_string());
        params.warncert = true;

        let report = HttpProbe::new(test_config()).run(&params).await;

        let error = report.last_error().expect("certificate error");
        assert_eq!(error.component, ErrorKind::Certificate);
        assert!(error.message.contains("about to expire"));
        assert!(!report.timers().contains_key("send"));
    }

    #[tokio::test]
    async fn test_https_probe_hostname_mismatch() {
        let cert = certificate("other.test", (2020, 1, 1), (2099, 1, 1));
        let (port, _server) = serve_tls_once(cert, response("HTTP/1.1 200 OK\r\n\r\n", b"")).await;
        let mut params = params(port);
        params.scheme = HttpScheme::Https;
        params.vhost = Some("example.test".to_string());

        let report = HttpProbe::new(test_config()).run(&params).await;

        assert_eq!(
            report.last_error().map(|e| e.component),
            Some(ErrorKind::Certificate)
        );
        assert!(report.cert.is_none());
    }
}
