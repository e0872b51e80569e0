//! SMTP greeting probing

use std::sync::Arc;

use async_trait::async_trait;

use super::{CONNECTION_ACCEPTED, Probe, ProbeFailure, finish, open_transport};
use crate::config::{AgentConfig, ProbeKind, ProbeParams};
use crate::report::{ErrorKind, Report};
use crate::transport::Transport;

pub const DEFAULT_PORT: u16 = 25;

/// Connects to a mail server and records its greeting banner.
#[derive(Debug, Clone)]
pub struct SmtpProbe {
    config: Arc<AgentConfig>,
}

impl SmtpProbe {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    async fn execute(transport: &mut Transport, params: &ProbeParams) -> Result<(), ProbeFailure> {
        transport.connect().await?;

        if params.ssl {
            transport
                .secure(Some(params.host.trim()), false)
                .await
                .map_err(ProbeFailure::response)?;
        }

        transport.report_mut().debug("Connected, reading response");
        let banner = {
            let mut lines = transport.lines().map_err(ProbeFailure::response)?;
            lines.next_line().await.map_err(ProbeFailure::response)?
        };
        let Some(banner) = banner else {
            return Err(ProbeFailure::new(
                ErrorKind::Response,
                "Connection closed before the server sent a greeting",
            ));
        };

        let banner = String::from_utf8_lossy(&banner).trim_end_matches('\r').to_string();
        let report = transport.report_mut();
        report.debug("Got a line");
        report.timer("read");
        report.debug(format!("Response from server was: {banner}"));
        report.server = Some(banner);
        report.status_code = Some(CONNECTION_ACCEPTED.to_string());
        report.timer("data");
        report.debug("All went well, closing socket.");
        report.timer("end");
        Ok(())
    }
}

#[async_trait]
impl Probe for SmtpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Smtp
    }

    async fn run(&self, params: &ProbeParams) -> Report {
        let mut transport = match open_transport(&self.config, params, DEFAULT_PORT) {
            Ok(transport) => transport,
            Err(report) => return report,
        };
        let outcome = Self::execute(&mut transport, params).await;
        finish(transport, outcome).await
    }
}
