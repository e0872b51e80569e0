//! TCP connection probing

use std::sync::Arc;

use async_trait::async_trait;

use super::{CONNECTION_ACCEPTED, Probe, ProbeFailure, finish, open_transport};
use crate::config::{AgentConfig, ProbeKind, ProbeParams};
use crate::report::Report;
use crate::transport::Transport;

pub const DEFAULT_PORT: u16 = 80;

/// Proves a port accepts connections, and optionally that it speaks TLS.
/// Nothing is exchanged beyond the handshake.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    config: Arc<AgentConfig>,
}

impl TcpProbe {
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

        let report = transport.report_mut();
        report.debug("Connected to host");
        report.status_code = Some(CONNECTION_ACCEPTED.to_string());
        report.timer("data");
        report.debug("All went well, closing socket.");
        report.timer("end");
        Ok(())
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Tcp
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
