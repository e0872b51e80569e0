//! Remote health-check agent core: an instrumentation report, a
//! timeout-bounded transport with optional TLS, and TCP, HTTP(S) and SMTP
//! probes built on top of them.

pub mod config;
pub mod probe;
pub mod report;
pub mod transport;

pub use config::{AgentConfig, CheckConfig, ProbeKind, ProbeParams};
pub use probe::{Probe, ProbeFailure, create_probe, run_checks};
pub use report::{ErrorKind, Report};
pub use transport::{Target, Transport, TransportError};
