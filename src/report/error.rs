use std::fmt;

use serde::Serialize;

/// The closed set of failure categories a probe run can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Parameter validation failed before any I/O happened.
    Init,
    /// Hostname resolution failed, or resolved to the local machine.
    Dns,
    /// The TCP connection could not be established.
    Connect,
    /// The peer certificate violated the validity or expiry policy.
    Certificate,
    /// Protocol violation, timeout or unexpected I/O fault.
    Response,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Init => "init",
            ErrorKind::Dns => "dns",
            ErrorKind::Connect => "connect",
            ErrorKind::Certificate => "certificate",
            ErrorKind::Response => "response",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error a report retains.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub time: f64,
    pub component: ErrorKind,
    pub message: String,
}
