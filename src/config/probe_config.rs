use serde::Deserialize;

/// Which probe a check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Tcp,
    Http,
    Smtp,
}

/// Plain HTTP or HTTP over TLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    #[default]
    Http,
    Https,
}

/// Parameters of a single probe invocation, as handed over by the task
/// dispatcher. Everything but `host` is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeParams {
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    /// Resolve and connect over IPv6 instead of IPv4.
    #[serde(default)]
    pub ipv6: bool,

    /// Upgrade TCP/SMTP connections to TLS after connecting.
    #[serde(default, rename = "SSL", alias = "ssl")]
    pub ssl: bool,

    #[serde(default, rename = "type")]
    pub scheme: HttpScheme,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default, alias = "URI")]
    pub uri: Option<String>,

    /// Host header and SNI name; defaults to `host`.
    #[serde(default)]
    pub vhost: Option<String>,

    /// Require a valid certificate chain and validity window.
    #[serde(default)]
    pub checkcert: bool,

    /// Fail when the certificate expires within a week.
    #[serde(default)]
    pub warncert: bool,

    /// Status codes above this value count as server failures. Zero or
    /// absent disables the check.
    #[serde(default)]
    pub ise: Option<u16>,

    #[serde(default)]
    pub id: Option<String>,
}

impl ProbeParams {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase()
    }

    pub fn uri(&self) -> &str {
        self.uri.as_deref().unwrap_or("/")
    }

    pub fn vhost(&self) -> &str {
        self.vhost.as_deref().unwrap_or(&self.host)
    }

    pub fn ise_threshold(&self) -> Option<u16> {
        self.ise.filter(|threshold| *threshold > 0)
    }
}
