use serde::Deserialize;

use super::probe_config::{ProbeKind, ProbeParams};

/// Global agent configuration shared read-only by every probe.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Echo debug entries to the console as they are recorded.
    #[serde(default)]
    pub debug: bool,

    /// Agent version advertised in the HTTP User-Agent.
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub misc: MiscConfig,

    /// Skip the guard against targets resolving to the local machine.
    #[serde(default)]
    pub allow_loopback: bool,

    /// Checks run by the one-shot runner.
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MiscConfig {
    /// Seconds the local clock runs ahead of real time.
    #[serde(default)]
    pub offset: f64,
}

/// A probe kind together with its parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    pub probe: ProbeKind,

    #[serde(flatten)]
    pub params: ProbeParams,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            debug: false,
            version: default_version(),
            misc: MiscConfig::default(),
            allow_loopback: false,
            checks: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}
