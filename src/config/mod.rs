pub mod app_config;
pub mod model;
pub mod probe_config;

pub use app_config::{ConfigError, init_logging, load_config, load_config_from};
pub use model::{AgentConfig, CheckConfig, MiscConfig};
pub use probe_config::{HttpScheme, ProbeKind, ProbeParams};
