use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::model::AgentConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Load the agent configuration.
/// Reads a `.env` file when present, then parses the YAML file named by the
/// `CONFIG_FILE` environment variable (`config.yml` when unset).
pub fn load_config() -> Result<AgentConfig, ConfigError> {
    dotenvy::dotenv().ok();

    let config_file_location =
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yml".to_string());
    load_config_from(Path::new(&config_file_location))
}

pub fn load_config_from(path: &Path) -> Result<AgentConfig, ConfigError> {
    let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = AgentConfig::from_yaml(&config_str).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    log::info!(
        "Loaded {} check(s) from {}, clock offset {:.3}s",
        config.checks.len(),
        path.display(),
        config.misc.offset
    );
    Ok(config)
}

/// Setup console logging. `RUST_LOG` wins over the configured verbosity.
pub fn init_logging(verbose: bool) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "info" } else { "warn" }),
    )
    .try_init();
}
