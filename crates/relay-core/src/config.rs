//! RelayConfig - runner policy and worker settings.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `RELAY_`-prefixed environment variables (`RELAY_RETRY_DELAY_SECONDS=120`)

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};

use crate::app::TaskPolicy;
use crate::app::policy::{CONTINUE_DELAY, EXPIRE_TIMEOUT, RETRY_DELAY, RUN_TIMEOUT};
use crate::error::RelayError;

pub const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub continue_delay_seconds: u64,
    pub retry_delay_seconds: u64,
    pub run_timeout_seconds: u64,
    pub expire_timeout_seconds: u64,

    /// Unbounded when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,

    pub rerun_stale_children: bool,
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            continue_delay_seconds: CONTINUE_DELAY.as_secs(),
            retry_delay_seconds: RETRY_DELAY.as_secs(),
            run_timeout_seconds: RUN_TIMEOUT.as_secs(),
            expire_timeout_seconds: EXPIRE_TIMEOUT.as_secs(),
            max_retries: None,
            rerun_stale_children: false,
            workers: 4,
        }
    }
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, RelayError> {
    let defaults = RelayConfig::default();
    Ok(Config::builder()
        .set_default("continue_delay_seconds", defaults.continue_delay_seconds)?
        .set_default("retry_delay_seconds", defaults.retry_delay_seconds)?
        .set_default("run_timeout_seconds", defaults.run_timeout_seconds)?
        .set_default("expire_timeout_seconds", defaults.expire_timeout_seconds)?
        .set_default("rerun_stale_children", defaults.rerun_stale_children)?
        .set_default("workers", defaults.workers as u64)?)
}

impl RelayConfig {
    /// Loads defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, RelayError> {
        let mut builder = with_defaults()?;
        if let Some(path) = path {
            if !path.exists() {
                return Err(RelayError::InvalidConfig(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        let config: RelayConfig = builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML document; the environment is ignored.
    pub fn from_toml(toml: &str) -> Result<Self, RelayError> {
        let config: RelayConfig = with_defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.workers == 0 {
            return Err(RelayError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.run_timeout_seconds >= self.expire_timeout_seconds {
            return Err(RelayError::InvalidConfig(format!(
                "run_timeout_seconds ({}) must be below expire_timeout_seconds ({})",
                self.run_timeout_seconds, self.expire_timeout_seconds
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            continue_delay: Duration::from_secs(self.continue_delay_seconds),
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
            run_timeout: Duration::from_secs(self.run_timeout_seconds),
            expire_timeout: Duration::from_secs(self.expire_timeout_seconds),
            max_retries: self.max_retries,
            rerun_stale_children: self.rerun_stale_children,
        }
    }
}
