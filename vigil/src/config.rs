use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Runtime configuration. The runtime only reads it; loading it from the environment or
/// a file is up to the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reject observable mutations that happen outside of an action
    pub strict: bool,
    /// Warn when a single tracked run reads more than this many fields
    pub max_dependencies: usize,
    /// Warn when more than this many listeners depend on one field
    pub max_listeners: usize,
}

impl Default for Config {
    fn default() -> Self { Self { strict: false, max_dependencies: 2048, max_listeners: 64 } }
}

impl Config {
    pub fn strict() -> Self { Self { strict: true, ..Self::default() } }

    pub fn validate(&self) -> Result<()> {
        if self.max_dependencies == 0 {
            return Err(Error::InvalidParameters("max_dependencies must be at least 1".into()));
        }
        if self.max_listeners == 0 {
            return Err(Error::InvalidParameters("max_listeners must be at least 1".into()));
        }
        Ok(())
    }
}

thread_local! {
    static CONFIG: Cell<Config> = Cell::new(Config::default());
}

/// Installs `config` for the current thread
pub fn configure(config: Config) -> Result<()> {
    config.validate()?;
    tracing::debug!(?config, "runtime configured");
    CONFIG.with(|current| current.set(config));
    Ok(())
}

/// The configuration in effect on the current thread
pub fn config() -> Config { CONFIG.try_with(Cell::get).unwrap_or_default() }
