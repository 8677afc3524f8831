//! Configuration for the treebus server and client.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod client;
mod server;

pub use client::*;
pub use server::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "TREEBUS";

/// Top-level configuration container
///
/// Sources, later ones overriding earlier ones:
/// 1. Default values from code
/// 2. Configuration file named by `CONFIG_PATH`
/// 3. `TREEBUS__`-prefixed environment variables
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TreebusConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl TreebusConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("TREEBUS__SERVER__SESSION_INTERVAL_MS", "2000");
    /// let cfg = TreebusConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies an extra configuration file on top of `self`, then the
    /// environment again, without validation.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.client.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

/// Ports must differ from each other, except 0 which asks the OS for any port.
pub(crate) fn validate_ports(
    section: &str,
    ports: [u16; 3],
) -> Result<()> {
    for (i, a) in ports.iter().enumerate() {
        for b in &ports[i + 1..] {
            if *a != 0 && a == b {
                return Err(config_error(format!("{section}: channel ports must be distinct, {a} used twice")));
            }
        }
    }
    Ok(())
}

pub(crate) fn config_error(message: String) -> crate::Error {
    crate::Error::Config(config::ConfigError::Message(message))
}
