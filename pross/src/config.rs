//! Simulation configuration.

use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path};
use thiserror::Error;

/// Maximum number of shareholders.
pub const MAX_SHAREHOLDERS: u32 = 128;

/// Errors that can occur when loading a configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parameters shared by every shareholder.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of shareholders.
    pub n: u32,

    /// Number of shares needed to recover the secret.
    pub threshold: u32,

    /// Number of qualified dealers needed to refresh.
    pub update_threshold: u32,

    /// Seed for deterministic simulation (fresh randomness if absent).
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Loads and validates a YAML configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config: Config = {
            let config_file = File::open(path)?;
            serde_yaml::from_reader(config_file)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Ensures `1 <= threshold <= update_threshold <= n <= MAX_SHAREHOLDERS`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.n == 0 || self.n > MAX_SHAREHOLDERS {
            return Err(Error::Invalid("n out of range"));
        }
        if self.threshold == 0 {
            return Err(Error::Invalid("threshold must be positive"));
        }
        if self.threshold > self.update_threshold {
            return Err(Error::Invalid("threshold exceeds update threshold"));
        }
        if self.update_threshold > self.n {
            return Err(Error::Invalid("update threshold exceeds n"));
        }
        Ok(())
    }
}
