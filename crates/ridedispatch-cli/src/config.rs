//! CLI Configuration Management
//!
//! Configuration comes from an optional TOML file; command-line flags
//! override the file, and anything unset falls back to the engine defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::Result;
use ridedispatch_core::RideDispatchConfig;

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine configuration
    pub dispatch: RideDispatchConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log at DEBUG instead of INFO
    pub verbose: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = toml::from_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<()> {
        if cli.verbose {
            self.logging.verbose = true;
        }
        if let Some(dir) = &cli.data_dir {
            self.dispatch.storage.data_dir = Some(dir.into());
        }
        if let Some(secs) = cli.pending_timeout_secs {
            self.dispatch.dispatch.pending_timeout = Duration::from_secs(secs);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;
        Ok(())
    }
}
