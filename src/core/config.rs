//! Configuration management

use clap::{Parser, Subcommand};
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid plugin configuration: {0}")]
    InvalidPlugins(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<ConfigError> for crate::core::error::PatchworkError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::PatchworkError::ConfigError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: PATCHWORK__PLUGINS__FETCH_TIMEOUT=30
        builder = builder.add_source(
            Environment::with_prefix("PATCHWORK")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(store) = &cli_args.store {
            builder = builder.set_override("plugins.store_path", store.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults only
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigBuilder::builder())?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plugins.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patchwork")
        .join("settings.json")
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(builder
        .set_default("plugins.store_path", default_store_path().display().to_string())?
        .set_default("plugins.fetch_timeout", 30)?
        .set_default("plugins.refetch_on_init", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.rotation", "daily")?)
}

/// Command-line interface
#[derive(Debug, Parser)]
#[command(name = "patchwork")]
#[command(about = "Manage runtime plugins and their persisted state", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Settings store path
    #[arg(short, long, value_name = "PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List installed plugins
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Fetch and install a plugin by its base URL
    Install {
        id: String,
        /// Enable the plugin right away
        #[arg(long)]
        enable: bool,
    },
    /// Remove a plugin and its data
    Remove { id: String },
    /// Enable a plugin
    Enable { id: String },
    /// Disable a plugin
    Disable { id: String },
    /// Re-download a plugin
    Refetch { id: String },
    /// Flip whether a plugin is refetched on session start
    ToggleUpdate { id: String },
    /// Wipe a plugin's stored data
    ClearData { id: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    pub store_path: PathBuf,
    pub fetch_timeout: u64, // seconds
    pub refetch_on_init: bool,
}

impl PluginsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidPlugins("store_path cannot be empty".to_string()));
        }

        if self.fetch_timeout == 0 {
            return Err(ConfigError::InvalidPlugins("fetch_timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub rotation: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "stderr", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        let valid_rotations = ["minutely", "hourly", "daily", "never"];
        if !valid_rotations.contains(&self.rotation.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "rotation must be one of: {:?}",
                valid_rotations
            )));
        }

        Ok(())
    }
}
