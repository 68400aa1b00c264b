//! Error type system for Patchwork
//!
//! This module provides the error taxonomy shared by the patch engine,
//! the module resolver and the plugin lifecycle manager:
//! - Structural patch errors (invalid targets, non-callable dispatch)
//! - Plugin lifecycle failures (setup, teardown, fetch)
//! - Collaborator failures (storage, serialization, configuration)
//!
//! Module resolution absence is deliberately *not* an error: the resolver
//! returns `None` and callers decide what a missing module means.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why retrieving a plugin bundle failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailure {
    /// Transport error, timeout, or a non-404 HTTP failure
    Network,
    /// The bundle (manifest or main file) does not exist
    NotFound,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Network => write!(f, "network error"),
            FetchFailure::NotFound => write!(f, "not found"),
        }
    }
}

/// Main error type for the Patchwork system
#[derive(Debug, thiserror::Error)]
pub enum PatchworkError {
    // Patch engine errors
    #[error("Cannot patch `{key}`: existing value is {found}, not a function")]
    PatchTargetInvalid { key: String, found: String },

    #[error("`{0}` is not a function")]
    NotCallable(String),

    #[error("{0}")]
    Thrown(String),

    // Plugin-related errors
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin already installed: {0}")]
    PluginAlreadyInstalled(String),

    #[error("Plugin {0} is disabled")]
    PluginDisabled(String),

    #[error("Plugin {0} is busy with another lifecycle transition")]
    PluginBusy(String),

    #[error("Plugin {id} failed to start: {reason}")]
    PluginSetupFailed { id: String, reason: String },

    #[error("Plugin {id} stopped with {failures} failed cleanup(s); first: {first}")]
    PluginTeardownPartialFailure {
        id: String,
        failures: usize,
        first: String,
    },

    #[error("Failed to fetch plugin {id}: {kind} ({reason})")]
    PluginFetchFailed {
        id: String,
        kind: FetchFailure,
        reason: String,
    },

    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    // Collaborator errors
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl PatchworkError {
    /// Convenience constructor for an error thrown from host or plugin code
    pub fn thrown(message: impl Into<String>) -> Self {
        PatchworkError::Thrown(message.into())
    }

    /// Get the error type name, used in notifications and logs
    pub fn error_type(&self) -> &'static str {
        match self {
            PatchworkError::PatchTargetInvalid { .. } => "PatchTargetInvalid",
            PatchworkError::NotCallable(_) => "NotCallable",
            PatchworkError::Thrown(_) => "Thrown",
            PatchworkError::PluginNotFound(_) => "PluginNotFound",
            PatchworkError::PluginAlreadyInstalled(_) => "PluginAlreadyInstalled",
            PatchworkError::PluginDisabled(_) => "PluginDisabled",
            PatchworkError::PluginBusy(_) => "PluginBusy",
            PatchworkError::PluginSetupFailed { .. } => "PluginSetupFailed",
            PatchworkError::PluginTeardownPartialFailure { .. } => "PluginTeardownPartialFailure",
            PatchworkError::PluginFetchFailed { .. } => "PluginFetchFailed",
            PatchworkError::InvalidManifest(_) => "InvalidManifest",
            PatchworkError::StorageError(_) => "StorageError",
            PatchworkError::IoError(_) => "IoError",
            PatchworkError::SerializationError(_) => "SerializationError",
            PatchworkError::ConfigError(_) => "ConfigError",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PatchworkError::PluginFetchFailed {
                kind: FetchFailure::Network,
                ..
            } | PatchworkError::IoError(_)
                | PatchworkError::PluginBusy(_)
        )
    }

    /// Whether the plugin involved ended up stopped despite the error
    pub fn leaves_plugin_stopped(&self) -> bool {
        matches!(
            self,
            PatchworkError::PluginSetupFailed { .. }
                | PatchworkError::PluginTeardownPartialFailure { .. }
        )
    }
}

/// Result type alias for operations that can fail with PatchworkError
pub type Result<T> = std::result::Result<T, PatchworkError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PatchworkError::StorageError(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PatchworkError::StorageError(format!("{}: {}", f(), e)))
    }
}
