//! Plugin type definitions
//!
//! This module defines the plugin interface, the manifest shipped with each
//! plugin bundle, the persisted plugin record and the snapshots handed to UI
//! consumers.

use serde::{Deserialize, Serialize};

use crate::core::error::{PatchworkError, Result};

use super::context::PluginContext;

/// Unique identifier for a plugin (its base URL)
pub type PluginId = String;

/// Base plugin trait that all plugins must implement
///
/// `on_load` runs while the plugin starts. Every patch, lazy lookup and
/// cleanup it registers through the [`PluginContext`] is undone when the
/// plugin stops, so most plugins never need `on_unload`.
pub trait Plugin: Send + Sync {
    /// Apply patches and register listeners
    fn on_load(&self, context: &PluginContext) -> Result<()>;

    /// Extra teardown, run before anything registered during `on_load`
    fn on_unload(&self) -> Result<()> {
        Ok(())
    }
}

/// Plugin author entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

/// Manifest shipped next to a plugin's main file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub authors: Vec<Author>,

    /// Main file, relative to the plugin id
    pub main: String,

    /// Content hash of the main file, if the publisher provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Semantic version
    #[serde(default = "default_version")]
    pub version: String,

    /// Icon asset name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, main: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            authors: Vec::new(),
            main: main.into(),
            hash: None,
            version: default_version(),
            icon: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, name: impl Into<String>) -> Self {
        self.authors.push(Author {
            name: name.into(),
            id: None,
        });
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PatchworkError::InvalidManifest("name cannot be empty".into()));
        }
        if self.main.trim().is_empty() {
            return Err(PatchworkError::InvalidManifest("main cannot be empty".into()));
        }
        semver::Version::parse(&self.version).map_err(|e| {
            PatchworkError::InvalidManifest(format!("invalid version {:?}: {}", self.version, e))
        })?;
        Ok(())
    }

    /// "by A, B" style author line
    pub fn author_names(&self) -> Vec<String> {
        self.authors.iter().map(|a| a.name.clone()).collect()
    }
}

/// Persisted form of an installed plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: PluginId,
    pub manifest: PluginManifest,
    /// Plugin code as fetched
    pub source: String,
    /// User intent: start this plugin on session start
    pub enabled: bool,
    /// User intent: refetch this plugin on session start
    #[serde(default = "default_update")]
    pub update: bool,
}

fn default_update() -> bool {
    true
}

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Installed, not enabled
    Disabled,
    /// Enabled but not running
    Stopped,
    /// Setup code is executing
    Starting,
    /// Running with a populated unload ledger
    Running,
    /// Unload ledger is draining
    Stopping,
    /// Record deleted
    Removed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PluginState::Disabled => "disabled",
            PluginState::Stopped => "stopped",
            PluginState::Starting => "starting",
            PluginState::Running => "running",
            PluginState::Stopping => "stopping",
            PluginState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot for UI surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    pub authors: Vec<String>,
    pub description: String,
    pub icon: Option<String>,
    pub enabled: bool,
    pub update: bool,
    pub state: PluginState,
}

/// Event triggered when a plugin's state changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStateEvent {
    /// ID of the plugin
    pub plugin_id: PluginId,
    /// Name of the plugin
    pub plugin_name: String,
    /// Previous state (None if new)
    pub old_state: Option<PluginState>,
    /// New state
    pub new_state: PluginState,
    /// Timestamp of the event
    pub timestamp: i64,
}

/// Plugin logger trait
///
/// Provides logging functionality to plugins.
pub trait PluginLogger: Send + Sync {
    /// Log a debug message
    fn debug(&self, message: &str);

    /// Log an info message
    fn info(&self, message: &str);

    /// Log a warning message
    fn warn(&self, message: &str);

    /// Log an error message
    fn error(&self, message: &str);
}
