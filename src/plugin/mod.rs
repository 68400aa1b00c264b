//! Plugin system module
//!
//! This module provides the plugin lifecycle implementation including:
//! - Plugin manager for installing, starting, stopping and removing plugins
//! - Unload ledger tracking each plugin's teardown work
//! - Per-plugin context handed to setup code
//! - Bundle sources, settings stores and evaluators the manager relies on

pub mod context;
pub mod evaluator;
pub mod ledger;
pub mod logger;
pub mod manager;
pub mod source;
pub mod storage;
pub mod types;

pub use context::PluginContext;
pub use evaluator::{FactoryEvaluator, PluginEvaluator, PluginFactory};
pub use ledger::{DrainReport, UnloadFn, UnloadLedger};
pub use logger::DefaultPluginLogger;
pub use manager::{InitReport, PluginManager, PluginServices, StateListener, PLUGINS_KEY};
pub use source::{FetchedPlugin, HttpPluginSource, PluginSource, StaticPluginSource};
pub use storage::{plugin_data_key, JsonFileStore, MemoryStore, PluginStorage, SettingsStore};
pub use types::{
    Author, Plugin, PluginId, PluginInfo, PluginLogger, PluginManifest, PluginRecord, PluginState,
    PluginStateEvent,
};
