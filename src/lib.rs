//! Patchwork
//!
//! Runtime modification of a live host application by third-party plugins:
//! a patch engine that layers interceptors onto host functions, a resolver
//! that finds host modules by shape, and a plugin manager that guarantees
//! every modification a plugin made is undone when it stops.

pub mod core;
pub mod host;
pub mod patcher;
pub mod plugin;
pub mod resolver;
pub mod runtime;

// Re-export commonly used types
pub use crate::core::{Config, ConsumerId, PatchworkError};
pub use host::{Function, ModuleRegistry, ObjectRef, Value};
pub use patcher::{Interceptor, Patcher, Unpatch};
pub use plugin::{Plugin, PluginContext, PluginManager};
pub use resolver::{Filter, Resolver};
pub use runtime::HostContext;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = crate::core::Result<T>;
