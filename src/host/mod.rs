//! Host object model
//!
//! The running application that plugins modify: dynamic values, callable
//! functions and the lazily-populated module registry.

pub mod registry;
pub mod value;

pub use registry::{ModuleFactory, ModuleId, ModuleListener, ModuleRegistry};
pub use value::{Function, NativeFn, ObjectRef, Value};
