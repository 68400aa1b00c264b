//! Host module registry
//!
//! Mirrors a lazily-populated module graph: modules are *defined* up front
//! with a factory, but only become visible once something requires them.
//! Loaded modules keep their insertion order and are never removed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, trace};

use super::value::ObjectRef;

/// Opaque module identifier
pub type ModuleId = u32;

/// Deferred module initializer
pub type ModuleFactory = Box<dyn FnOnce() -> ObjectRef + Send>;

/// Listener fired after a module becomes loaded
pub type ModuleListener = Arc<dyn Fn(ModuleId, &ObjectRef) + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    factories: HashMap<ModuleId, ModuleFactory>,
    loaded: Vec<(ModuleId, ObjectRef)>,
    index: HashMap<ModuleId, usize>,
}

/// Registry of host modules, populated incrementally
#[derive(Default)]
pub struct ModuleRegistry {
    state: Mutex<RegistryState>,
    listeners: RwLock<Vec<ModuleListener>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a module without initializing it.
    ///
    /// Redefining an id that is already defined or loaded is ignored.
    pub fn define<F>(&self, id: ModuleId, factory: F)
    where
        F: FnOnce() -> ObjectRef + Send + 'static,
    {
        let mut state = self.lock();
        if state.index.contains_key(&id) || state.factories.contains_key(&id) {
            debug!(module_id = id, "Ignoring duplicate module definition");
            return;
        }
        state.factories.insert(id, Box::new(factory));
    }

    /// Add an already-initialized module and notify listeners.
    ///
    /// Returns false if the id was already loaded.
    pub fn register(&self, id: ModuleId, exports: ObjectRef) -> bool {
        {
            let mut state = self.lock();
            if state.index.contains_key(&id) {
                return false;
            }
            state.factories.remove(&id);
            let position = state.loaded.len();
            state.loaded.push((id, exports.clone()));
            state.index.insert(id, position);
        }
        self.notify(id, &exports);
        true
    }

    /// Initialize a defined module on first use and return its exports
    pub fn require(&self, id: ModuleId) -> Option<ObjectRef> {
        let factory = {
            let mut state = self.lock();
            if let Some(&position) = state.index.get(&id) {
                return Some(state.loaded[position].1.clone());
            }
            state.factories.remove(&id)?
        };

        // The factory may itself require other modules.
        let exports = factory();

        {
            let mut state = self.lock();
            if let Some(&position) = state.index.get(&id) {
                return Some(state.loaded[position].1.clone());
            }
            let position = state.loaded.len();
            state.loaded.push((id, exports.clone()));
            state.index.insert(id, position);
        }
        trace!(module_id = id, "Module initialized");
        self.notify(id, &exports);
        Some(exports)
    }

    /// Exports of a loaded module
    pub fn get(&self, id: ModuleId) -> Option<ObjectRef> {
        let state = self.lock();
        state.index.get(&id).map(|&i| state.loaded[i].1.clone())
    }

    /// Number of loaded modules
    pub fn len(&self) -> usize {
        self.lock().loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of defined but not yet initialized modules
    pub fn pending(&self) -> usize {
        self.lock().factories.len()
    }

    /// Snapshot of loaded modules in load order
    pub fn loaded(&self) -> Vec<(ModuleId, ObjectRef)> {
        self.loaded_from(0)
    }

    /// Snapshot of the modules loaded at or after position `start`
    pub fn loaded_from(&self, start: usize) -> Vec<(ModuleId, ObjectRef)> {
        let state = self.lock();
        state.loaded.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Register a "module added" listener
    pub fn subscribe(&self, listener: ModuleListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, id: ModuleId, exports: &ObjectRef) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(id, exports);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_define_is_lazy() {
        let registry = ModuleRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        registry.define(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ObjectRef::with_props([("a", Value::Bool(true))])
        });

        assert_eq!(registry.len(), 0);
        assert_eq!(registry.pending(), 1);

        let first = registry.require(1).unwrap();
        let second = registry.require(1).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_require_unknown() {
        let registry = ModuleRegistry::new();
        assert!(registry.require(42).is_none());
    }

    #[test]
    fn test_registration_order_and_notifications() {
        let registry = ModuleRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.subscribe(Arc::new(move |id: ModuleId, _: &ObjectRef| {
            sink.lock().unwrap().push(id)
        }));

        registry.register(7, ObjectRef::new());
        registry.define(3, ObjectRef::new);
        registry.require(3);
        assert!(!registry.register(7, ObjectRef::new()));

        let ids: Vec<_> = registry.loaded().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![7, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![7, 3]);
        assert_eq!(registry.loaded_from(1).len(), 1);
        assert!(registry.loaded_from(5).is_empty());
    }

    #[test]
    fn test_factory_can_require_dependencies() {
        let registry = Arc::new(ModuleRegistry::new());
        registry.define(1, || ObjectRef::with_props([("dep", Value::Bool(true))]));
        let inner = registry.clone();
        registry.define(2, move || {
            let dep = inner.require(1).unwrap();
            ObjectRef::with_props([("uses", Value::Object(dep))])
        });

        registry.require(2).unwrap();
        let ids: Vec<_> = registry.loaded().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
