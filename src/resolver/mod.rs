//! Module resolver
//!
//! Finds host modules by structural shape. Lookups are memoized per filter
//! identity. When the registry reports a new module, cached misses and
//! `all` lists are only flagged stale; they are rescanned (incrementally,
//! starting from where the previous scan stopped) the next time somebody
//! asks. Cached hits are never revisited because loaded modules are never
//! replaced.

pub mod filters;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace};

use crate::core::error::Result;
use crate::host::{ModuleId, ModuleRegistry, ObjectRef, Value};

pub use filters::{by_display_name, by_props, by_store_name, by_type_name, Filter};

/// Options for [`Resolver::find_with`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    /// Return every match instead of stopping at the first
    pub all: bool,
}

/// Outcome of a lookup. Absence is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(ObjectRef),
    NotFound,
    All(Vec<ObjectRef>),
}

impl Resolution {
    pub fn found(self) -> Option<ObjectRef> {
        match self {
            Resolution::Found(module) => Some(module),
            _ => None,
        }
    }

    pub fn into_vec(self) -> Vec<ObjectRef> {
        match self {
            Resolution::Found(module) => vec![module],
            Resolution::NotFound => Vec::new(),
            Resolution::All(modules) => modules,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Resolution::NotFound)
    }
}

type CacheKey = (usize, bool);

struct CacheEntry {
    /// Keeps the filter alive so its identity key cannot be reused
    _filter: Filter,
    result: Resolution,
    stale: bool,
    /// Number of registry entries covered by `result`
    scanned: usize,
}

struct LazyWaiter {
    id: u64,
    filter: Filter,
    callback: Box<dyn FnOnce(ObjectRef) + Send>,
}

struct ResolverState {
    registry: Arc<ModuleRegistry>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    waiters: Mutex<Vec<LazyWaiter>>,
    interned: Mutex<HashMap<String, Filter>>,
    next_waiter: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Match a module, falling back to its `default` export object
fn match_module(filter: &Filter, exports: &ObjectRef) -> Option<ObjectRef> {
    if filter.matches(exports) {
        return Some(exports.clone());
    }
    match exports.get("default") {
        Some(Value::Object(default)) if filter.matches(&default) => Some(default),
        _ => None,
    }
}

impl ResolverState {
    fn on_module_added(&self, id: ModuleId, exports: &ObjectRef) {
        {
            let mut cache = lock(&self.cache);
            for entry in cache.values_mut() {
                if !matches!(entry.result, Resolution::Found(_)) {
                    entry.stale = true;
                }
            }
        }

        let pending = std::mem::take(&mut *lock(&self.waiters));
        if pending.is_empty() {
            return;
        }

        let mut fired = Vec::new();
        let mut remaining = Vec::new();
        for waiter in pending {
            match match_module(&waiter.filter, exports) {
                Some(module) => fired.push((waiter, module)),
                None => remaining.push(waiter),
            }
        }

        {
            let mut waiters = lock(&self.waiters);
            // Keep registration order: survivors first, then anything
            // registered while filters were running.
            remaining.append(&mut waiters);
            *waiters = remaining;
        }

        for (waiter, module) in fired {
            debug!(module_id = id, filter = waiter.filter.label(), "Lazy lookup resolved");
            (waiter.callback)(module);
        }
    }

    fn cancel(&self, waiter_id: u64) -> bool {
        let mut waiters = lock(&self.waiters);
        let before = waiters.len();
        waiters.retain(|w| w.id != waiter_id);
        waiters.len() != before
    }
}

/// Structural lookup over the host module registry
#[derive(Clone)]
pub struct Resolver {
    state: Arc<ResolverState>,
}

impl Resolver {
    /// Create a resolver and subscribe it to the registry's "module added"
    /// notifications
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        let state = Arc::new(ResolverState {
            registry: registry.clone(),
            cache: Mutex::new(HashMap::new()),
            waiters: Mutex::new(Vec::new()),
            interned: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(0),
        });

        let weak: Weak<ResolverState> = Arc::downgrade(&state);
        registry.subscribe(Arc::new(move |id: ModuleId, exports: &ObjectRef| {
            if let Some(state) = weak.upgrade() {
                state.on_module_added(id, exports);
            }
        }));

        Self { state }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.state.registry
    }

    /// First module matching `filter`
    pub fn find(&self, filter: &Filter) -> Option<ObjectRef> {
        self.find_with(filter, FindOptions::default()).found()
    }

    /// Every module matching `filter`, in registry order
    pub fn find_all(&self, filter: &Filter) -> Vec<ObjectRef> {
        self.find_with(filter, FindOptions { all: true }).into_vec()
    }

    pub fn find_with(&self, filter: &Filter, options: FindOptions) -> Resolution {
        let key: CacheKey = (filter.id(), options.all);

        let (start, mut matches) = {
            let cache = lock(&self.state.cache);
            match cache.get(&key) {
                Some(entry) if !entry.stale => {
                    trace!(filter = filter.label(), "Resolver cache hit");
                    return entry.result.clone();
                }
                Some(entry) => (entry.scanned, entry.result.clone().into_vec()),
                None => (0, Vec::new()),
            }
        };

        // Filters are arbitrary code; no lock is held while they run.
        let modules = self.state.registry.loaded_from(start);
        let scanned = start + modules.len();
        let mut first = None;
        for (_, exports) in &modules {
            if let Some(module) = match_module(filter, exports) {
                if options.all {
                    matches.push(module);
                } else {
                    first = Some(module);
                    break;
                }
            }
        }

        let result = match (options.all, first) {
            (true, _) => Resolution::All(matches),
            (false, Some(module)) => Resolution::Found(module),
            (false, None) => Resolution::NotFound,
        };
        debug!(
            filter = filter.label(),
            from = start,
            scanned,
            found = !result.is_not_found(),
            "Resolver scan"
        );

        let stale = !matches!(result, Resolution::Found(_))
            && self.state.registry.len() > scanned;
        lock(&self.state.cache).insert(
            key,
            CacheEntry {
                _filter: filter.clone(),
                result: result.clone(),
                stale,
                scanned,
            },
        );
        result
    }

    /// Run `callback` once, as soon as a module matching `filter` exists.
    ///
    /// Fires synchronously if one is already loaded.
    pub fn find_lazy<F>(&self, filter: &Filter, callback: F) -> LazyHandle
    where
        F: FnOnce(ObjectRef) + Send + 'static,
    {
        let id = self.state.next_waiter.fetch_add(1, Ordering::Relaxed);
        let handle = LazyHandle {
            state: Arc::downgrade(&self.state),
            id,
        };

        if let Some(module) = self.find(filter) {
            callback(module);
            return handle;
        }

        lock(&self.state.waiters).push(LazyWaiter {
            id,
            filter: filter.clone(),
            callback: Box::new(callback),
        });
        handle
    }

    /// `find` with a filter interned by its property list
    pub fn find_by_props(&self, props: &[&str]) -> Option<ObjectRef> {
        self.find(&self.interned(format!("props:{}", props.join(",")), || by_props(props)))
    }

    pub fn find_by_props_all(&self, props: &[&str]) -> Vec<ObjectRef> {
        self.find_all(&self.interned(format!("props:{}", props.join(",")), || by_props(props)))
    }

    pub fn find_by_display_name(&self, name: &str) -> Option<ObjectRef> {
        self.find(&self.interned(format!("displayName:{}", name), || by_display_name(name)))
    }

    pub fn find_by_type_name(&self, name: &str) -> Option<ObjectRef> {
        self.find(&self.interned(format!("typeName:{}", name), || by_type_name(name)))
    }

    pub fn find_by_store_name(&self, name: &str) -> Option<ObjectRef> {
        self.find(&self.interned(format!("storeName:{}", name), || by_store_name(name)))
    }

    /// Require a defined module by id, loading it if needed
    pub fn require(&self, id: ModuleId) -> Option<ObjectRef> {
        self.state.registry.require(id)
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.state.cache).len()
    }

    pub fn clear_cache(&self) {
        lock(&self.state.cache).clear();
    }

    /// Number of lazy lookups still waiting for a module
    pub fn pending_lazy(&self) -> usize {
        lock(&self.state.waiters).len()
    }

    fn interned(&self, key: String, make: impl FnOnce() -> Filter) -> Filter {
        lock(&self.state.interned).entry(key).or_insert_with(make).clone()
    }
}

/// Cancellation handle for a [`Resolver::find_lazy`] registration
#[derive(Debug)]
pub struct LazyHandle {
    state: Weak<ResolverState>,
    id: u64,
}

impl LazyHandle {
    /// Drop the registration. Returns false if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        self.state.upgrade().map_or(false, |state| state.cancel(self.id))
    }

    /// Turn the handle into an unload-ledger callback
    pub fn into_unload(self) -> impl FnOnce() -> Result<()> + Send + 'static {
        move || {
            self.cancel();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<ModuleRegistry>, Resolver) {
        let registry = Arc::new(ModuleRegistry::new());
        let resolver = Resolver::new(registry.clone());
        (registry, resolver)
    }

    fn module(props: &[&str]) -> ObjectRef {
        ObjectRef::with_props(props.iter().map(|p| (p.to_string(), Value::Null)))
    }

    #[test]
    fn test_find_returns_first_match_in_registry_order() {
        let (registry, resolver) = setup();
        let first = module(&["openLazy", "hideActionSheet"]);
        registry.register(10, module(&["other"]));
        registry.register(11, first.clone());
        registry.register(12, module(&["openLazy", "hideActionSheet"]));

        let found = resolver.find(&by_props(&["openLazy", "hideActionSheet"])).unwrap();
        assert!(found.ptr_eq(&first));
    }

    #[test]
    fn test_find_returns_identical_reference_from_cache() {
        let (registry, resolver) = setup();
        registry.register(1, module(&["a"]));
        let filter = by_props(&["a"]);

        let first = resolver.find(&filter).unwrap();
        let second = resolver.find(&filter).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(resolver.cache_len(), 1);
    }

    #[test]
    fn test_cache_is_keyed_by_filter_identity() {
        let (registry, resolver) = setup();
        registry.register(1, module(&["a"]));

        resolver.find(&by_props(&["a"]));
        resolver.find(&by_props(&["a"]));
        assert_eq!(resolver.cache_len(), 2);

        resolver.find_by_props(&["a"]);
        resolver.find_by_props(&["a"]);
        assert_eq!(resolver.cache_len(), 3);
    }

    #[test]
    fn test_cache_hit_does_not_rerun_filter() {
        let (registry, resolver) = setup();
        registry.register(1, module(&["a"]));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let filter = Filter::new("counting", move |m| {
            counter.fetch_add(1, Ordering::SeqCst);
            m.has("a")
        });

        resolver.find(&filter);
        resolver.find(&filter);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_not_found_is_a_value() {
        let (_registry, resolver) = setup();
        let filter = by_props(&["missing"]);
        assert!(resolver.find(&filter).is_none());
        assert_eq!(
            resolver.find_with(&filter, FindOptions::default()),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_not_found_is_revalidated_after_module_added() {
        let (registry, resolver) = setup();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let filter = Filter::new("late", move |m| {
            counter.fetch_add(1, Ordering::SeqCst);
            m.has("late")
        });
        registry.register(1, module(&["early"]));

        assert!(resolver.find(&filter).is_none());
        assert!(resolver.find(&filter).is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let late = module(&["late"]);
        registry.register(2, late.clone());
        let found = resolver.find(&filter).unwrap();
        assert!(found.ptr_eq(&late));
        // Only the new module was scanned.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_find_all_accumulates_incrementally() {
        let (registry, resolver) = setup();
        let filter = by_props(&["x"]);
        registry.register(1, module(&["x"]));
        registry.register(2, module(&["y"]));

        assert_eq!(resolver.find_all(&filter).len(), 1);
        registry.register(3, module(&["x", "y"]));
        let all = resolver.find_all(&filter);
        assert_eq!(all.len(), 2);
        assert!(all[1].has("y"));
    }

    #[test]
    fn test_lazily_required_modules_become_visible() {
        let (registry, resolver) = setup();
        registry.define(5, || module(&["lazy"]));
        let filter = by_props(&["lazy"]);

        assert!(resolver.find(&filter).is_none());
        registry.require(5);
        assert!(resolver.find(&filter).is_some());
    }

    #[test]
    fn test_default_export_is_searched() {
        let (registry, resolver) = setup();
        let inner = module(&["Button"]);
        registry.register(1, ObjectRef::with_props([("default", Value::Object(inner.clone()))]));

        let found = resolver.find_by_props(&["Button"]).unwrap();
        assert!(found.ptr_eq(&inner));
    }

    #[test]
    fn test_find_lazy_fires_once_on_later_module() {
        let (registry, resolver) = setup();
        let filter = by_props(&["late"]);
        assert!(resolver.find(&filter).is_none());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        resolver.find_lazy(&filter, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(resolver.pending_lazy(), 1);

        registry.register(1, module(&["unrelated"]));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registry.register(2, module(&["late"]));
        registry.register(3, module(&["late"]));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.pending_lazy(), 0);
    }

    #[test]
    fn test_find_lazy_fires_immediately_when_present() {
        let (registry, resolver) = setup();
        registry.register(1, module(&["here"]));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let handle = resolver.find_lazy(&by_props(&["here"]), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!handle.cancel());
    }

    #[test]
    fn test_find_lazy_cancel() {
        let (registry, resolver) = setup();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = resolver.find_lazy(&by_props(&["late"]), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.cancel());
        assert!(!handle.cancel());
        registry.register(1, module(&["late"]));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lazy_callback_may_register_more_waiters() {
        let (registry, resolver) = setup();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let nested = resolver.clone();
        resolver.find_lazy(&by_props(&["first"]), move |_| {
            nested.find_lazy(&by_props(&["second"]), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        registry.register(1, module(&["first"]));
        assert_eq!(resolver.pending_lazy(), 1);
        registry.register(2, module(&["second"]));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_cache() {
        let (registry, resolver) = setup();
        registry.register(1, module(&["a"]));
        resolver.find_by_props(&["a"]);
        resolver.clear_cache();
        assert_eq!(resolver.cache_len(), 0);
    }
}
