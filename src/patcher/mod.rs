//! Patch engine
//!
//! Wraps named functions on live host objects with stacked interceptors.
//! Each patched `(owner, key)` pair gets exactly one [`PatchRecord`] which
//! remembers the original value and owns the ordered layer list; the owner's
//! property is swapped for a dispatcher that walks that list on every call.
//! Every layer comes back as an [`Unpatch`] handle, and all layers of one
//! installer can be removed in bulk with [`Patcher::revert_all`].

mod interceptor;
mod record;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::core::consumer::ConsumerId;
use crate::core::error::Result;
use crate::host::{Function, ObjectRef, Value};

pub use interceptor::{AfterFn, BeforeFn, InsteadFn, Interceptor, InterceptorKind};
use interceptor::Layer;
use record::{dispatch, Original, PatchKey, PatchRecord};

#[derive(Default)]
struct PatcherState {
    records: Mutex<HashMap<PatchKey, PatchRecord>>,
    next_id: AtomicU64,
}

impl PatcherState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PatchKey, PatchRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the layers of a live record, if `serial` still names it
    fn layers_for(&self, key: &PatchKey, serial: u64) -> Option<Vec<Arc<Layer>>> {
        self.lock()
            .get(key)
            .filter(|record| record.serial == serial)
            .map(|record| record.layers.clone())
    }

    fn remove_layer(&self, key: &PatchKey, layer_id: u64) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get_mut(key) else {
            return false;
        };
        let Some(position) = record.layers.iter().position(|layer| layer.id == layer_id) else {
            return false;
        };
        record.layers.remove(position);

        if record.layers.is_empty() {
            if let Some(record) = records.remove(key) {
                finish(&record);
            }
        }
        true
    }
}

fn finish(record: &PatchRecord) {
    if record.restore() {
        debug!(key = %record.key, "Restored original after last layer removed");
    } else {
        warn!(
            key = %record.key,
            "Patched property was overwritten externally; leaving current value in place"
        );
    }
}

/// Process-wide patch table
#[derive(Clone, Default)]
pub struct Patcher {
    state: Arc<PatcherState>,
}

impl Patcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer `interceptor` onto `owner[key]`.
    ///
    /// The property must hold a function, be undefined or be absent; absent
    /// properties are deleted again once the last layer is removed. If the
    /// dispatcher was overwritten from outside, the current value is wrapped
    /// afresh and the existing layers apply to it.
    pub fn patch(
        &self,
        owner: &ObjectRef,
        key: &str,
        interceptor: Interceptor,
        installer: &ConsumerId,
    ) -> Result<Unpatch> {
        let patch_key: PatchKey = (owner.id(), key.to_string());
        let layer = Arc::new(Layer {
            id: self.state.next_id(),
            interceptor,
            installer: installer.clone(),
        });
        let layer_id = layer.id;
        let kind = layer.interceptor.kind();

        let mut records = self.state.lock();
        if let Some(record) = records.get_mut(&patch_key) {
            if !record.is_installed() {
                // Someone replaced our dispatcher; wrap whatever is there now.
                let original = Original::capture(owner, key)?;
                warn!(key, "Patched property was overwritten externally; re-wrapping current value");
                let serial = self.state.next_id();
                let dispatcher = self.dispatcher(patch_key.clone(), serial, original.function().cloned());
                owner.set(key, dispatcher.clone());
                record.serial = serial;
                record.original = original;
                record.dispatcher = dispatcher;
            }
            record.layers.push(layer);
        } else {
            let original = Original::capture(owner, key)?;
            let serial = self.state.next_id();
            let dispatcher = self.dispatcher(patch_key.clone(), serial, original.function().cloned());
            owner.set(key, dispatcher.clone());
            records.insert(
                patch_key.clone(),
                PatchRecord {
                    serial,
                    owner: owner.clone(),
                    key: key.to_string(),
                    original,
                    dispatcher,
                    layers: vec![layer],
                },
            );
        }
        drop(records);

        debug!(key, ?kind, installer = %installer, layer_id, "Patch applied");
        Ok(Unpatch {
            state: Arc::downgrade(&self.state),
            key: patch_key,
            layer_id,
            reverted: AtomicBool::new(false),
        })
    }

    pub fn before<F>(
        &self,
        owner: &ObjectRef,
        key: &str,
        installer: &ConsumerId,
        f: F,
    ) -> Result<Unpatch>
    where
        F: Fn(&Value, &[Value]) -> Result<Option<Vec<Value>>> + Send + Sync + 'static,
    {
        self.patch(owner, key, Interceptor::before(f), installer)
    }

    pub fn after<F>(
        &self,
        owner: &ObjectRef,
        key: &str,
        installer: &ConsumerId,
        f: F,
    ) -> Result<Unpatch>
    where
        F: Fn(&Value, &[Value], &Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.patch(owner, key, Interceptor::after(f), installer)
    }

    pub fn instead<F>(
        &self,
        owner: &ObjectRef,
        key: &str,
        installer: &ConsumerId,
        f: F,
    ) -> Result<Unpatch>
    where
        F: Fn(&Value, Vec<Value>, Option<&Function>) -> Result<Value> + Send + Sync + 'static,
    {
        self.patch(owner, key, Interceptor::instead(f), installer)
    }

    /// Remove every layer installed by `installer`, returning how many were removed
    pub fn revert_all(&self, installer: &ConsumerId) -> usize {
        let mut records = self.state.lock();
        let mut removed = 0;
        let mut emptied = Vec::new();

        for (key, record) in records.iter_mut() {
            let before = record.layers.len();
            record.layers.retain(|layer| &layer.installer != installer);
            removed += before - record.layers.len();
            if record.layers.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            if let Some(record) = records.remove(&key) {
                finish(&record);
            }
        }

        if removed > 0 {
            debug!(installer = %installer, removed, "Reverted all patches for installer");
        }
        removed
    }

    /// Remove every layer from every record
    pub fn unpatch_all(&self) -> usize {
        let mut records = self.state.lock();
        let mut removed = 0;
        for (_, record) in records.drain() {
            removed += record.layers.len();
            finish(&record);
        }
        removed
    }

    pub fn is_patched(&self, owner: &ObjectRef, key: &str) -> bool {
        self.state.lock().contains_key(&(owner.id(), key.to_string()))
    }

    pub fn layer_count(&self, owner: &ObjectRef, key: &str) -> usize {
        self.state
            .lock()
            .get(&(owner.id(), key.to_string()))
            .map_or(0, |record| record.layers.len())
    }

    /// Number of live patch records
    pub fn record_count(&self) -> usize {
        self.state.lock().len()
    }

    fn dispatcher(&self, key: PatchKey, serial: u64, original: Option<Function>) -> Function {
        let state = Arc::downgrade(&self.state);
        let name = original
            .as_ref()
            .map_or_else(|| key.1.clone(), |f| f.name().to_string());

        Function::new(name, move |this, args| {
            // No lock is held while layers run, so recursion is fine.
            let layers = Weak::upgrade(&state)
                .and_then(|state| state.layers_for(&key, serial))
                .unwrap_or_default();
            dispatch(&key.1, &layers, original.as_ref(), this, args)
        })
    }
}

/// Reversal handle for one interceptor layer
#[derive(Debug)]
pub struct Unpatch {
    state: Weak<PatcherState>,
    key: PatchKey,
    layer_id: u64,
    reverted: AtomicBool,
}

impl Unpatch {
    /// Remove this layer. Returns true only on the call that removed it.
    pub fn revert(&self) -> bool {
        if self.reverted.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state
            .upgrade()
            .map_or(false, |state| state.remove_layer(&self.key, self.layer_id))
    }

    pub fn is_reverted(&self) -> bool {
        self.reverted.load(Ordering::SeqCst)
    }

    pub fn key(&self) -> &str {
        &self.key.1
    }

    /// Turn the handle into an unload-ledger callback
    pub fn into_unload(self) -> impl FnOnce() -> Result<()> + Send + 'static {
        move || {
            self.revert();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PatchworkError;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn plugin(id: &str) -> ConsumerId {
        ConsumerId::plugin(id)
    }

    fn echo_owner() -> (ObjectRef, Function) {
        let send = Function::new("send", |_, args| {
            Ok(args.into_iter().next().unwrap_or_default())
        });
        let owner = ObjectRef::with_props([("send", Value::Function(send.clone()))]);
        (owner, send)
    }

    fn current(owner: &ObjectRef, key: &str) -> Function {
        owner.get(key).unwrap().as_function().unwrap().clone()
    }

    fn send(owner: &ObjectRef, msg: &str) -> Value {
        owner.call_method("send", vec![msg.into()]).unwrap()
    }

    fn uppercase_before(_: &Value, args: &[Value]) -> Result<Option<Vec<Value>>> {
        let msg = args[0].as_str().unwrap_or_default().to_uppercase();
        Ok(Some(vec![msg.into()]))
    }

    fn bang_after(_: &Value, _: &[Value], ret: &Value) -> Result<Option<Value>> {
        Ok(Some(format!("{}!", ret.as_str().unwrap_or_default()).into()))
    }

    #[test]
    fn test_pre_and_post_compose() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();

        let a = patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();
        let _b = patcher.after(&owner, "send", &plugin("b"), bang_after).unwrap();

        assert_eq!(send(&owner, "hi"), Value::from("HI!"));
        assert!(a.revert());
        assert_eq!(send(&owner, "hi"), Value::from("hi!"));
    }

    #[test]
    fn test_single_record_per_key() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();

        patcher.before(&owner, "send", &plugin("a"), |_, _| Ok(None)).unwrap();
        let dispatcher = current(&owner, "send");
        patcher.after(&owner, "send", &plugin("b"), |_, _, _| Ok(None)).unwrap();

        assert_eq!(patcher.record_count(), 1);
        assert_eq!(patcher.layer_count(&owner, "send"), 2);
        assert!(current(&owner, "send").ptr_eq(&dispatcher));
    }

    #[test]
    fn test_revert_restores_original_identity() {
        let patcher = Patcher::new();
        let (owner, original) = echo_owner();

        let a = patcher.before(&owner, "send", &plugin("a"), |_, _| Ok(None)).unwrap();
        let b = patcher.after(&owner, "send", &plugin("a"), |_, _, _| Ok(None)).unwrap();
        assert!(!current(&owner, "send").ptr_eq(&original));

        assert!(b.revert());
        assert!(patcher.is_patched(&owner, "send"));
        assert!(a.revert());
        assert!(!patcher.is_patched(&owner, "send"));
        assert!(current(&owner, "send").ptr_eq(&original));
    }

    #[test]
    fn test_revert_is_idempotent() {
        let patcher = Patcher::new();
        let (owner, original) = echo_owner();

        let a = patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();
        let _b = patcher.after(&owner, "send", &plugin("b"), bang_after).unwrap();

        assert!(a.revert());
        assert!(!a.revert());
        assert!(a.is_reverted());
        assert_eq!(patcher.layer_count(&owner, "send"), 1);
        assert_eq!(send(&owner, "hi"), Value::from("hi!"));
        assert!(!current(&owner, "send").ptr_eq(&original));
    }

    #[test]
    fn test_absent_property_is_deleted_on_restore() {
        let patcher = Patcher::new();
        let owner = ObjectRef::new();

        let handle = patcher
            .instead(&owner, "track", &plugin("a"), |_, _, original| {
                assert!(original.is_none());
                Ok(Value::from("tracked"))
            })
            .unwrap();

        assert_eq!(owner.call_method("track", vec![]).unwrap(), Value::from("tracked"));
        handle.revert();
        assert!(!owner.has("track"));
    }

    #[test]
    fn test_absent_property_without_replacement_is_not_callable() {
        let patcher = Patcher::new();
        let owner = ObjectRef::new();
        patcher.before(&owner, "missing", &plugin("a"), |_, _| Ok(None)).unwrap();

        let err = owner.call_method("missing", vec![]).unwrap_err();
        assert!(matches!(err, PatchworkError::NotCallable(key) if key == "missing"));
    }

    #[test]
    fn test_patch_target_invalid() {
        let patcher = Patcher::new();
        let owner = ObjectRef::with_props([("version", Value::from("1.0"))]);

        let err = patcher
            .before(&owner, "version", &plugin("a"), |_, _| Ok(None))
            .unwrap_err();
        assert!(matches!(err, PatchworkError::PatchTargetInvalid { .. }));
        assert_eq!(patcher.record_count(), 0);
        assert_eq!(owner.get("version"), Some(Value::from("1.0")));
    }

    #[test]
    fn test_layer_ordering() {
        let patcher = Patcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let owner = ObjectRef::new();
        let sink = log.clone();
        owner.set(
            "run",
            Function::new("run", move |_, _| {
                sink.lock().unwrap().push("original".to_string());
                Ok(Value::Null)
            }),
        );

        for name in ["one", "two"] {
            let pre = log.clone();
            patcher
                .before(&owner, "run", &plugin(name), move |_, _| {
                    pre.lock().unwrap().push(format!("pre-{}", name));
                    Ok(None)
                })
                .unwrap();
            let post = log.clone();
            patcher
                .after(&owner, "run", &plugin(name), move |_, _, _| {
                    post.lock().unwrap().push(format!("post-{}", name));
                    Ok(None)
                })
                .unwrap();
        }

        owner.call_method("run", vec![]).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre-one", "pre-two", "original", "post-two", "post-one"]
        );
    }

    #[test]
    fn test_topmost_instead_wins_and_lower_ones_stay_dormant() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();

        let lower = patcher
            .instead(&owner, "send", &plugin("a"), |_, _, _| Ok(Value::from("lower")))
            .unwrap();
        let upper = patcher
            .instead(&owner, "send", &plugin("b"), |_, _, _| Ok(Value::from("upper")))
            .unwrap();

        assert_eq!(send(&owner, "x"), Value::from("upper"));
        upper.revert();
        assert_eq!(send(&owner, "x"), Value::from("lower"));
        lower.revert();
        assert_eq!(send(&owner, "x"), Value::from("x"));
    }

    #[test]
    fn test_instead_can_delegate_to_original() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();

        patcher
            .instead(&owner, "send", &plugin("a"), |this, args, original| {
                let inner = original.unwrap().call(this, args)?;
                Ok(Value::from(format!("[{}]", inner.as_str().unwrap_or_default())))
            })
            .unwrap();

        assert_eq!(send(&owner, "x"), Value::from("[x]"));
    }

    #[test]
    fn test_call_context_is_preserved() {
        let patcher = Patcher::new();
        let owner = ObjectRef::with_props([("name", Value::from("store"))]);
        owner.set(
            "getName",
            Function::new("getName", |this, _| {
                Ok(this.as_object().and_then(|o| o.get("name")).unwrap_or_default())
            }),
        );
        let expected = owner.clone();
        patcher
            .before(&owner, "getName", &plugin("a"), move |this, _| {
                assert!(this.as_object().unwrap().ptr_eq(&expected));
                Ok(None)
            })
            .unwrap();

        assert_eq!(owner.call_method("getName", vec![]).unwrap(), Value::from("store"));
    }

    #[test]
    fn test_throwing_layer_stops_pipeline() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();
        let later = Arc::new(AtomicUsize::new(0));

        patcher
            .before(&owner, "send", &plugin("bad"), |_, _| Err(PatchworkError::thrown("boom")))
            .unwrap();
        let counter = later.clone();
        patcher
            .before(&owner, "send", &plugin("good"), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .unwrap();

        let err = owner.call_method("send", vec!["x".into()]).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_revert_all_by_installer() {
        let patcher = Patcher::new();
        let (owner, original) = echo_owner();
        let other = ObjectRef::new();

        patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();
        patcher.after(&owner, "send", &plugin("b"), bang_after).unwrap();
        patcher.instead(&other, "ping", &plugin("a"), |_, _, _| Ok(Value::Null)).unwrap();

        assert_eq!(patcher.revert_all(&plugin("a")), 2);
        assert!(!other.has("ping"));
        assert_eq!(patcher.record_count(), 1);
        assert_eq!(send(&owner, "hi"), Value::from("hi!"));

        assert_eq!(patcher.revert_all(&plugin("b")), 1);
        assert!(current(&owner, "send").ptr_eq(&original));
        assert_eq!(patcher.revert_all(&plugin("b")), 0);
    }

    #[test]
    fn test_handle_after_revert_all_is_noop() {
        let patcher = Patcher::new();
        let (owner, original) = echo_owner();
        let handle = patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();

        patcher.revert_all(&plugin("a"));
        assert!(!handle.revert());
        assert!(current(&owner, "send").ptr_eq(&original));
    }

    #[test]
    fn test_stale_dispatcher_falls_back_to_original() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();
        let handle = patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();
        let stale = current(&owner, "send");

        handle.revert();
        let out = stale.call(&Value::Object(owner.clone()), vec!["hi".into()]).unwrap();
        assert_eq!(out, Value::from("hi"));
    }

    #[test]
    fn test_recursive_call_through_dispatcher() {
        let patcher = Patcher::new();
        let owner = ObjectRef::new();
        owner.set(
            "countdown",
            Function::new("countdown", |this, args| {
                let n = args[0].as_f64().unwrap_or(0.0);
                if n <= 0.0 {
                    return Ok(Value::Number(0.0));
                }
                let this_obj = this.as_object().unwrap();
                let rest = this_obj.call_method("countdown", vec![Value::Number(n - 1.0)])?;
                Ok(Value::Number(rest.as_f64().unwrap() + 1.0))
            }),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        patcher
            .before(&owner, "countdown", &plugin("a"), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .unwrap();

        let out = owner.call_method("countdown", vec![Value::Number(3.0)]).unwrap();
        assert_eq!(out, Value::Number(3.0));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_external_overwrite_is_not_clobbered() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();
        let handle = patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();

        let replacement = Function::new("replacement", |_, _| Ok(Value::Null));
        owner.set("send", replacement.clone());
        handle.revert();

        assert!(current(&owner, "send").ptr_eq(&replacement));
        assert_eq!(patcher.record_count(), 0);
    }

    #[test]
    fn test_undefined_property_is_restored_as_undefined() {
        let patcher = Patcher::new();
        let owner = ObjectRef::with_props([("hook", Value::Undefined)]);

        let handle = patcher
            .instead(&owner, "hook", &plugin("a"), |_, _, _| Ok(Value::from("hooked")))
            .unwrap();
        assert_eq!(owner.call_method("hook", vec![]).unwrap(), Value::from("hooked"));

        assert!(handle.revert());
        assert!(owner.has("hook"));
        assert_eq!(owner.get("hook"), Some(Value::Undefined));
    }

    #[test]
    fn test_patch_after_external_overwrite_wraps_new_value() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();
        let first = patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();

        let replacement = Function::new("replacement", |_, args| {
            Ok(Value::from(format!("new {}", args[0].as_str().unwrap_or_default())))
        });
        owner.set("send", replacement.clone());
        let second = patcher.after(&owner, "send", &plugin("b"), bang_after).unwrap();

        assert!(!current(&owner, "send").ptr_eq(&replacement));
        assert_eq!(patcher.record_count(), 1);
        assert_eq!(send(&owner, "hi"), Value::from("new HI!"));

        assert!(first.revert());
        assert!(second.revert());
        assert!(current(&owner, "send").ptr_eq(&replacement));
    }

    #[test]
    fn test_patch_after_external_overwrite_with_non_function_fails() {
        let patcher = Patcher::new();
        let (owner, _) = echo_owner();
        patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();

        owner.set("send", Value::from("gone"));
        let err = patcher
            .after(&owner, "send", &plugin("b"), bang_after)
            .unwrap_err();
        assert!(matches!(err, PatchworkError::PatchTargetInvalid { .. }));
        assert_eq!(patcher.layer_count(&owner, "send"), 1);
    }

    #[test]
    fn test_unpatch_all() {
        let patcher = Patcher::new();
        let (owner, original) = echo_owner();
        let other = ObjectRef::new();
        patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();
        patcher.after(&owner, "send", &ConsumerId::host(), bang_after).unwrap();
        patcher.instead(&other, "x", &plugin("b"), |_, _, _| Ok(Value::Null)).unwrap();

        assert_eq!(patcher.unpatch_all(), 3);
        assert_eq!(patcher.record_count(), 0);
        assert!(current(&owner, "send").ptr_eq(&original));
        assert!(!other.has("x"));
    }

    #[test]
    fn test_into_unload_reverts() {
        let patcher = Patcher::new();
        let (owner, original) = echo_owner();
        let handle = patcher.before(&owner, "send", &plugin("a"), uppercase_before).unwrap();

        let unload = handle.into_unload();
        unload().unwrap();
        assert!(current(&owner, "send").ptr_eq(&original));
    }

    fn interceptor_for(kind: u8) -> Interceptor {
        match kind {
            0 => Interceptor::before(uppercase_before),
            1 => Interceptor::after(bang_after),
            _ => Interceptor::instead(|this, args, original| match original {
                Some(f) => f.call(this, args),
                None => Ok(Value::Undefined),
            }),
        }
    }

    proptest! {
        #[test]
        fn prop_unpatching_in_any_order_restores_original(
            (kinds, order) in (1usize..10).prop_flat_map(|n| (
                prop::collection::vec(0u8..3, n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            ))
        ) {
            let patcher = Patcher::new();
            let (owner, original) = echo_owner();
            let handles: Vec<_> = kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    patcher
                        .patch(&owner, "send", interceptor_for(*kind), &plugin(&format!("p{}", i % 3)))
                        .unwrap()
                })
                .collect();

            prop_assert_eq!(patcher.record_count(), 1);
            for i in order {
                prop_assert!(handles[i].revert());
            }
            prop_assert_eq!(patcher.record_count(), 0);
            prop_assert!(current(&owner, "send").ptr_eq(&original));
        }

        #[test]
        fn prop_absent_property_removed_after_any_order(
            order in Just((0..5usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let patcher = Patcher::new();
            let owner = ObjectRef::new();
            let handles: Vec<_> = (0..5)
                .map(|i| patcher.patch(&owner, "late", interceptor_for(i as u8 % 3), &plugin("p")).unwrap())
                .collect();

            for i in order {
                handles[i].revert();
            }
            prop_assert!(!owner.has("late"));
        }
    }
}
