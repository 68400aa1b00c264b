//! Shared host-side services
//!
//! One [`HostContext`] exists per session. It owns the module registry, the
//! resolver subscribed to it, the process-wide patch table and the unload
//! ledger, and is cheap to clone.

use std::sync::Arc;

use tracing::info;

use crate::core::consumer::ConsumerId;
use crate::core::error::Result;
use crate::host::{ModuleRegistry, ObjectRef};
use crate::patcher::{Interceptor, Patcher, Unpatch};
use crate::plugin::ledger::{DrainReport, UnloadLedger};
use crate::resolver::Resolver;

#[derive(Clone)]
pub struct HostContext {
    registry: Arc<ModuleRegistry>,
    resolver: Resolver,
    patcher: Patcher,
    ledger: Arc<UnloadLedger>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ModuleRegistry::new()))
    }

    pub fn with_registry(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            resolver: Resolver::new(registry.clone()),
            registry,
            patcher: Patcher::new(),
            ledger: Arc::new(UnloadLedger::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn patcher(&self) -> &Patcher {
        &self.patcher
    }

    pub fn ledger(&self) -> &Arc<UnloadLedger> {
        &self.ledger
    }

    /// Patch on behalf of the host itself; reverted by [`HostContext::shutdown`]
    pub fn patch(&self, owner: &ObjectRef, key: &str, interceptor: Interceptor) -> Result<Arc<Unpatch>> {
        let consumer = ConsumerId::host();
        let handle = Arc::new(self.patcher.patch(owner, key, interceptor, &consumer)?);
        let tracked = handle.clone();
        self.ledger.register(&consumer, move || {
            tracked.revert();
            Ok(())
        });
        Ok(handle)
    }

    /// Register host-level teardown work
    pub fn on_unload<F>(&self, callback: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.ledger.register(&ConsumerId::host(), callback);
    }

    /// Drain the host's own ledger entry, then remove any layer still
    /// installed by anyone.
    pub fn shutdown(&self) -> DrainReport {
        let report = self.ledger.drain(&ConsumerId::host());
        let leftover = self.patcher.unpatch_all();
        info!(
            callbacks = report.ran,
            failures = report.failures.len(),
            leftover_layers = leftover,
            "Host context shut down"
        );
        report
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Function, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_shutdown_reverts_everything() {
        let host = HostContext::new();
        let target = ObjectRef::new();
        target.set("f", Function::new("f", |_, _| Ok(Value::Number(1.0))));

        host.patch(
            &target,
            "f",
            Interceptor::after(|_, _, _| Ok(Some(Value::Number(2.0)))),
        )
        .unwrap();
        host.patcher()
            .before(&target, "f", &ConsumerId::plugin("stray"), |_, _| Ok(None))
            .unwrap();
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = cleaned.clone();
        host.on_unload(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(target.call_method("f", vec![]).unwrap(), Value::Number(2.0));
        let report = host.shutdown();
        assert_eq!(report.ran, 2);
        assert!(cleaned.load(Ordering::SeqCst));
        assert_eq!(host.patcher().record_count(), 0);
        assert_eq!(target.call_method("f", vec![]).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_resolver_sees_registry() {
        let host = HostContext::new();
        host.registry()
            .register(1, ObjectRef::with_props([("dispatch", Value::Bool(true))]));
        assert!(host.resolver().find_by_props(&["dispatch"]).is_some());
    }
}
