//! Per-plugin API surface
//!
//! A [`PluginContext`] is what a plugin's `on_load` receives. Every patch,
//! lazy lookup or cleanup made through it is recorded in the unload ledger
//! under the plugin's consumer id, so stopping the plugin undoes all of it
//! without the plugin keeping any handles around.

use std::sync::Arc;

use crate::core::consumer::ConsumerId;
use crate::core::error::Result;
use crate::host::{Function, ObjectRef, Value};
use crate::patcher::{Interceptor, Patcher, Unpatch};
use crate::resolver::{Filter, LazyHandle, Resolver};

use super::ledger::UnloadLedger;
use super::storage::PluginStorage;
use super::types::{PluginLogger, PluginManifest};

/// Capabilities granted to one running plugin
pub struct PluginContext {
    consumer: ConsumerId,
    manifest: PluginManifest,
    patcher: Patcher,
    resolver: Resolver,
    ledger: Arc<UnloadLedger>,
    logger: Arc<dyn PluginLogger>,
    storage: PluginStorage,
}

impl PluginContext {
    pub(crate) fn new(
        consumer: ConsumerId,
        manifest: PluginManifest,
        patcher: Patcher,
        resolver: Resolver,
        ledger: Arc<UnloadLedger>,
        logger: Arc<dyn PluginLogger>,
        storage: PluginStorage,
    ) -> Self {
        Self {
            consumer,
            manifest,
            patcher,
            resolver,
            ledger,
            logger,
            storage,
        }
    }

    pub fn id(&self) -> &ConsumerId {
        &self.consumer
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn logger(&self) -> &dyn PluginLogger {
        self.logger.as_ref()
    }

    pub fn storage(&self) -> &PluginStorage {
        &self.storage
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Apply an interceptor; it is reverted automatically on stop.
    ///
    /// The returned handle may be used to revert earlier.
    pub fn patch(&self, owner: &ObjectRef, key: &str, interceptor: Interceptor) -> Result<Arc<Unpatch>> {
        let handle = Arc::new(self.patcher.patch(owner, key, interceptor, &self.consumer)?);
        let tracked = handle.clone();
        self.ledger.register(&self.consumer, move || {
            tracked.revert();
            Ok(())
        });
        Ok(handle)
    }

    pub fn before<F>(&self, owner: &ObjectRef, key: &str, f: F) -> Result<Arc<Unpatch>>
    where
        F: Fn(&Value, &[Value]) -> Result<Option<Vec<Value>>> + Send + Sync + 'static,
    {
        self.patch(owner, key, Interceptor::before(f))
    }

    pub fn after<F>(&self, owner: &ObjectRef, key: &str, f: F) -> Result<Arc<Unpatch>>
    where
        F: Fn(&Value, &[Value], &Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.patch(owner, key, Interceptor::after(f))
    }

    pub fn instead<F>(&self, owner: &ObjectRef, key: &str, f: F) -> Result<Arc<Unpatch>>
    where
        F: Fn(&Value, Vec<Value>, Option<&Function>) -> Result<Value> + Send + Sync + 'static,
    {
        self.patch(owner, key, Interceptor::instead(f))
    }

    pub fn find(&self, filter: &Filter) -> Option<ObjectRef> {
        self.resolver.find(filter)
    }

    pub fn find_all(&self, filter: &Filter) -> Vec<ObjectRef> {
        self.resolver.find_all(filter)
    }

    pub fn find_by_props(&self, props: &[&str]) -> Option<ObjectRef> {
        self.resolver.find_by_props(props)
    }

    pub fn find_by_display_name(&self, name: &str) -> Option<ObjectRef> {
        self.resolver.find_by_display_name(name)
    }

    pub fn find_by_store_name(&self, name: &str) -> Option<ObjectRef> {
        self.resolver.find_by_store_name(name)
    }

    /// Wait for a module; the wait is cancelled on stop if it has not fired
    pub fn find_lazy<F>(&self, filter: &Filter, callback: F)
    where
        F: FnOnce(ObjectRef) + Send + 'static,
    {
        let handle: LazyHandle = self.resolver.find_lazy(filter, callback);
        self.ledger.register(&self.consumer, handle.into_unload());
    }

    /// Register arbitrary teardown work
    pub fn on_unload<F>(&self, callback: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.ledger.register(&self.consumer, callback);
    }
}
