//! Plugin lifecycle manager
//!
//! Owns the set of installed plugins and moves them through
//! install -> enable -> start -> stop -> remove. Starting a plugin hands it a
//! [`PluginContext`]; everything it registers lands in the unload ledger,
//! which stopping drains. The ledger entry always starts with a blanket
//! "revert every layer this plugin installed" callback, so it runs last and
//! nothing a plugin patched survives a stop, tracked or not.
//!
//! Records are persisted under the `plugins` store key; the running state is
//! never persisted.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::core::consumer::ConsumerId;
use crate::core::error::{PatchworkError, Result};
use crate::core::notify::Notifier;
use crate::runtime::HostContext;

use super::context::PluginContext;
use super::evaluator::PluginEvaluator;
use super::ledger::panic_message;
use super::logger::DefaultPluginLogger;
use super::source::{FetchedPlugin, PluginSource};
use super::storage::{PluginStorage, SettingsStore};
use super::types::{Plugin, PluginId, PluginInfo, PluginRecord, PluginState, PluginStateEvent};

/// Store key holding every installed plugin record
pub const PLUGINS_KEY: &str = "plugins";

/// Callback for plugin state changes
pub type StateListener = Arc<dyn Fn(&PluginStateEvent) + Send + Sync>;

/// External collaborators the manager talks to
#[derive(Clone)]
pub struct PluginServices {
    pub source: Arc<dyn PluginSource>,
    pub store: Arc<dyn SettingsStore>,
    pub evaluator: Arc<dyn PluginEvaluator>,
    pub notifier: Arc<dyn Notifier>,
}

/// Outcome of [`PluginManager::init`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub started: Vec<PluginId>,
    pub refetched: Vec<PluginId>,
    pub failed: Vec<(PluginId, String)>,
}

struct PluginEntry {
    record: PluginRecord,
    running: bool,
    /// `Starting` or `Stopping` while a transition is in flight
    transition: Option<PluginState>,
    instance: Option<Arc<dyn Plugin>>,
}

impl PluginEntry {
    fn new(record: PluginRecord) -> Self {
        Self {
            record,
            running: false,
            transition: None,
            instance: None,
        }
    }

    fn state(&self) -> PluginState {
        match self.transition {
            Some(state) => state,
            None if self.running => PluginState::Running,
            None if self.record.enabled => PluginState::Stopped,
            None => PluginState::Disabled,
        }
    }

    fn info(&self) -> PluginInfo {
        let manifest = &self.record.manifest;
        PluginInfo {
            id: self.record.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            authors: manifest.author_names(),
            description: manifest.description.clone(),
            icon: manifest.icon.clone(),
            enabled: self.record.enabled,
            update: self.record.update,
            state: self.state(),
        }
    }
}

/// Plugin manager
pub struct PluginManager {
    host: HostContext,
    services: PluginServices,
    refetch_on_init: bool,
    plugins: Mutex<BTreeMap<PluginId, PluginEntry>>,
    listeners: RwLock<Vec<StateListener>>,
}

impl PluginManager {
    pub fn new(host: HostContext, services: PluginServices) -> Self {
        Self {
            host,
            services,
            refetch_on_init: true,
            plugins: Mutex::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Whether [`PluginManager::init`] refetches plugins flagged for update
    pub fn with_refetch_on_init(mut self, enabled: bool) -> Self {
        self.refetch_on_init = enabled;
        self
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// Register a listener for state changes
    pub fn on_state_change(&self, listener: StateListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Read persisted records into memory without starting anything.
    ///
    /// Returns the number of newly loaded records. Records that fail to
    /// deserialize are skipped.
    pub fn load(&self) -> Result<usize> {
        let stored = self.stored_records()?;
        let mut plugins = self.plugins();
        let mut loaded = 0;
        for record in stored.into_values() {
            if !plugins.contains_key(&record.id) {
                plugins.insert(record.id.clone(), PluginEntry::new(record));
                loaded += 1;
            }
        }
        debug!(loaded, total = plugins.len(), "Plugin records loaded");
        Ok(loaded)
    }

    /// Session start: load records, refetch enabled plugins flagged for
    /// update, then start every enabled plugin.
    ///
    /// A failed refetch falls back to the stored source. Individual start
    /// failures are collected, not returned.
    pub async fn init(&self) -> Result<InitReport> {
        self.load()?;
        let mut report = InitReport::default();

        let candidates: Vec<(PluginId, bool)> = self
            .plugins()
            .values()
            .filter(|e| e.record.enabled)
            .map(|e| (e.record.id.clone(), e.record.update))
            .collect();

        for (id, update) in candidates {
            if update && self.refetch_on_init {
                match self.services.source.fetch(&id).await {
                    Ok(fetched) => {
                        self.replace_bundle(&id, fetched)?;
                        report.refetched.push(id.clone());
                    }
                    Err(e) => {
                        warn!(plugin = %id, error = %e, "Refetch failed, using stored source");
                    }
                }
            }

            match self.start(&id) {
                Ok(()) => report.started.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }

        info!(
            started = report.started.len(),
            refetched = report.refetched.len(),
            failed = report.failed.len(),
            "Plugins initialized"
        );
        Ok(report)
    }

    /// Fetch and record a new plugin. It is not started.
    pub async fn install(&self, id: &str) -> Result<PluginInfo> {
        if self.plugins().contains_key(id) {
            return Err(PatchworkError::PluginAlreadyInstalled(id.to_string()));
        }
        info!(plugin = %id, "Installing plugin");

        let fetched = match self.services.source.fetch(id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(plugin = %id, error = %e, "Failed to fetch plugin");
                self.services
                    .notifier
                    .notify(&format!("Failed to install {}: {}", id, e), Some("warning"));
                return Err(e);
            }
        };
        fetched.manifest.validate()?;

        let enabled = self
            .stored_records()?
            .get(id)
            .map_or(false, |record| record.enabled);
        let record = PluginRecord {
            id: id.to_string(),
            manifest: fetched.manifest,
            source: fetched.source,
            enabled,
            update: true,
        };

        let info = {
            let mut plugins = self.plugins();
            if plugins.contains_key(id) {
                return Err(PatchworkError::PluginAlreadyInstalled(id.to_string()));
            }
            let entry = PluginEntry::new(record);
            let info = entry.info();
            plugins.insert(id.to_string(), entry);
            info
        };
        self.persist()?;
        self.emit(id, &info.name, None, info.state);
        info!(plugin = %id, name = %info.name, version = %info.version, "Plugin installed");
        Ok(info)
    }

    /// Run a plugin's setup code.
    ///
    /// Starting a running plugin is a no-op. If setup fails, whatever it
    /// registered is torn down again and the plugin stays stopped.
    pub fn start(&self, id: &str) -> Result<()> {
        let record = self.with_entry(id, |entry| {
            if !entry.record.enabled {
                return Err(PatchworkError::PluginDisabled(id.to_string()));
            }
            if entry.transition.is_some() {
                return Err(PatchworkError::PluginBusy(id.to_string()));
            }
            if entry.running {
                return Ok(None);
            }
            entry.transition = Some(PluginState::Starting);
            Ok(Some(entry.record.clone()))
        })?;
        let Some(record) = record else {
            debug!(plugin = %id, "Plugin already running");
            return Ok(());
        };

        let consumer = ConsumerId::plugin(id);
        let ledger = self.host.ledger().clone();
        let patcher = self.host.patcher().clone();
        let revert_consumer = consumer.clone();
        ledger.register(&consumer, move || {
            let removed = patcher.revert_all(&revert_consumer);
            if removed > 0 {
                debug!(consumer = %revert_consumer, removed, "Reverted untracked patches");
            }
            Ok(())
        });

        match self.run_setup(&consumer, &record) {
            Ok(instance) => {
                let unloading = instance.clone();
                ledger.register(&consumer, move || unloading.on_unload());
                self.with_entry(id, |entry| {
                    entry.running = true;
                    entry.transition = None;
                    entry.instance = Some(instance);
                    Ok(())
                })?;
                self.emit(id, &record.manifest.name, Some(PluginState::Stopped), PluginState::Running);
                info!(plugin = %id, name = %record.manifest.name, "Plugin started");
                Ok(())
            }
            Err(reason) => {
                let report = ledger.drain(&consumer);
                self.with_entry(id, |entry| {
                    entry.running = false;
                    entry.transition = None;
                    entry.instance = None;
                    Ok(())
                })?;
                error!(
                    plugin = %id,
                    reason = %reason,
                    cleanup_failures = report.failures.len(),
                    "Plugin failed to start"
                );
                self.services.notifier.notify(
                    &format!("{} failed to start: {}", record.manifest.name, reason),
                    Some("warning"),
                );
                self.emit(id, &record.manifest.name, Some(PluginState::Starting), PluginState::Stopped);
                Err(PatchworkError::PluginSetupFailed {
                    id: id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Drain a running plugin's ledger entry.
    ///
    /// The plugin is stopped afterwards even if some callbacks failed; the
    /// failures are reported as [`PatchworkError::PluginTeardownPartialFailure`].
    pub fn stop(&self, id: &str) -> Result<()> {
        let name = self.with_entry(id, |entry| {
            if entry.transition.is_some() {
                return Err(PatchworkError::PluginBusy(id.to_string()));
            }
            if !entry.running {
                return Ok(None);
            }
            entry.transition = Some(PluginState::Stopping);
            Ok(Some(entry.record.manifest.name.clone()))
        })?;
        let Some(name) = name else {
            debug!(plugin = %id, "Plugin not running");
            return Ok(());
        };

        let report = self.host.ledger().drain(&ConsumerId::plugin(id));
        let new_state = self.with_entry(id, |entry| {
            entry.running = false;
            entry.transition = None;
            entry.instance = None;
            Ok(entry.state())
        })?;
        self.emit(id, &name, Some(PluginState::Running), new_state);

        match report.first_error() {
            None => {
                info!(plugin = %id, callbacks = report.ran, "Plugin stopped");
                Ok(())
            }
            Some(first) => {
                warn!(
                    plugin = %id,
                    failures = report.failures.len(),
                    first = %first,
                    "Plugin stopped with cleanup failures"
                );
                self.services.notifier.notify(
                    &format!("{} did not unload cleanly: {}", name, first),
                    Some("warning"),
                );
                Err(PatchworkError::PluginTeardownPartialFailure {
                    id: id.to_string(),
                    failures: report.failures.len(),
                    first: first.to_string(),
                })
            }
        }
    }

    /// Persist the enabled flag; disabling a running plugin stops it first.
    ///
    /// Enabling does not start the plugin.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let (current, running) = self.with_entry(id, |e| Ok((e.record.enabled, e.running)))?;
        if current == enabled {
            return Ok(());
        }

        let teardown = if !enabled && running {
            self.stop_tolerant(id)?
        } else {
            None
        };

        let (name, old, new) = self.with_entry(id, |entry| {
            let old = entry.state();
            entry.record.enabled = enabled;
            Ok((entry.record.manifest.name.clone(), old, entry.state()))
        })?;
        self.persist()?;
        self.emit(id, &name, Some(old), new);
        info!(plugin = %id, enabled, "Plugin enabled flag changed");

        teardown.map_or(Ok(()), Err)
    }

    /// Flip the enabled flag, returning the new value.
    ///
    /// Turning a running plugin off stops it; turning it on does not start it.
    pub fn toggle_enabled(&self, id: &str) -> Result<bool> {
        let enabled = !self.with_entry(id, |e| Ok(e.record.enabled))?;
        self.set_enabled(id, enabled)?;
        Ok(enabled)
    }

    /// Flip the refetch-on-session-start flag, returning the new value
    pub fn toggle_update(&self, id: &str) -> Result<bool> {
        let update = self.with_entry(id, |entry| {
            entry.record.update = !entry.record.update;
            Ok(entry.record.update)
        })?;
        self.persist()?;
        debug!(plugin = %id, update, "Plugin update flag changed");
        Ok(update)
    }

    /// Re-download a plugin and swap in the new code.
    ///
    /// A failed fetch leaves the plugin untouched. Otherwise an enabled plugin
    /// is stopped, updated and started again, which also retries plugins whose
    /// previous start failed.
    pub async fn refetch(&self, id: &str) -> Result<()> {
        let (name, enabled) = self.with_entry(id, |e| Ok((e.record.manifest.name.clone(), e.record.enabled)))?;
        let fetched = self.fetch_update(id, &name).await?;

        let teardown = if enabled { self.stop_tolerant(id)? } else { None };
        self.replace_bundle(id, fetched)?;
        self.services
            .notifier
            .notify(&format!("Refetched {}", name), Some("check"));

        if enabled {
            self.start(id)?;
        }
        teardown.map_or(Ok(()), Err)
    }

    /// Re-download a stopped plugin's code without touching its lifecycle.
    ///
    /// Used by tools that edit persisted state outside a running session.
    pub async fn refetch_source(&self, id: &str) -> Result<()> {
        let (name, running) = self.with_entry(id, |e| Ok((e.record.manifest.name.clone(), e.running)))?;
        if running {
            return Err(PatchworkError::PluginBusy(id.to_string()));
        }
        let fetched = self.fetch_update(id, &name).await?;
        self.replace_bundle(id, fetched)?;
        info!(plugin = %id, "Plugin source refetched");
        Ok(())
    }

    /// Wipe a plugin's stored data, restarting it if it was running
    pub fn clear_data(&self, id: &str) -> Result<()> {
        let running = self.with_entry(id, |e| Ok(e.running))?;
        let teardown = if running { self.stop_tolerant(id)? } else { None };

        PluginStorage::new(self.services.store.clone(), id).clear()?;
        info!(plugin = %id, "Plugin data cleared");

        if running {
            self.start(id)?;
        }
        teardown.map_or(Ok(()), Err)
    }

    /// Stop (if running), then delete the record and the plugin's data
    pub fn remove(&self, id: &str) -> Result<()> {
        if let Some(e) = self.stop_tolerant(id)? {
            warn!(plugin = %id, error = %e, "Removing plugin that did not unload cleanly");
        }

        let entry = {
            let mut plugins = self.plugins();
            match plugins.get(id) {
                None => return Err(PatchworkError::PluginNotFound(id.to_string())),
                Some(entry) if entry.transition.is_some() || entry.running => {
                    return Err(PatchworkError::PluginBusy(id.to_string()))
                }
                Some(_) => {}
            }
            plugins.remove(id)
        };
        let Some(entry) = entry else {
            return Err(PatchworkError::PluginNotFound(id.to_string()));
        };

        self.persist()?;
        PluginStorage::new(self.services.store.clone(), id).clear()?;
        self.emit(id, &entry.record.manifest.name, Some(entry.state()), PluginState::Removed);
        info!(plugin = %id, "Plugin removed");
        Ok(())
    }

    /// Stop every running plugin, then shut the host context down.
    ///
    /// Returns the number of plugins stopped.
    pub fn shutdown(&self) -> usize {
        let running: Vec<PluginId> = self
            .plugins()
            .values()
            .filter(|e| e.running)
            .map(|e| e.record.id.clone())
            .collect();

        for id in &running {
            if let Err(e) = self.stop(id) {
                warn!(plugin = %id, error = %e, "Plugin did not stop cleanly during shutdown");
            }
        }
        self.host.shutdown();
        running.len()
    }

    /// Snapshot of every installed plugin
    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins().values().map(PluginEntry::info).collect()
    }

    pub fn get(&self, id: &str) -> Option<PluginInfo> {
        self.plugins().get(id).map(PluginEntry::info)
    }

    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.plugins().get(id).map(PluginEntry::state)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.plugins().get(id).map_or(false, |e| e.running)
    }

    pub fn len(&self) -> usize {
        self.plugins().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins().is_empty()
    }

    /// Evaluate the plugin and run `on_load`, containing panics
    fn run_setup(&self, consumer: &ConsumerId, record: &PluginRecord) -> std::result::Result<Arc<dyn Plugin>, String> {
        let context = PluginContext::new(
            consumer.clone(),
            record.manifest.clone(),
            self.host.patcher().clone(),
            self.host.resolver().clone(),
            self.host.ledger().clone(),
            Arc::new(DefaultPluginLogger::new(record.id.clone())),
            PluginStorage::new(self.services.store.clone(), &record.id),
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let instance = self
                .services
                .evaluator
                .evaluate(&record.manifest, &record.source)?;
            instance.on_load(&context)?;
            Ok::<_, PatchworkError>(instance)
        }));

        match outcome {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(panic_message(panic.as_ref())),
        }
    }

    /// Stop, treating "stopped with failures" as success-with-warning.
    ///
    /// Other errors (busy, not found) are returned.
    fn stop_tolerant(&self, id: &str) -> Result<Option<PatchworkError>> {
        match self.stop(id) {
            Ok(()) => Ok(None),
            Err(e) if e.leaves_plugin_stopped() => Ok(Some(e)),
            Err(e) => Err(e),
        }
    }

    async fn fetch_update(&self, id: &str, name: &str) -> Result<FetchedPlugin> {
        let fetched = match self.services.source.fetch(id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(plugin = %id, error = %e, "Refetch failed");
                self.services
                    .notifier
                    .notify(&format!("Failed to refetch {}: {}", name, e), Some("warning"));
                return Err(e);
            }
        };
        fetched.manifest.validate()?;
        Ok(fetched)
    }

    fn replace_bundle(&self, id: &str, fetched: FetchedPlugin) -> Result<()> {
        self.with_entry(id, |entry| {
            entry.record.manifest = fetched.manifest;
            entry.record.source = fetched.source;
            Ok(())
        })?;
        self.persist()?;
        debug!(plugin = %id, "Plugin bundle replaced");
        Ok(())
    }

    fn stored_records(&self) -> Result<BTreeMap<PluginId, PluginRecord>> {
        let mut records = BTreeMap::new();
        let Some(Value::Object(stored)) = self.services.store.get(PLUGINS_KEY)? else {
            return Ok(records);
        };
        for (id, raw) in stored {
            match serde_json::from_value::<PluginRecord>(raw) {
                Ok(record) => {
                    records.insert(id, record);
                }
                Err(e) => warn!(plugin = %id, error = %e, "Skipping unreadable plugin record"),
            }
        }
        Ok(records)
    }

    fn persist(&self) -> Result<()> {
        let snapshot = self
            .plugins()
            .iter()
            .map(|(id, entry)| -> Result<(String, Value)> {
                Ok((id.clone(), serde_json::to_value(&entry.record)?))
            })
            .collect::<Result<Map<String, Value>>>()?;
        self.services.store.set(PLUGINS_KEY, Value::Object(snapshot))
    }

    fn with_entry<T>(&self, id: &str, f: impl FnOnce(&mut PluginEntry) -> Result<T>) -> Result<T> {
        let mut plugins = self.plugins();
        let entry = plugins
            .get_mut(id)
            .ok_or_else(|| PatchworkError::PluginNotFound(id.to_string()))?;
        f(entry)
    }

    fn emit(&self, id: &str, name: &str, old_state: Option<PluginState>, new_state: PluginState) {
        let event = PluginStateEvent {
            plugin_id: id.to_string(),
            plugin_name: name.to_string(),
            old_state,
            new_state,
            timestamp: chrono::Utc::now().timestamp(),
        };
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }

    fn plugins(&self) -> MutexGuard<'_, BTreeMap<PluginId, PluginEntry>> {
        self.plugins.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
