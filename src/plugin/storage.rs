//! Persisted settings collaborators
//!
//! The core only needs a synchronous key/value surface; where the bytes end
//! up is an external concern. Two stores are provided: an in-memory one and
//! a pretty-printed JSON file that is rewritten atomically on every change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::error::{ErrorContext, PatchworkError, Result};

/// Synchronous key/value store for plugin records and plugin data
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings file {}", path.display()))?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&content)? {
                    Value::Object(map) => map,
                    other => {
                        return Err(PatchworkError::StorageError(format!(
                            "settings file {} holds {} instead of an object",
                            path.display(),
                            json_type(&other)
                        )))
                    }
                }
            }
        } else {
            Map::new()
        };
        debug!(path = %path.display(), keys = values.len(), "Settings store opened");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Store key holding the data of one plugin
pub fn plugin_data_key(plugin_id: &str) -> String {
    format!("plugin-data/{}", plugin_id)
}

/// A plugin's private data namespace
#[derive(Clone)]
pub struct PluginStorage {
    store: Arc<dyn SettingsStore>,
    key: String,
}

impl PluginStorage {
    pub fn new(store: Arc<dyn SettingsStore>, plugin_id: &str) -> Self {
        Self {
            store,
            key: plugin_data_key(plugin_id),
        }
    }

    pub fn get(&self, field: &str) -> Result<Option<Value>> {
        Ok(self.load()?.remove(field))
    }

    pub fn set(&self, field: &str, value: Value) -> Result<()> {
        let mut data = self.load()?;
        data.insert(field.to_string(), value);
        self.store.set(&self.key, Value::Object(data))
    }

    pub fn delete(&self, field: &str) -> Result<()> {
        let mut data = self.load()?;
        if data.remove(field).is_some() {
            self.store.set(&self.key, Value::Object(data))?;
        }
        Ok(())
    }

    /// Wipe everything this plugin stored
    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)
    }

    fn load(&self) -> Result<Map<String, Value>> {
        match self.store.get(&self.key)? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) | None => Ok(Map::new()),
        }
    }
}
