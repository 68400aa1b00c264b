//! Turning fetched plugin code into a runnable [`Plugin`]
//!
//! How a bundle's source becomes executable is a host concern. The core only
//! asks an evaluator for an instance; [`FactoryEvaluator`] covers hosts that
//! link their plugins in and select them by the manifest's `main` entry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::error::{PatchworkError, Result};

use super::types::{Plugin, PluginManifest};

/// Produces plugin instances from fetched code
pub trait PluginEvaluator: Send + Sync {
    fn evaluate(&self, manifest: &PluginManifest, source: &str) -> Result<Arc<dyn Plugin>>;
}

/// Builds a plugin from its source text
pub type PluginFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Evaluator backed by factories registered per `main` entry
#[derive(Default)]
pub struct FactoryEvaluator {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl FactoryEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, main: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(main.into(), Arc::new(factory));
    }
}

impl PluginEvaluator for FactoryEvaluator {
    fn evaluate(&self, manifest: &PluginManifest, source: &str) -> Result<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&manifest.main)
            .cloned()
            .ok_or_else(|| {
                PatchworkError::thrown(format!("no evaluator registered for {}", manifest.main))
            })?;
        factory(source)
    }
}
