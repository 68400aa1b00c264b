//! Logger handed to plugin code
//!
//! Routes plugin messages into the host's tracing pipeline, tagged with the
//! plugin id so they can be filtered per plugin.

use tracing::{debug, error, info, warn};

use crate::plugin::types::PluginLogger;

pub struct DefaultPluginLogger {
    plugin_id: String,
}

impl DefaultPluginLogger {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }
}

impl PluginLogger for DefaultPluginLogger {
    fn debug(&self, message: &str) {
        debug!(plugin = %self.plugin_id, "{}", message);
    }
    fn info(&self, message: &str) {
        info!(plugin = %self.plugin_id, "{}", message);
    }
    fn warn(&self, message: &str) {
        warn!(plugin = %self.plugin_id, "{}", message);
    }
    fn error(&self, message: &str) {
        error!(plugin = %self.plugin_id, "{}", message);
    }
}
