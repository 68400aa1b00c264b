//! User-facing notifications
//!
//! Lifecycle results that a user should see (failed starts, completed
//! refetches) go through a [`Notifier`]. Rendering them is up to the host.

use tracing::info;

/// Toast-style notification sink
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, icon: Option<&str>);
}

/// Notifier that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, icon: Option<&str>) {
        info!(target: "patchwork::notify", icon = icon.unwrap_or(""), "{}", message);
    }
}
