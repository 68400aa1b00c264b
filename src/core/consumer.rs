//! Consumer identity shared by the patcher and the unload ledger

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of whoever installs patches and registers cleanups: a plugin,
/// or the host shell itself.
///
/// The host is its own variant, so no plugin id can alias it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerId {
    Host,
    Plugin(String),
}

impl ConsumerId {
    /// Reserved consumer for host-level patches
    pub fn host() -> Self {
        ConsumerId::Host
    }

    pub fn plugin(id: impl Into<String>) -> Self {
        ConsumerId::Plugin(id.into())
    }

    pub fn is_host(&self) -> bool {
        matches!(self, ConsumerId::Host)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConsumerId::Host => "@host",
            ConsumerId::Plugin(id) => id,
        }
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ConsumerId {
    fn from(s: &str) -> Self {
        ConsumerId::Plugin(s.to_string())
    }
}

impl From<String> for ConsumerId {
    fn from(s: String) -> Self {
        ConsumerId::Plugin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_consumer() {
        assert!(ConsumerId::host().is_host());
        assert!(!ConsumerId::plugin("https://example.com/p/").is_host());
        assert_eq!(ConsumerId::from("a").to_string(), "a");
    }

    #[test]
    fn test_plugin_named_like_host_is_distinct() {
        let impostor = ConsumerId::plugin("@host");
        assert!(!impostor.is_host());
        assert_ne!(impostor, ConsumerId::host());
        assert_eq!(impostor.to_string(), ConsumerId::host().to_string());
    }
}
