//! Per-component health reporting.
//!
//! Each connection owns a [`StatusReporter`] and writes its latest outcome
//! under a handful of well-known keys. The status HTTP endpoint renders the
//! snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

/// Well-known status keys.
pub mod keys {
    /// `OK` or the text of the last connection error.
    pub const CONNECTION: &str = "CONNECTION";
    /// `OK` or the text of the last subscription error.
    pub const SUBSCRIPTION: &str = "SUBSCRIPTION";
    /// Number of devices registered with the platform this run.
    pub const DEVICES_SEEN: &str = "DEVICES_SEEN";
    /// `OK` or the text of the last registration error.
    pub const LAST_REGISTRATION: &str = "LAST_REGISTRATION";
    /// Outcome of the last command delivered to the device side.
    pub const LAST_COMMAND: &str = "LAST_COMMAND";
    /// Outcome of the last publish to the platform.
    pub const LAST_PUBLISH: &str = "LAST_PUBLISH";
}

/// Value reported for a healthy key.
pub const OK: &str = "OK";

/// Shared `key -> value` status map. Clones share state; last write wins.
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    entries: Arc<DashMap<String, String>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// The snapshot as a flat JSON object of strings.
    pub fn summary(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_owned())
    }
}
