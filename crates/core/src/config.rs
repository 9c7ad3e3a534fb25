use serde::{Deserialize, Serialize};

use crate::DEFAULT_SELECTOR_KEY;

pub const DEFAULT_FIELD_MANAGER: &str = "switchyard";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Selector key whose value names the version a Service routes to.
    pub selector_key: String,
    /// Field manager recorded on patches.
    pub field_manager: String,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self { selector_key: DEFAULT_SELECTOR_KEY.to_string(), field_manager: DEFAULT_FIELD_MANAGER.to_string() }
    }
}

impl TrafficConfig {
    /// Defaults overridden by `SWITCHYARD_SELECTOR_KEY` / `SWITCHYARD_FIELD_MANAGER`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let base = Self::default();
        let non_empty = |k: &str| get(k).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            selector_key: non_empty("SWITCHYARD_SELECTOR_KEY").unwrap_or(base.selector_key),
            field_manager: non_empty("SWITCHYARD_FIELD_MANAGER").unwrap_or(base.field_manager),
        }
    }

    pub fn with_selector_key(mut self, key: impl Into<String>) -> Self {
        self.selector_key = key.into();
        self
    }
}
