//! Per-application key/value cache

use dashmap::DashMap;
use serde_json::Value;

/// In-process cache owned by one application, rebuilt on every reload
#[derive(Debug, Default)]
pub struct Cache {
    entries: DashMap<String, Value>,
}

impl Cache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cloned value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Insert or replace a value
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Remove a value
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Drop every entry
    pub fn reset(&self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_reset() {
        let cache = Cache::new();
        cache.set("lang", json!("en-US"));
        assert_eq!(cache.get("lang"), Some(json!("en-US")));

        cache.reset();
        assert!(cache.is_empty());
        assert_eq!(cache.get("lang"), None);
    }
}
