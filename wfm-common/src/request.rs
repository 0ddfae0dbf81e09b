//! Per-request value store
//!
//! Query and form fields merged into one string map. Lookups are total:
//! an absent key reads as the empty string, matching the rendering layer's
//! never-fail contract.

use std::collections::HashMap;

/// Merged query/form parameters for one request
#[derive(Debug, Clone, Default)]
pub struct RequestValues {
    values: HashMap<String, String>,
}

impl RequestValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Value for `key`, empty string when absent
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    /// True when `key` is present and non-empty
    pub fn has(&self, key: &str) -> bool {
        !self.get(key).is_empty()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_reads_empty() {
        let values = RequestValues::new();
        assert_eq!(values.get("identifier"), "");
        assert!(!values.has("identifier"));
    }

    #[test]
    fn set_and_get() {
        let mut values = RequestValues::new();
        values.set("identifier", "D_1000001");
        assert_eq!(values.get("identifier"), "D_1000001");
        assert!(values.has("identifier"));
    }
}
