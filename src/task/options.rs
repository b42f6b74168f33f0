//! Node options blob.
//!
//! A flat key/value map handed to a node at `prepare_for_run` and shared
//! read-only with every invocation context of that run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Option key for the per-invocation batch limit.
pub const KEY_MAX_BATCH_SIZE: &str = "max_batch_size";

/// Option key for the concurrent invocation limit.
pub const KEY_MAX_IN_SCHEDULING: &str = "max_in_scheduling";

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            OptionValue::Float(v) => Some(*v),
            OptionValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::String(v)
    }
}

/// Configuration blob for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOptions {
    values: BTreeMap<String, OptionValue>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(OptionValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(OptionValue::as_float)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(OptionValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(OptionValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_accessors() {
        let opts = NodeOptions::new()
            .with("enabled", true)
            .with(KEY_MAX_BATCH_SIZE, 8i64)
            .with("gain", 0.5)
            .with("codec", "h264");

        assert_eq!(opts.get_bool("enabled"), Some(true));
        assert_eq!(opts.get_int(KEY_MAX_BATCH_SIZE), Some(8));
        assert_eq!(opts.get_float("gain"), Some(0.5));
        assert_eq!(opts.get_str("codec"), Some("h264"));
        assert_eq!(opts.get_int("codec"), None);
        assert_eq!(opts.len(), 4);
    }

    #[test]
    fn test_int_widens_to_float() {
        let opts = NodeOptions::new().with("gain", 2i64);
        assert_eq!(opts.get_float("gain"), Some(2.0));
    }

    #[test]
    fn test_options_from_toml() {
        let opts: NodeOptions = toml::from_str(
            r#"
            max_batch_size = 2
            gain = 1.5
            label = "scaler"
            "#,
        )
        .unwrap();

        assert_eq!(opts.get_int(KEY_MAX_BATCH_SIZE), Some(2));
        assert_eq!(opts.get_float("gain"), Some(1.5));
        assert_eq!(opts.get_str("label"), Some("scaler"));
    }
}
