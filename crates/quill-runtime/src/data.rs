//! Side-channel data passed to a template next to its model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A bag of named values reachable from templates as `TemplateData.<key>`,
/// or by bare name when the model has no member of that name.
///
/// Unknown keys read as `null` rather than failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateData {
    values: BTreeMap<String, Value>,
}

impl TemplateData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `key` unless the key is already present.
    ///
    /// Returns `false` when the key existed; the old value is kept.
    pub fn add_value(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if self.values.contains_key(&key) {
            return false;
        }
        self.values.insert(key, value.into());
        true
    }

    /// Adds every entry of `map`, keeping existing keys.
    pub fn add_map<K, V>(&mut self, map: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in map {
            self.add_value(key, value);
        }
    }

    /// Sets `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Resolves a dotted path; missing segments yield `null`.
    pub fn lookup(&self, path: &str) -> Value {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return Value::Null;
        };
        let mut current = match self.values.get(first) {
            Some(value) => value,
            None => return Value::Null,
        };
        for segment in segments {
            match crate::instance::member(current, segment) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        current.clone()
    }

    /// The whole bag as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TemplateData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = TemplateData::new();
        data.add_map(iter);
        data
    }
}
