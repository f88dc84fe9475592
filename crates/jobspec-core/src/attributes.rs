use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form key/value map of a jobspec scope.
pub type AttributeMap = serde_json::Map<String, Value>;

/// Shallow override of `parent` by `child`.
///
/// Keys of `child` replace keys of `parent` as a whole, nested maps are not
/// merged. `parent` is left untouched.
pub fn merge(parent: &AttributeMap, child: &AttributeMap) -> AttributeMap {
    let mut merged = parent.clone();
    for (key, value) in child {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Renders a scalar attribute value the way it would be written on a command line.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// System and user attributes (`duration`, `cwd`, `environment`, ...).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Attributes(AttributeMap);

impl Attributes {
    pub fn new(map: AttributeMap) -> Self {
        Self(map)
    }

    pub fn inherit(&self, child: &AttributeMap) -> Self {
        Self(merge(&self.0, child))
    }

    pub fn as_map(&self) -> &AttributeMap {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.0
            .get("duration")
            .and_then(Value::as_f64)
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn cwd(&self) -> Option<&str> {
        self.0.get("cwd").and_then(Value::as_str)
    }

    /// Environment variables, sorted by name.
    pub fn environment(&self) -> Vec<(String, String)> {
        self.0
            .get("environment")
            .and_then(Value::as_object)
            .map(|env| {
                env.iter()
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Compatibility requirements of a scope.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Requires(AttributeMap);

impl Requires {
    pub fn new(map: AttributeMap) -> Self {
        Self(map)
    }

    pub fn inherit(&self, child: &AttributeMap) -> Self {
        Self(merge(&self.0, child))
    }

    pub fn as_map(&self) -> &AttributeMap {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}
