//! The closed value type that recipe leaves evaluate to.
//!
//! Every template leaf, variant candidate and evaluated expression ends up as a
//! [`Value`]. Conversions from YAML, JSON and minijinja values are explicit and
//! total: floating point numbers have no member of their own and are carried as
//! their string form.

use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered mapping used for evaluated mappings.
pub type Mapping = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Mapping(Mapping),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Jinja-style truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Mapping(map) => !map.is_empty(),
        }
    }

    /// String form used when a value is interpolated into surrounding text.
    pub fn to_interpolated(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Mapping(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Name of the member, used in type mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Mapping(_) => "mapping",
        }
    }

    /// Converts a scalar YAML value. Sequences and mappings are handled by the
    /// recipe parser, which needs to track selectors and field paths.
    pub fn from_yaml_scalar(value: &serde_yaml::Value, path: &str) -> Option<Self> {
        match value {
            serde_yaml::Value::Null => Some(Value::Null),
            serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => Some(number_to_value(n, path)),
            serde_yaml::Value::String(s) => Some(Value::Str(s.clone())),
            _ => None,
        }
    }

    /// Converts a plain YAML document (no selectors) into a value.
    pub fn from_yaml(value: &serde_yaml::Value, path: &str) -> Self {
        match value {
            serde_yaml::Value::Sequence(items) => Value::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Value::from_yaml(item, &format!("{path}[{i}]")))
                    .collect(),
            ),
            serde_yaml::Value::Mapping(map) => Value::Mapping(
                map.iter()
                    .map(|(k, v)| {
                        let key = yaml_key_to_string(k);
                        let child = Value::from_yaml(v, &format!("{path}.{key}"));
                        (key, child)
                    })
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value, path),
            scalar => Value::from_yaml_scalar(scalar, path).unwrap_or_default(),
        }
    }
}

fn number_to_value(n: &serde_yaml::Number, path: &str) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        warn!("Floating point value {n} at '{path}' is treated as a string; quote it to silence this warning");
        Value::Str(n.to_string())
    }
}

/// Renders a YAML mapping key as a string.
pub fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Str(n.to_string()),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Mapping(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&minijinja::Value> for Value {
    fn from(value: &minijinja::Value) -> Self {
        if value.is_undefined() || value.is_none() {
            return Value::Null;
        }
        match serde_json::to_value(value) {
            Ok(json) => Value::from(json),
            Err(_) => Value::Str(value.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_interpolated())
    }
}
