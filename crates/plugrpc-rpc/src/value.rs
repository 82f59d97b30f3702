//! Structured values passed through plugin interfaces.
//!
//! Configuration blocks, artifact state and data source output are all
//! [`ConfigValue`] trees. The type is a plain externally tagged enum so it
//! survives both codecs unchanged.

use std::collections::BTreeMap;

use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ConfigValue {
    #[default]
    Null,
    Bool(bool),
    /// Must be finite to be sent; JSON has no NaN or infinity.
    #[serde(serialize_with = "finite")]
    Number(f64),
    String(String),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    /// An empty map.
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Builder-style insert; turns `Null` into a map first.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        if self.is_null() {
            self = Self::map();
        }
        if let Self::Map(map) = &mut self {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(_) => ValueType::Bool,
            Self::Number(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
            Self::List(_) => ValueType::List,
            Self::Map(_) => ValueType::Map,
        })
    }

    /// Merge `other` into `self`; keys in `other` win. Non-map values are
    /// replaced outright.
    pub fn merge(&mut self, other: ConfigValue) {
        match (self, other) {
            (Self::Map(left), Self::Map(right)) => {
                for (key, value) in right {
                    match left.get_mut(&key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            left.insert(key, value);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }
}

fn finite<S: Serializer>(number: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !number.is_finite() {
        return Err(S::Error::custom(format!("cannot send non-finite number {number}")));
    }
    serializer.serialize_f64(*number)
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<ConfigValue>> From<Vec<T>> for ConfigValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(fields) => {
                Self::Map(fields.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<ConfigValue> for serde_json::Value {
    fn from(value: ConfigValue) -> Self {
        use serde_json::Value;
        match value {
            ConfigValue::Null => Value::Null,
            ConfigValue::Bool(b) => Value::Bool(b),
            ConfigValue::Number(n) => serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
            ConfigValue::String(s) => Value::String(s),
            ConfigValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            ConfigValue::Map(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Expected shape of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Number,
    String,
    List,
    Map,
    Any,
}

impl ValueType {
    pub fn matches(self, value: &ConfigValue) -> bool {
        self == Self::Any || value.value_type() == Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub value_type: ValueType,
    pub required: bool,
}

impl AttributeSpec {
    pub fn required(value_type: ValueType) -> Self {
        Self {
            value_type,
            required: true,
        }
    }

    pub fn optional(value_type: ValueType) -> Self {
        Self {
            value_type,
            required: false,
        }
    }
}

/// Attribute name → expected shape.
pub type ConfigSpec = BTreeMap<String, AttributeSpec>;

/// Problems with `config` measured against `spec`, one message each.
pub fn check_config(spec: &ConfigSpec, config: &ConfigValue) -> Vec<String> {
    let mut problems = Vec::new();
    for (name, attr) in spec {
        match config.get(name) {
            None | Some(ConfigValue::Null) if attr.required => {
                problems.push(format!("missing required attribute {name:?}"));
            }
            Some(value) if !value.is_null() && !attr.value_type.matches(value) => {
                problems.push(format!(
                    "attribute {name:?} should be {:?}",
                    attr.value_type
                ));
            }
            _ => {}
        }
    }
    problems
}
