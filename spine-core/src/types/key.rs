use serde::{Deserialize, Serialize};

use super::Value;

/// One component of a primary key. Only integers and strings may identify
/// an entity, so keys stay hashable and totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Str(String),
}

impl KeyValue {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(KeyValue::Int(*i)),
            Value::Str(s) => Some(KeyValue::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<KeyValue> for Value {
    fn from(key: KeyValue) -> Self {
        match key {
            KeyValue::Int(i) => Value::Int(i),
            KeyValue::Str(s) => Value::Str(s),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Str(v.to_string())
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Ordered tuple of key values, unique within one class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(pub Vec<KeyValue>);

impl PrimaryKey {
    pub fn new(parts: impl IntoIterator<Item = KeyValue>) -> Self {
        Self(parts.into_iter().collect())
    }

    pub fn single(part: impl Into<KeyValue>) -> Self {
        Self(vec![part.into()])
    }

    pub fn parts(&self) -> &[KeyValue] {
        &self.0
    }
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

/// Process-wide identity of an entity: its class plus its primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub class: String,
    pub key: PrimaryKey,
}

impl EntityKey {
    pub fn new(class: impl Into<String>, key: PrimaryKey) -> Self {
        Self {
            class: class.into(),
            key,
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class, self.key)
    }
}
