use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::EntityKey;

/// Slot values keyed by attribute name.
pub type SlotValues = BTreeMap<String, Value>;

/// The semantic type of an attribute, argument or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Bool,
    Int,
    Float,
    String,
    /// Reference to an entity of the named class
    Entity(String),
    List(Box<SemanticType>),
}

impl SemanticType {
    /// Ordered types get less-than/greater-than search predicates.
    pub fn is_ordered(&self) -> bool {
        matches!(self, SemanticType::Int | SemanticType::Float | SemanticType::String)
    }

    /// Only string slots get a "like" predicate.
    pub fn is_text(&self) -> bool {
        matches!(self, SemanticType::String)
    }

    pub fn can_be_key(&self) -> bool {
        matches!(self, SemanticType::Int | SemanticType::String)
    }

    /// Type check a non-null value.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (SemanticType::Bool, Value::Bool(_)) => true,
            (SemanticType::Int, Value::Int(_)) => true,
            (SemanticType::Float, Value::Float(_) | Value::Int(_)) => true,
            (SemanticType::String, Value::Str(_)) => true,
            (SemanticType::Entity(class), Value::Ref(key)) => &key.class == class,
            (SemanticType::List(inner), Value::List(items)) => items.iter().all(|v| inner.accepts(v)),
            _ => false,
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticType::Bool => write!(f, "bool"),
            SemanticType::Int => write!(f, "int"),
            SemanticType::Float => write!(f, "float"),
            SemanticType::String => write!(f, "string"),
            SemanticType::Entity(class) => write!(f, "{}", class),
            SemanticType::List(inner) => write!(f, "[{}]", inner),
        }
    }
}

/// A slot, argument or return value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Ref(EntityKey),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Orders two values of comparable kinds; `None` for mixed kinds.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<EntityKey> for Value {
    fn from(v: EntityKey) -> Self {
        Value::Ref(v)
    }
}
