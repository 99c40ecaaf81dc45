//! Declarative description of an entity class.
//!
//! A [`ClassModel`] lists the primary-key attributes, the readable and
//! writable slots, and the callable operations of a class. Everything else
//! (accessors, search, dump, the interface description) is derived from it
//! by [`crate::builder::ClassBuilder`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{SpineError, SpineResult};
use crate::types::{KeyValue, PrimaryKey, SemanticType, SlotValues, Value};

/// A primary-key field or a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SemanticType,
    #[serde(default)]
    pub writable: bool,
    /// Optional slots may hold `null` and may be omitted on create.
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, ty: SemanticType) -> Self {
        Self {
            name: name.into(),
            ty,
            writable: false,
            optional: false,
            doc: None,
        }
    }

    #[must_use]
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn getter_name(&self) -> String {
        format!("get_{}", self.name)
    }

    pub fn setter_name(&self) -> String {
        format!("set_{}", self.name)
    }

    /// Type check a value destined for this attribute.
    pub fn check(&self, value: &Value) -> bool {
        if value.is_null() {
            self.optional
        } else {
            self.ty.accepts(value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SemanticType,
}

/// A callable operation on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ArgumentDescriptor>,
    /// `None` for operations returning nothing.
    #[serde(default)]
    pub returns: Option<SemanticType>,
    /// Mutating operations take the write lock and are authorized.
    #[serde(default)]
    pub writes: bool,
    /// Exception names the operation may raise besides the framework ones.
    #[serde(default)]
    pub raises: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            returns: None,
            writes: false,
            raises: Vec::new(),
            doc: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, ty: SemanticType) -> Self {
        self.args.push(ArgumentDescriptor {
            name: name.into(),
            ty,
        });
        self
    }

    #[must_use]
    pub fn returns(mut self, ty: SemanticType) -> Self {
        self.returns = Some(ty);
        self
    }

    #[must_use]
    pub fn writes(mut self) -> Self {
        self.writes = true;
        self
    }

    #[must_use]
    pub fn raises(mut self, exception: impl Into<String>) -> Self {
        self.raises.push(exception.into());
        self
    }

    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Full declaration of one entity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassModel {
    pub name: String,
    pub primary: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub slots: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub operations: Vec<OperationDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl ClassModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: Vec::new(),
            slots: Vec::new(),
            operations: Vec::new(),
            doc: None,
        }
    }

    #[must_use]
    pub fn primary(mut self, attr: AttributeDescriptor) -> Self {
        self.primary.push(attr);
        self
    }

    #[must_use]
    pub fn slot(mut self, attr: AttributeDescriptor) -> Self {
        self.slots.push(attr);
        self
    }

    #[must_use]
    pub fn operation(mut self, op: OperationDescriptor) -> Self {
        self.operations.push(op);
        self
    }

    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    pub fn primary_index(&self, name: &str) -> Option<usize> {
        self.primary.iter().position(|p| p.name == name)
    }

    /// Primary-key attribute or slot with the given name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.primary
            .iter()
            .chain(self.slots.iter())
            .find(|a| a.name == name)
    }

    /// Extracts the primary key from a set of values, if every key field is present.
    pub fn key_from_values(&self, values: &SlotValues) -> Option<PrimaryKey> {
        let parts: Option<Vec<KeyValue>> = self
            .primary
            .iter()
            .map(|p| values.get(&p.name).and_then(KeyValue::from_value))
            .collect();
        parts.map(PrimaryKey)
    }

    /// Primary-key fields as slot values, for stores that keep them inline.
    pub fn key_values(&self, key: &PrimaryKey) -> SlotValues {
        self.primary
            .iter()
            .zip(key.parts())
            .map(|(attr, part)| (attr.name.clone(), Value::from(part.clone())))
            .collect()
    }

    /// Checks that a primary key has the declared arity and component types.
    pub fn check_key(&self, key: &PrimaryKey) -> SpineResult<()> {
        if key.parts().len() != self.primary.len() {
            return Err(SpineError::invalid(format!(
                "class '{}' expects a {}-part key, got '{}'",
                self.name,
                self.primary.len(),
                key
            )));
        }
        for (attr, part) in self.primary.iter().zip(key.parts()) {
            if !attr.ty.accepts(&Value::from(part.clone())) {
                return Err(SpineError::invalid(format!(
                    "key field '{}' of class '{}' must be {}",
                    attr.name, self.name, attr.ty
                )));
            }
        }
        Ok(())
    }

    /// Structural validation performed before a class is built.
    pub fn validate(&self) -> SpineResult<()> {
        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SpineError::model(&self.name, "class name must be a non-empty identifier"));
        }
        if self.primary.is_empty() {
            return Err(SpineError::model(&self.name, "at least one primary-key attribute is required"));
        }

        let mut names = HashSet::new();
        for attr in self.primary.iter().chain(self.slots.iter()) {
            if !names.insert(attr.name.as_str()) {
                return Err(SpineError::model(
                    &self.name,
                    format!("duplicate attribute '{}'", attr.name),
                ));
            }
        }
        for attr in &self.primary {
            if !attr.ty.can_be_key() {
                return Err(SpineError::model(
                    &self.name,
                    format!("primary-key attribute '{}' must be int or string", attr.name),
                ));
            }
            if attr.writable || attr.optional {
                return Err(SpineError::model(
                    &self.name,
                    format!("primary-key attribute '{}' cannot be writable or optional", attr.name),
                ));
            }
        }
        Ok(())
    }
}
