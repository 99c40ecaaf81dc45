//! Builds runtime classes from [`ClassModel`]s.
//!
//! Building resolves every generated method name (`get_<attr>`,
//! `set_<slot>`, operations) to a [`Method`] once, binds operation
//! handlers, and derives the companion search and dump types. Transports
//! dispatch by name through [`BuiltClass::resolve`], so the model, the
//! in-process surface and the interface description cannot drift apart.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::entity::Entity;
use crate::error::{SpineError, SpineResult};
use crate::model::ClassModel;
use crate::transaction::Transaction;
use crate::types::{PrimaryKey, SlotValues, Value};

/// Implementation of a declared operation.
pub type OperationHandler =
    Arc<dyn Fn(&Transaction, &Arc<Entity>, &[Value]) -> SpineResult<Value> + Send + Sync>;

/// A generated method, resolved to the attribute or operation it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Getter for a primary-key attribute
    GetKey(usize),
    /// Getter for a slot
    Get(usize),
    /// Setter for a writable slot
    Set(usize),
    /// Declared operation
    Operation(usize),
}

/// A class whose accessors, companions and handlers have been generated.
pub struct BuiltClass {
    model: ClassModel,
    methods: BTreeMap<String, Method>,
    handlers: Vec<OperationHandler>,
}

impl BuiltClass {
    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn model(&self) -> &ClassModel {
        &self.model
    }

    pub fn method(&self, name: &str) -> Option<Method> {
        self.methods.get(name).copied()
    }

    /// Generated method names in sorted order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Resolves a method name, distinguishing setters on read-only slots
    /// from names that do not exist at all.
    pub fn resolve(&self, name: &str) -> SpineResult<Method> {
        if let Some(method) = self.method(name) {
            return Ok(method);
        }
        if let Some(attr) = name.strip_prefix("set_") {
            if self.model.attribute(attr).is_some() {
                return Err(SpineError::ImmutableAttribute {
                    class: self.model.name.clone(),
                    attribute: attr.to_string(),
                });
            }
        }
        Err(SpineError::invalid(format!(
            "class '{}' has no method '{}'",
            self.model.name, name
        )))
    }

    pub(crate) fn handler(&self, op: usize) -> &OperationHandler {
        &self.handlers[op]
    }

    /// Whether calling the method requires the write lock.
    pub fn is_mutating(&self, method: Method) -> bool {
        match method {
            Method::GetKey(_) | Method::Get(_) => false,
            Method::Set(_) => true,
            Method::Operation(i) => self.model.operations[i].writes,
        }
    }
}

impl std::fmt::Debug for BuiltClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltClass")
            .field("name", &self.model.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Binds handlers to a model and produces a [`BuiltClass`].
pub struct ClassBuilder {
    model: ClassModel,
    handlers: HashMap<String, OperationHandler>,
}

impl ClassBuilder {
    pub fn new(model: ClassModel) -> Self {
        Self {
            model,
            handlers: HashMap::new(),
        }
    }

    pub fn model(&self) -> &ClassModel {
        &self.model
    }

    /// Supplies the implementation of a declared operation.
    #[must_use]
    pub fn operation<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Transaction, &Arc<Entity>, &[Value]) -> SpineResult<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn build(mut self) -> SpineResult<BuiltClass> {
        self.model.validate()?;
        let class = self.model.name.clone();
        let mut methods = BTreeMap::new();

        let mut add = |name: String, method: Method| -> SpineResult<()> {
            if methods.insert(name.clone(), method).is_some() {
                return Err(SpineError::model(&class, format!("duplicate definition of '{}'", name)));
            }
            Ok(())
        };

        for (i, attr) in self.model.primary.iter().enumerate() {
            add(attr.getter_name(), Method::GetKey(i))?;
        }
        for (i, slot) in self.model.slots.iter().enumerate() {
            add(slot.getter_name(), Method::Get(i))?;
            if slot.writable {
                add(slot.setter_name(), Method::Set(i))?;
            }
        }

        let mut handlers = Vec::with_capacity(self.model.operations.len());
        for (i, op) in self.model.operations.iter().enumerate() {
            add(op.name.clone(), Method::Operation(i))?;
            let handler = self.handlers.remove(&op.name).ok_or_else(|| {
                SpineError::model(&class, format!("operation '{}' has no handler", op.name))
            })?;
            handlers.push(handler);
        }
        if let Some(extra) = self.handlers.keys().next() {
            return Err(SpineError::model(
                &class,
                format!("handler '{}' does not match a declared operation", extra),
            ));
        }

        Ok(BuiltClass {
            model: self.model,
            methods,
            handlers,
        })
    }
}

/// Process-wide table of built classes.
#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<String, Arc<BuiltClass>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and registers a class. Registering an identical model again
    /// returns the class built the first time.
    pub fn register(&self, builder: ClassBuilder) -> SpineResult<Arc<BuiltClass>> {
        let mut classes = self.classes.write();
        if let Some(existing) = classes.get(&builder.model.name) {
            if existing.model == builder.model {
                tracing::debug!(class = %existing.name(), "class already built, skipping");
                return Ok(existing.clone());
            }
            return Err(SpineError::model(
                &builder.model.name,
                "already built from a different model",
            ));
        }
        let built = Arc::new(builder.build()?);
        tracing::debug!(class = %built.name(), methods = built.methods.len(), "class built");
        classes.insert(built.name().to_string(), built.clone());
        Ok(built)
    }

    pub fn get(&self, name: &str) -> SpineResult<Arc<BuiltClass>> {
        self.classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SpineError::invalid(format!("unknown class '{}'", name)))
    }

    /// All classes sorted by name.
    pub fn all(&self) -> Vec<Arc<BuiltClass>> {
        let mut all: Vec<_> = self.classes.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}

// ─── Search companion ───────────────────────────────────────────────────────

/// A single search condition on an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { slot: String, value: Value },
    /// Case-insensitive pattern; `*`/`%` match any run, `?` one character.
    Like { slot: String, pattern: String },
    LessThan { slot: String, value: Value },
    GreaterThan { slot: String, value: Value },
}

impl Predicate {
    pub fn slot(&self) -> &str {
        match self {
            Predicate::Eq { slot, .. }
            | Predicate::Like { slot, .. }
            | Predicate::LessThan { slot, .. }
            | Predicate::GreaterThan { slot, .. } => slot,
        }
    }

    /// Evaluates the predicate against a stored row (key fields inline).
    pub fn matches(&self, row: &SlotValues) -> bool {
        let current = row.get(self.slot()).unwrap_or(&Value::Null);
        match self {
            Predicate::Eq { value, .. } => current == value,
            Predicate::Like { pattern, .. } => {
                current.as_str().is_some_and(|text| like_matches(pattern, text))
            }
            Predicate::LessThan { value, .. } => {
                current.compare(value) == Some(std::cmp::Ordering::Less)
            }
            Predicate::GreaterThan { value, .. } => {
                current.compare(value) == Some(std::cmp::Ordering::Greater)
            }
        }
    }
}

pub(crate) fn like_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().replace('%', "*").chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Companion search type: per-attribute predicate setters plus
/// [`Transaction::search`] to run it.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    class: Arc<BuiltClass>,
    predicates: Vec<Predicate>,
}

impl SearchQuery {
    pub fn new(class: Arc<BuiltClass>) -> Self {
        Self {
            class,
            predicates: Vec::new(),
        }
    }

    pub fn class(&self) -> &Arc<BuiltClass> {
        &self.class
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn set(&mut self, slot: &str, value: impl Into<Value>) -> SpineResult<&mut Self> {
        self.add(Predicate::Eq {
            slot: slot.to_string(),
            value: value.into(),
        })
    }

    pub fn set_like(&mut self, slot: &str, pattern: impl Into<String>) -> SpineResult<&mut Self> {
        self.add(Predicate::Like {
            slot: slot.to_string(),
            pattern: pattern.into(),
        })
    }

    pub fn set_less_than(&mut self, slot: &str, value: impl Into<Value>) -> SpineResult<&mut Self> {
        self.add(Predicate::LessThan {
            slot: slot.to_string(),
            value: value.into(),
        })
    }

    pub fn set_greater_than(&mut self, slot: &str, value: impl Into<Value>) -> SpineResult<&mut Self> {
        self.add(Predicate::GreaterThan {
            slot: slot.to_string(),
            value: value.into(),
        })
    }

    /// Validates a predicate against the class model and appends it.
    pub fn add(&mut self, predicate: Predicate) -> SpineResult<&mut Self> {
        let model = self.class.model();
        let attr = model.attribute(predicate.slot()).ok_or_else(|| {
            SpineError::invalid(format!(
                "class '{}' has no attribute '{}'",
                model.name,
                predicate.slot()
            ))
        })?;
        let ok = match &predicate {
            Predicate::Eq { value, .. } => attr.check(value),
            Predicate::Like { .. } => attr.ty.is_text(),
            Predicate::LessThan { value, .. } | Predicate::GreaterThan { value, .. } => {
                attr.ty.is_ordered() && attr.ty.accepts(value)
            }
        };
        if !ok {
            return Err(SpineError::invalid(format!(
                "predicate {:?} does not apply to {} attribute '{}'",
                predicate, attr.ty, attr.name
            )));
        }
        self.predicates.push(predicate);
        Ok(self)
    }
}

// ─── Dump companion ─────────────────────────────────────────────────────────

/// Companion dump type: every slot of a set of entities in one call.
#[derive(Debug, Clone)]
pub struct DumpQuery {
    class: Arc<BuiltClass>,
    keys: Vec<PrimaryKey>,
}

impl DumpQuery {
    pub fn new(class: Arc<BuiltClass>, keys: impl IntoIterator<Item = PrimaryKey>) -> Self {
        Self {
            class,
            keys: keys.into_iter().collect(),
        }
    }

    pub fn class(&self) -> &Arc<BuiltClass> {
        &self.class
    }

    pub fn keys(&self) -> &[PrimaryKey] {
        &self.keys
    }
}

/// One row of a dump: key plus every declared slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpRow {
    pub key: PrimaryKey,
    pub values: SlotValues,
}
