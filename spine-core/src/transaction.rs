//! Units of work over cached entities.
//!
//! Every entity access goes through the lock registry and is recorded with
//! the strongest mode taken. Commit hands every write-held entity's change
//! to the store in one atomic `apply`; rollback discards them. Both close
//! the transaction for good.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::Operator;
use crate::builder::{BuiltClass, DumpQuery, DumpRow, Method, SearchQuery};
use crate::entity::Entity;
use crate::error::{SpineError, SpineResult};
use crate::lock::{LockHolder, LockMode};
use crate::runtime::Core;
use crate::types::{EntityKey, PrimaryKey, SlotValues, Value};

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

/// Shared flag that makes a transaction's next operation fail with
/// [`SpineError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

struct TxInner {
    state: TransactionState,
    held: HashMap<EntityKey, (Arc<Entity>, LockMode)>,
    /// Entities created by this transaction, deleted again on rollback
    created: Vec<Arc<Entity>>,
}

pub struct Transaction {
    id: u32,
    core: Arc<Core>,
    operator: Arc<Operator>,
    holder: Arc<LockHolder>,
    cancel: CancelToken,
    inner: Mutex<TxInner>,
}

impl Transaction {
    pub(crate) fn begin(id: u32, core: Arc<Core>, operator: Arc<Operator>) -> Self {
        let holder = Arc::new(LockHolder::new(NEXT_HOLDER.fetch_add(1, Ordering::Relaxed)));
        tracing::debug!(tx = id, holder = holder.id(), operator = %operator.principal(), "transaction opened");
        Self {
            id,
            core,
            operator,
            holder,
            cancel: CancelToken::new(),
            inner: Mutex::new(TxInner {
                state: TransactionState::Open,
                held: HashMap::new(),
                created: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Entities whose locks the sweeper reclaimed from this transaction.
    pub fn lost_locks(&self) -> Vec<EntityKey> {
        self.holder.lost_locks()
    }

    /// Entities currently recorded with the strongest mode taken.
    pub fn held(&self) -> Vec<(EntityKey, LockMode)> {
        let mut held: Vec<_> = self
            .inner
            .lock()
            .held
            .iter()
            .map(|(key, (_, mode))| (key.clone(), *mode))
            .collect();
        held.sort();
        held
    }

    fn closed(&self) -> SpineError {
        SpineError::TransactionClosed { id: self.id }
    }

    /// Fails unless the transaction is open, uncancelled and still owns
    /// every lock it took.
    fn check(&self) -> SpineResult<()> {
        if self.inner.lock().state != TransactionState::Open {
            return Err(self.closed());
        }
        if self.cancel.is_cancelled() {
            return Err(SpineError::Cancelled);
        }
        if let Some(entity) = self.holder.first_lost() {
            return Err(SpineError::LostLock { id: self.id, entity });
        }
        Ok(())
    }

    fn lock(&self, entity: &Arc<Entity>, mode: LockMode) -> SpineResult<()> {
        if entity.is_deleted() {
            return Err(SpineError::ObjectDeleted {
                entity: entity.entity_key().clone(),
            });
        }
        match mode {
            LockMode::Read => self.core.locks.acquire_read(entity, &self.holder)?,
            LockMode::Write => self.core.locks.acquire_write(entity, &self.holder)?,
        }
        self.record(entity, mode)?;
        self.ensure_live(entity)
    }

    /// A pending delete counts as deleted only for the transaction that
    /// holds the entity's write lock. Everyone else goes on to the lock step.
    fn ensure_live(&self, entity: &Entity) -> SpineResult<()> {
        let deleted = entity.is_deleted()
            || (entity.is_pending_delete()
                && self.core.locks.holds(entity, &self.holder, LockMode::Write));
        if deleted {
            return Err(SpineError::ObjectDeleted {
                entity: entity.entity_key().clone(),
            });
        }
        Ok(())
    }

    fn record(&self, entity: &Arc<Entity>, mode: LockMode) -> SpineResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            // closed while we were acquiring
            drop(inner);
            self.core.locks.release(entity, &self.holder, true);
            return Err(self.closed());
        }
        let entry = inner
            .held
            .entry(entity.entity_key().clone())
            .or_insert_with(|| (entity.clone(), mode));
        if mode == LockMode::Write {
            entry.1 = LockMode::Write;
        }
        Ok(())
    }

    fn authorize(&self, class: &BuiltClass, action: &str, target: Option<&EntityKey>) -> SpineResult<()> {
        let operation = format!("{}.{}", class.name(), action);
        self.core
            .authorizer
            .require(self.core.auth_source.as_ref(), &self.operator, &operation, target)
    }

    /// The live instance for `key`, loaded from the store if not cached.
    pub fn fetch(&self, class: &str, key: PrimaryKey) -> SpineResult<Arc<Entity>> {
        self.check()?;
        let class = self.core.classes.get(class)?;
        class.model().check_key(&key)?;
        let entity_key = EntityKey::new(class.name(), key.clone());
        let store = self.core.store.clone();
        let entity = self.core.cache.get_or_create(&entity_key, || {
            let values = store.load(class.model(), &key)?;
            Ok(Entity::loaded(class.clone(), key, &values))
        })?;
        self.ensure_live(&entity)?;
        Ok(entity)
    }

    /// A handle for `key` that defers the store read until a slot is read.
    /// Missing entities surface as [`SpineError::NotFound`] on first read.
    pub fn reference(&self, class: &str, key: PrimaryKey) -> SpineResult<Arc<Entity>> {
        self.check()?;
        let class = self.core.classes.get(class)?;
        class.model().check_key(&key)?;
        let entity_key = EntityKey::new(class.name(), key.clone());
        self.core
            .cache
            .get_or_create(&entity_key, || Ok(Entity::unloaded(class.clone(), key)))
    }

    /// Reads an attribute under a read lock. Key attributes need no lock.
    pub fn get(&self, entity: &Arc<Entity>, attribute: &str) -> SpineResult<Value> {
        self.check()?;
        let model = entity.class().model();
        if let Some(i) = model.primary_index(attribute) {
            self.ensure_live(entity)?;
            return Ok(key_part(entity, i));
        }
        let slot = model.slot_index(attribute).ok_or_else(|| {
            SpineError::invalid(format!("class '{}' has no attribute '{}'", model.name, attribute))
        })?;
        self.read_slot(entity, slot)
    }

    fn read_slot(&self, entity: &Arc<Entity>, slot: usize) -> SpineResult<Value> {
        self.lock(entity, LockMode::Read)?;
        entity.read(slot, self.core.store.as_ref())
    }

    /// Writes a writable slot under the write lock. The value stays in the
    /// entity's dirty overlay until commit.
    pub fn set(&self, entity: &Arc<Entity>, attribute: &str, value: Value) -> SpineResult<()> {
        self.check()?;
        let class = entity.class();
        let model = class.model();
        let Some(attr) = model.attribute(attribute) else {
            return Err(SpineError::invalid(format!(
                "class '{}' has no attribute '{}'",
                model.name, attribute
            )));
        };
        let slot = match model.slot_index(attribute) {
            Some(slot) if attr.writable => slot,
            _ => {
                return Err(SpineError::ImmutableAttribute {
                    class: model.name.clone(),
                    attribute: attribute.to_string(),
                })
            }
        };
        self.write_slot(entity, slot, value)
    }

    fn write_slot(&self, entity: &Arc<Entity>, slot: usize, value: Value) -> SpineResult<()> {
        let class = entity.class();
        let attr = &class.model().slots[slot];
        if !attr.check(&value) {
            return Err(SpineError::invalid(format!(
                "attribute '{}' of class '{}' expects {}",
                attr.name,
                class.name(),
                attr.ty
            )));
        }
        self.authorize(class, &attr.setter_name(), Some(entity.entity_key()))?;
        self.lock(entity, LockMode::Write)?;
        entity.write(slot, value);
        Ok(())
    }

    /// Calls a generated method by name.
    pub fn invoke(&self, entity: &Arc<Entity>, method: &str, args: &[Value]) -> SpineResult<Value> {
        self.check()?;
        let class = entity.class().clone();
        let resolved = class.resolve(method)?;
        let arity = match resolved {
            Method::GetKey(_) | Method::Get(_) => 0,
            Method::Set(_) => 1,
            Method::Operation(i) => class.model().operations[i].args.len(),
        };
        if args.len() != arity {
            return Err(SpineError::invalid(format!(
                "{}.{} takes {} argument(s), got {}",
                class.name(),
                method,
                arity,
                args.len()
            )));
        }

        match resolved {
            Method::GetKey(i) => {
                self.ensure_live(entity)?;
                Ok(key_part(entity, i))
            }
            Method::Get(slot) => self.read_slot(entity, slot),
            Method::Set(slot) => {
                self.write_slot(entity, slot, args[0].clone())?;
                Ok(Value::Null)
            }
            Method::Operation(i) => {
                let op = &class.model().operations[i];
                for (arg, value) in op.args.iter().zip(args) {
                    if !arg.ty.accepts(value) {
                        return Err(SpineError::invalid(format!(
                            "argument '{}' of {}.{} expects {}",
                            arg.name,
                            class.name(),
                            op.name,
                            arg.ty
                        )));
                    }
                }
                if op.writes {
                    self.authorize(&class, &op.name, Some(entity.entity_key()))?;
                    self.lock(entity, LockMode::Write)?;
                } else {
                    self.lock(entity, LockMode::Read)?;
                }
                let handler = class.handler(i).clone();
                handler(self, entity, args)
            }
        }
    }

    /// Inserts a new entity right away and returns it write-locked by this
    /// transaction. Rolling back deletes it again.
    pub fn create(&self, class: &str, initial: SlotValues) -> SpineResult<Arc<Entity>> {
        self.check()?;
        let class = self.core.classes.get(class)?;
        let model = class.model();
        for (name, value) in &initial {
            let attr = model.attribute(name).ok_or_else(|| {
                SpineError::invalid(format!("class '{}' has no attribute '{}'", model.name, name))
            })?;
            if !attr.check(value) {
                return Err(SpineError::invalid(format!(
                    "attribute '{}' of class '{}' expects {}",
                    name, model.name, attr.ty
                )));
            }
        }
        if let Some(missing) = model
            .slots
            .iter()
            .find(|slot| !slot.optional && initial.get(&slot.name).is_none_or(Value::is_null))
        {
            return Err(SpineError::invalid(format!(
                "attribute '{}' of class '{}' is required",
                missing.name, model.name
            )));
        }
        self.authorize(&class, "create", None)?;

        let key = self.core.store.create(model, &initial)?;
        let entity_key = EntityKey::new(class.name(), key.clone());
        let entity = self
            .core
            .cache
            .get_or_create(&entity_key, || Ok(Entity::loaded(class.clone(), key, &initial)))?;
        if let Err(err) = self.lock(&entity, LockMode::Write) {
            // a stale handle for the new key is locked elsewhere
            if let Err(undo) = self.core.store.delete(model, entity.key()) {
                tracing::warn!(tx = self.id, entity = %entity_key, error = %undo, "could not undo create");
            }
            return Err(err);
        }
        self.inner.lock().created.push(entity.clone());
        tracing::debug!(tx = self.id, entity = %entity_key, "entity created");
        Ok(entity)
    }

    /// Marks the entity for deletion at commit. Until then only this
    /// transaction sees it as deleted; others find it write-locked.
    pub fn delete(&self, entity: &Arc<Entity>) -> SpineResult<()> {
        self.check()?;
        self.ensure_live(entity)?;
        self.authorize(entity.class(), "delete", Some(entity.entity_key()))?;
        self.lock(entity, LockMode::Write)?;
        entity.set_pending_delete();
        Ok(())
    }

    /// Keys of the committed entities matching every predicate of `query`.
    pub fn search(&self, query: &SearchQuery) -> SpineResult<Vec<PrimaryKey>> {
        self.check()?;
        let keys = self
            .core
            .store
            .search(query.class().model(), query.predicates())?;
        Ok(keys)
    }

    /// Every slot of each requested entity, read under read locks.
    pub fn dump(&self, query: &DumpQuery) -> SpineResult<Vec<DumpRow>> {
        self.check()?;
        let mut rows = Vec::with_capacity(query.keys().len());
        for key in query.keys() {
            let entity = self.fetch(query.class().name(), key.clone())?;
            self.lock(&entity, LockMode::Read)?;
            rows.push(DumpRow {
                key: key.clone(),
                values: entity.read_all(self.core.store.as_ref())?,
            });
        }
        Ok(rows)
    }

    /// Persists every write-held entity atomically, then releases all locks.
    /// On store failure the transaction stays open with its locks held.
    ///
    /// The holder is pinned for the whole commit, so the lock sweeper cannot
    /// reclaim an entity between the store write and the cache update.
    pub fn commit(&self) -> SpineResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return Err(self.closed());
        }
        if self.cancel.is_cancelled() {
            return Err(SpineError::Cancelled);
        }
        if let Err(entity) = self.holder.begin_commit() {
            return Err(SpineError::LostLock { id: self.id, entity });
        }
        let result = self.commit_pinned(&mut inner);
        self.holder.end_commit();
        result
    }

    fn commit_pinned(&self, inner: &mut TxInner) -> SpineResult<()> {
        let writes: Vec<Arc<Entity>> = inner
            .held
            .values()
            .filter(|(_, mode)| *mode == LockMode::Write)
            .map(|(entity, _)| entity.clone())
            .collect();
        if let Some(entity) = writes
            .iter()
            .find(|e| !self.core.locks.holds(e, &self.holder, LockMode::Write))
        {
            return Err(SpineError::LostLock {
                id: self.id,
                entity: entity.entity_key().clone(),
            });
        }
        let changes: Vec<_> = writes.iter().filter_map(|e| e.pending_change()).collect();

        if !changes.is_empty() {
            if let Err(err) = self.core.store.apply(&changes) {
                tracing::warn!(tx = self.id, error = %err, "commit failed, locks retained");
                return Err(SpineError::Commit {
                    reason: err.to_string(),
                });
            }
        }
        debug_assert!(self.holder.first_lost().is_none(), "pinned holder lost a lock");

        for entity in &writes {
            let deleting = entity.is_pending_delete();
            entity.commit_changes();
            if deleting {
                self.core.cache.invalidate(entity.entity_key());
            }
        }
        for (entity, _) in inner.held.values() {
            self.core.locks.release(entity, &self.holder, false);
        }
        inner.held.clear();
        inner.created.clear();
        inner.state = TransactionState::Committed;

        tracing::debug!(tx = self.id, changes = changes.len(), "transaction committed");
        Ok(())
    }

    /// Discards every uncommitted write, deletes entities created by this
    /// transaction and releases all locks. Created entities are removed
    /// while still write-locked.
    pub fn rollback(&self) -> SpineResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return Err(self.closed());
        }
        for entity in &inner.created {
            if let Err(err) = self.core.store.delete(entity.class().model(), entity.key()) {
                tracing::warn!(tx = self.id, entity = %entity.entity_key(), error = %err, "could not undo create");
            }
            self.core.cache.invalidate(entity.entity_key());
        }
        for (entity, _) in inner.held.values() {
            self.core.locks.release(entity, &self.holder, true);
        }
        inner.held.clear();
        inner.created.clear();
        inner.state = TransactionState::RolledBack;
        drop(inner);

        self.holder.clear_lost();
        tracing::debug!(tx = self.id, "transaction rolled back");
        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("holder", &self.holder.id())
            .field("state", &self.state())
            .finish()
    }
}

fn key_part(entity: &Entity, i: usize) -> Value {
    entity
        .key()
        .parts()
        .get(i)
        .cloned()
        .map(Value::from)
        .unwrap_or_default()
}
