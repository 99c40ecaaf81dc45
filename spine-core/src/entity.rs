use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::builder::BuiltClass;
use crate::error::SpineResult;
use crate::infrastructure::{Change, Store};
use crate::lock::LockCell;
use crate::types::{EntityKey, PrimaryKey, SlotValues, Value};

/// A live, cached instance of a built class.
///
/// Slot values are either populated at construction or loaded from the
/// store on first read. Writes go to a dirty overlay owned by the current
/// write-lock holder until commit or rollback.
pub struct Entity {
    class: Arc<BuiltClass>,
    key: EntityKey,
    data: Mutex<EntityData>,
    pub(crate) lock: Mutex<LockCell>,
    deleted: AtomicBool,
}

struct EntityData {
    /// `None` until loaded
    committed: Option<Vec<Value>>,
    dirty: BTreeMap<usize, Value>,
    pending_delete: bool,
}

impl Entity {
    /// An entity whose slots are fetched on first read.
    pub(crate) fn unloaded(class: Arc<BuiltClass>, key: PrimaryKey) -> Self {
        Self::with_data(class, key, None)
    }

    /// An entity populated from already fetched values.
    pub(crate) fn loaded(class: Arc<BuiltClass>, key: PrimaryKey, values: &SlotValues) -> Self {
        let committed = slot_vector(&class, values);
        Self::with_data(class, key, Some(committed))
    }

    fn with_data(class: Arc<BuiltClass>, key: PrimaryKey, committed: Option<Vec<Value>>) -> Self {
        Self {
            key: EntityKey::new(class.name(), key),
            class,
            data: Mutex::new(EntityData {
                committed,
                dirty: BTreeMap::new(),
                pending_delete: false,
            }),
            lock: Mutex::new(LockCell::default()),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn class(&self) -> &Arc<BuiltClass> {
        &self.class
    }

    pub fn key(&self) -> &PrimaryKey {
        &self.key.key
    }

    pub fn entity_key(&self) -> &EntityKey {
        &self.key
    }

    pub fn is_loaded(&self) -> bool {
        self.data.lock().committed.is_some()
    }

    /// Deleted and committed, or invalidated from the cache.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Current value of a slot: the dirty value if any, else the committed one.
    pub(crate) fn read(&self, slot: usize, store: &dyn Store) -> SpineResult<Value> {
        let mut data = self.data.lock();
        if let Some(value) = data.dirty.get(&slot) {
            return Ok(value.clone());
        }
        let committed = self.load_into(&mut data, store)?;
        Ok(committed.get(slot).cloned().unwrap_or_default())
    }

    /// Every slot, dirty values overlaid.
    pub(crate) fn read_all(&self, store: &dyn Store) -> SpineResult<SlotValues> {
        let mut data = self.data.lock();
        let mut values = self.load_into(&mut data, store)?.clone();
        for (slot, value) in &data.dirty {
            values[*slot] = value.clone();
        }
        Ok(self
            .class
            .model()
            .slots
            .iter()
            .zip(values)
            .map(|(attr, value)| (attr.name.clone(), value))
            .collect())
    }

    fn load_into<'a>(&self, data: &'a mut EntityData, store: &dyn Store) -> SpineResult<&'a Vec<Value>> {
        if data.committed.is_none() {
            let values = store.load(self.class.model(), &self.key.key)?;
            tracing::trace!(entity = %self.key, "slots loaded");
            data.committed = Some(slot_vector(&self.class, &values));
        }
        Ok(data.committed.get_or_insert_with(Vec::new))
    }

    pub(crate) fn write(&self, slot: usize, value: Value) {
        self.data.lock().dirty.insert(slot, value);
    }

    pub fn is_dirty(&self) -> bool {
        let data = self.data.lock();
        !data.dirty.is_empty() || data.pending_delete
    }

    pub(crate) fn set_pending_delete(&self) {
        self.data.lock().pending_delete = true;
    }

    pub(crate) fn is_pending_delete(&self) -> bool {
        self.data.lock().pending_delete
    }

    /// The store change needed to persist this entity's dirty state.
    pub(crate) fn pending_change(&self) -> Option<Change> {
        let data = self.data.lock();
        if data.pending_delete {
            return Some(Change::Delete {
                class: self.key.class.clone(),
                key: self.key.key.clone(),
            });
        }
        if data.dirty.is_empty() {
            return None;
        }
        let slots = self.class.model().slots.as_slice();
        Some(Change::Update {
            class: self.key.class.clone(),
            key: self.key.key.clone(),
            slots: data
                .dirty
                .iter()
                .map(|(i, v)| (slots[*i].name.clone(), v.clone()))
                .collect(),
        })
    }

    /// Folds the dirty overlay into the committed values.
    pub(crate) fn commit_changes(&self) {
        let mut data = self.data.lock();
        let dirty = std::mem::take(&mut data.dirty);
        if let Some(committed) = data.committed.as_mut() {
            for (slot, value) in dirty {
                committed[slot] = value;
            }
        }
        if data.pending_delete {
            data.pending_delete = false;
            self.mark_deleted();
        }
    }

    /// Drops uncommitted writes and a pending delete. Returns whether
    /// anything was discarded.
    pub(crate) fn discard_changes(&self) -> bool {
        let mut data = self.data.lock();
        let had = !data.dirty.is_empty() || data.pending_delete;
        data.dirty.clear();
        data.pending_delete = false;
        had
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("key", &self.key)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

fn slot_vector(class: &BuiltClass, values: &SlotValues) -> Vec<Value> {
    class
        .model()
        .slots
        .iter()
        .map(|attr| values.get(&attr.name).cloned().unwrap_or_default())
        .collect()
}
