//! Process-wide cache of live entities, keyed by class and primary key.
//!
//! The cache only holds weak references. An entity stays alive while a
//! transaction, a transport handle or the lock sweeper references it.
//! Construction for one key is serialized on that key's cell, so
//! concurrent callers converge on a single instance and the constructor
//! runs once. Unrelated keys only share a shard mutex for the map lookup.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::entity::Entity;
use crate::error::SpineResult;
use crate::types::EntityKey;

type Cell = Arc<Mutex<Weak<Entity>>>;

pub struct ObjectCache {
    shards: Vec<Mutex<HashMap<EntityKey, Cell>>>,
}

impl ObjectCache {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &EntityKey) -> &Mutex<HashMap<EntityKey, Cell>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// The live instance for `key`, if any.
    pub fn get(&self, key: &EntityKey) -> Option<Arc<Entity>> {
        let cell = self.shard(key).lock().get(key).cloned()?;
        let entity = cell.lock().upgrade();
        entity
    }

    /// Returns the live instance for `key`, running `constructor` only if
    /// none exists. A failing constructor leaves no entry behind.
    pub fn get_or_create<F>(&self, key: &EntityKey, constructor: F) -> SpineResult<Arc<Entity>>
    where
        F: FnOnce() -> SpineResult<Entity>,
    {
        let mut constructor = Some(constructor);
        loop {
            let cell = {
                let mut shard = self.shard(key).lock();
                shard
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Weak::new())))
                    .clone()
            };

            let mut slot = cell.lock();
            if let Some(entity) = slot.upgrade() {
                return Ok(entity);
            }
            // invalidate() may have detached this cell while we waited on it
            if !self.is_current(key, &cell) {
                continue;
            }
            let Some(construct) = constructor.take() else {
                unreachable!("constructor consumed without installing an entity");
            };
            let entity = Arc::new(construct()?);
            *slot = Arc::downgrade(&entity);
            tracing::trace!(entity = %key, "entity cached");
            return Ok(entity);
        }
    }

    fn is_current(&self, key: &EntityKey, cell: &Cell) -> bool {
        self.shard(key)
            .lock()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell))
    }

    /// Evicts the entry for `key` regardless of outstanding references and
    /// marks the instance deleted. Returns the evicted instance if it was live.
    pub fn invalidate(&self, key: &EntityKey) -> Option<Arc<Entity>> {
        let cell = self.shard(key).lock().remove(key)?;
        let entity = cell.lock().upgrade();
        if let Some(entity) = &entity {
            entity.mark_deleted();
            tracing::debug!(entity = %key, "entity invalidated");
        }
        entity
    }

    /// Drops cells whose entity has been released. Cells under construction
    /// are skipped.
    pub fn purge(&self) -> usize {
        let mut purged = 0;
        for shard in &self.shards {
            let mut map = shard.lock();
            let before = map.len();
            map.retain(|_, cell| match cell.try_lock() {
                Some(slot) => slot.strong_count() > 0,
                None => true,
            });
            purged += before - map.len();
        }
        purged
    }

    /// Number of live cached entities. Cells under construction are not counted.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|cell| cell.try_lock().is_some_and(|slot| slot.strong_count() > 0))
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
