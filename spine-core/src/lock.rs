//! Pessimistic per-entity read/write locks held by transactions.
//!
//! Acquisition never queues: a conflicting request fails immediately with
//! [`SpineError::Locked`]. Every successful acquire refreshes the entity's
//! deadline in the lock sweeper table; the sweeper calls
//! [`LockRegistry::sweep`], which force-releases idle locks.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::entity::Entity;
use crate::error::{SpineError, SpineResult};
use crate::sweeper::DeadlineTable;
use crate::types::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    fn to_index(self) -> usize {
        match self {
            LockMode::Read => 0,
            LockMode::Write => 1,
        }
    }

    /// Rows: mode held by another transaction. Cols: mode requested.
    /// True = compatible.
    #[rustfmt::skip]
    const MATRIX: [[bool; 2]; 2] = [
        //          Read   Write
        /* Read  */ [true,  false],
        /* Write */ [false, false],
    ];

    /// Whether `requesting` can be granted while another transaction holds `held`.
    pub fn compatible(held: LockMode, requesting: LockMode) -> bool {
        Self::MATRIX[held.to_index()][requesting.to_index()]
    }
}

/// The lock-side identity of a transaction.
///
/// Forced releases record the reclaimed entity here so the owning
/// transaction fails on its next use. While a commit is in progress the
/// holder is pinned and forced releases leave its locks alone.
#[derive(Debug)]
pub struct LockHolder {
    id: u64,
    state: Mutex<HolderState>,
}

#[derive(Debug, Default)]
struct HolderState {
    lost: Vec<EntityKey>,
    committing: bool,
}

impl LockHolder {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(HolderState::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lost_locks(&self) -> Vec<EntityKey> {
        self.state.lock().lost.clone()
    }

    pub fn is_committing(&self) -> bool {
        self.state.lock().committing
    }

    pub(crate) fn first_lost(&self) -> Option<EntityKey> {
        self.state.lock().lost.first().cloned()
    }

    pub(crate) fn clear_lost(&self) {
        self.state.lock().lost.clear();
    }

    /// Pins every lock of this holder against forced release. Fails with
    /// the first reclaimed entity if any lock was already lost.
    pub(crate) fn begin_commit(&self) -> Result<(), EntityKey> {
        let mut state = self.state.lock();
        if let Some(entity) = state.lost.first() {
            return Err(entity.clone());
        }
        state.committing = true;
        Ok(())
    }

    pub(crate) fn end_commit(&self) {
        self.state.lock().committing = false;
    }

    /// Records `entity` as lost unless the holder is pinned.
    fn reclaim(&self, entity: &EntityKey) -> bool {
        let mut state = self.state.lock();
        if state.committing {
            return false;
        }
        state.lost.push(entity.clone());
        true
    }
}

#[derive(Debug, Default)]
pub(crate) enum LockState {
    #[default]
    Unlocked,
    Read(Vec<Arc<LockHolder>>),
    Write(Arc<LockHolder>),
}

/// Lock state stored inside each entity.
#[derive(Debug)]
pub(crate) struct LockCell {
    pub(crate) state: LockState,
    pub(crate) touched: Instant,
}

impl Default for LockCell {
    fn default() -> Self {
        Self {
            state: LockState::Unlocked,
            touched: Instant::now(),
        }
    }
}

/// Snapshot of an entity's lock, by holder id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Read(Vec<u64>),
    Write(u64),
}

pub struct LockRegistry {
    timeout: Duration,
    deadlines: DeadlineTable<EntityKey, Arc<Entity>>,
}

impl LockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadlines: DeadlineTable::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of entities currently tracked by the lock sweeper.
    pub fn tracked(&self) -> usize {
        self.deadlines.len()
    }

    pub fn acquire_read(&self, entity: &Arc<Entity>, holder: &Arc<LockHolder>) -> SpineResult<()> {
        self.acquire(entity, holder, LockMode::Read)
    }

    pub fn acquire_write(&self, entity: &Arc<Entity>, holder: &Arc<LockHolder>) -> SpineResult<()> {
        self.acquire(entity, holder, LockMode::Write)
    }

    fn acquire(&self, entity: &Arc<Entity>, holder: &Arc<LockHolder>, mode: LockMode) -> SpineResult<()> {
        let mut cell = entity.lock.lock();
        let next = match std::mem::take(&mut cell.state) {
            LockState::Unlocked => match mode {
                LockMode::Read => LockState::Read(vec![holder.clone()]),
                LockMode::Write => LockState::Write(holder.clone()),
            },
            LockState::Write(w) if w.id == holder.id => LockState::Write(w),
            LockState::Write(w) => {
                cell.state = LockState::Write(w);
                return Err(locked(entity, LockMode::Write));
            }
            LockState::Read(mut readers) => {
                let others = readers.iter().any(|r| r.id != holder.id);
                if others && !LockMode::compatible(LockMode::Read, mode) {
                    cell.state = LockState::Read(readers);
                    return Err(locked(entity, LockMode::Read));
                }
                match mode {
                    // sole reader upgrades in place
                    LockMode::Write => LockState::Write(holder.clone()),
                    LockMode::Read => {
                        if !readers.iter().any(|r| r.id == holder.id) {
                            readers.push(holder.clone());
                        }
                        LockState::Read(readers)
                    }
                }
            }
        };
        cell.state = next;
        let now = Instant::now();
        cell.touched = now;
        drop(cell);

        self.deadlines
            .touch(entity.entity_key().clone(), entity.clone(), now + self.timeout);
        tracing::trace!(entity = %entity.entity_key(), holder = holder.id, ?mode, "lock acquired");
        Ok(())
    }

    /// Releases `holder`'s claim on the entity. Idempotent. When `discard`
    /// is set and the holder was the writer, dirty slots are dropped under
    /// the same critical section.
    pub fn release(&self, entity: &Arc<Entity>, holder: &LockHolder, discard: bool) -> bool {
        let mut cell = entity.lock.lock();
        let released = match std::mem::take(&mut cell.state) {
            LockState::Unlocked => false,
            LockState::Write(w) if w.id == holder.id => {
                if discard {
                    entity.discard_changes();
                }
                true
            }
            LockState::Write(w) => {
                cell.state = LockState::Write(w);
                false
            }
            LockState::Read(mut readers) => {
                let before = readers.len();
                readers.retain(|r| r.id != holder.id);
                let released = readers.len() != before;
                if !readers.is_empty() {
                    cell.state = LockState::Read(readers);
                }
                released
            }
        };
        let unlocked = matches!(cell.state, LockState::Unlocked);
        if released {
            cell.touched = Instant::now();
        }
        drop(cell);

        if unlocked {
            self.deadlines.remove(entity.entity_key());
        } else if released {
            self.deadlines
                .touch(entity.entity_key().clone(), entity.clone(), Instant::now() + self.timeout);
        }
        released
    }

    /// Resets the entity to unlocked, discarding dirty slots of a writer.
    /// Each losing holder records the entity so its transaction fails on
    /// next use. Holders in the middle of a commit keep their claim and the
    /// deadline is pushed back. Returns the losing holders.
    pub fn force_release(&self, entity: &Arc<Entity>) -> Vec<Arc<LockHolder>> {
        let key = entity.entity_key();
        let mut cell = entity.lock.lock();
        let mut losers = Vec::new();
        match std::mem::take(&mut cell.state) {
            LockState::Unlocked => {}
            LockState::Read(readers) => {
                let (lost, kept): (Vec<_>, Vec<_>) = readers.into_iter().partition(|r| r.reclaim(key));
                losers = lost;
                if !kept.is_empty() {
                    cell.state = LockState::Read(kept);
                }
            }
            LockState::Write(w) => {
                if w.reclaim(key) {
                    if entity.discard_changes() {
                        tracing::debug!(entity = %key, "dirty slots discarded");
                    }
                    losers.push(w);
                } else {
                    cell.state = LockState::Write(w);
                }
            }
        }
        let pinned = !matches!(cell.state, LockState::Unlocked);
        let now = Instant::now();
        if pinned {
            cell.touched = now;
        }
        drop(cell);

        if pinned {
            tracing::debug!(entity = %key, "lock pinned by a commit, reclaim deferred");
            self.deadlines.touch(key.clone(), entity.clone(), now + self.timeout);
        } else {
            self.deadlines.remove(key);
        }
        if !losers.is_empty() {
            tracing::warn!(
                entity = %key,
                holders = ?losers.iter().map(|h| h.id).collect::<Vec<_>>(),
                "lock forcibly released"
            );
        }
        losers
    }

    /// Force-releases every lock idle for longer than the timeout.
    /// Returns the number of entities reclaimed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut reclaimed = 0;
        for (key, entity) in self.deadlines.drain_expired(now) {
            let touched = {
                let cell = entity.lock.lock();
                if matches!(cell.state, LockState::Unlocked) {
                    continue;
                }
                cell.touched
            };
            if touched + self.timeout > now {
                // touched after the deadline was taken
                self.deadlines.touch(key, entity, touched + self.timeout);
                continue;
            }
            if !self.force_release(&entity).is_empty() {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            tracing::info!(reclaimed, "lock sweep finished");
        }
        reclaimed
    }

    pub fn status(&self, entity: &Entity) -> LockStatus {
        match &entity.lock.lock().state {
            LockState::Unlocked => LockStatus::Unlocked,
            LockState::Read(readers) => LockStatus::Read(readers.iter().map(|r| r.id).collect()),
            LockState::Write(w) => LockStatus::Write(w.id),
        }
    }

    /// Whether `holder` currently holds the entity in at least `mode`.
    pub fn holds(&self, entity: &Entity, holder: &LockHolder, mode: LockMode) -> bool {
        match &entity.lock.lock().state {
            LockState::Unlocked => false,
            LockState::Read(readers) => {
                mode == LockMode::Read && readers.iter().any(|r| r.id == holder.id)
            }
            LockState::Write(w) => w.id == holder.id,
        }
    }
}

fn locked(entity: &Entity, held: LockMode) -> SpineError {
    SpineError::Locked {
        entity: entity.entity_key().clone(),
        held,
    }
}
