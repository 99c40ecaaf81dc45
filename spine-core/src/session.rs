//! Authenticated sessions and the table the session sweeper reclaims from.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::Operator;
use crate::error::{SpineError, SpineResult};
use crate::runtime::Core;
use crate::sweeper::DeadlineTable;
use crate::transaction::Transaction;

pub struct Session {
    id: String,
    core: Arc<Core>,
    operator: Arc<Operator>,
    timeout: Duration,
    last_access: Mutex<Instant>,
    next_tx: AtomicU32,
    transactions: Mutex<BTreeMap<u32, Arc<Transaction>>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(core: Arc<Core>, operator: Operator, timeout: Duration) -> Self {
        Self {
            id: nanoid::nanoid!(),
            core,
            operator: Arc::new(operator),
            timeout,
            last_access: Mutex::new(Instant::now()),
            next_tx: AtomicU32::new(1),
            transactions: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> SpineResult<()> {
        if self.is_closed() {
            return Err(SpineError::SessionExpired {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Refreshes the session's idle deadline.
    pub fn keep_alive(&self) -> SpineResult<()> {
        self.ensure_open()?;
        *self.last_access.lock() = Instant::now();
        Ok(())
    }

    /// Opens and tracks a new transaction. Closed transactions are forgotten.
    pub fn new_transaction(&self) -> SpineResult<Arc<Transaction>> {
        self.keep_alive()?;
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        let tx = Arc::new(Transaction::begin(id, self.core.clone(), self.operator.clone()));
        let mut transactions = self.transactions.lock();
        transactions.retain(|_, tx| tx.is_open());
        transactions.insert(id, tx.clone());
        Ok(tx)
    }

    pub fn transaction(&self, id: u32) -> SpineResult<Arc<Transaction>> {
        self.keep_alive()?;
        self.transactions
            .lock()
            .get(&id)
            .cloned()
            .ok_or(SpineError::TransactionClosed { id })
    }

    /// Ids of the transactions still open.
    pub fn open_transactions(&self) -> Vec<u32> {
        self.transactions
            .lock()
            .iter()
            .filter(|(_, tx)| tx.is_open())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Cancels and rolls back every open transaction, then closes the
    /// session. Idempotent.
    pub fn logout(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let transactions: Vec<_> = std::mem::take(&mut *self.transactions.lock())
            .into_values()
            .collect();
        let mut rolled_back = 0;
        for tx in transactions {
            tx.cancel_token().cancel();
            if tx.is_open() {
                match tx.rollback() {
                    Ok(()) => rolled_back += 1,
                    Err(err) => {
                        tracing::error!(session_id = %self.id, tx = tx.id(), error = %err, "rollback on logout failed")
                    }
                }
            }
        }
        tracing::info!(session_id = %self.id, operator = %self.operator.principal(), rolled_back, "session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("operator", self.operator.principal())
            .field("timeout", &self.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Active sessions by id, plus their idle deadlines.
#[derive(Default)]
pub struct SessionRegistry {
    active: RwLock<HashMap<String, Arc<Session>>>,
    deadlines: DeadlineTable<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        let deadline = session.last_access() + session.timeout();
        self.deadlines
            .touch(session.id().to_string(), session.clone(), deadline);
        self.active
            .write()
            .insert(session.id().to_string(), session);
    }

    /// Looks up a session and refreshes its deadline.
    pub fn get(&self, id: &str) -> SpineResult<Arc<Session>> {
        let session = self
            .active
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SpineError::SessionExpired { id: id.to_string() })?;
        session.keep_alive()?;
        self.deadlines.touch(
            id.to_string(),
            session.clone(),
            session.last_access() + session.timeout(),
        );
        Ok(session)
    }

    /// Logs the session out and forgets it.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.active.write().remove(id)?;
        self.deadlines.remove(&id.to_string());
        session.logout();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    /// Logs out every session idle past its timeout. Returns how many
    /// were reclaimed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut reclaimed = 0;
        for (id, session) in self.deadlines.drain_expired(now) {
            let deadline = session.last_access() + session.timeout();
            if deadline > now && !session.is_closed() {
                // kept alive after the deadline was taken
                self.deadlines.touch(id, session, deadline);
                continue;
            }
            self.active.write().remove(&id);
            session.logout();
            tracing::info!(session_id = %id, "session expired");
            reclaimed += 1;
        }
        reclaimed
    }
}
