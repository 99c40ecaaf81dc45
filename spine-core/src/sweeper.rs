//! Deadline tables and the background loops that reclaim idle resources.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A `(resource, deadline)` registry guarded by a single mutex.
///
/// Callers refresh deadlines on every access; the sweeper drains expired
/// entries under the mutex and reclaims them after it has been released,
/// so slow reclamation never blocks callers touching the table.
pub struct DeadlineTable<K, R> {
    entries: Mutex<HashMap<K, (R, Instant)>>,
}

impl<K: Eq + Hash + Clone, R> DeadlineTable<K, R> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or refreshes an entry.
    pub fn touch(&self, key: K, resource: R, deadline: Instant) {
        self.entries.lock().insert(key, (resource, deadline));
    }

    pub fn remove(&self, key: &K) -> Option<R> {
        self.entries.lock().remove(key).map(|(r, _)| r)
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.entries.lock().get(key).map(|(_, d)| *d)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes and returns every entry whose deadline is at or before `now`.
    pub fn drain_expired(&self, now: Instant) -> Vec<(K, R)> {
        let mut entries = self.entries.lock();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| entries.remove_entry(&k).map(|(k, (r, _))| (k, r)))
            .collect()
    }
}

impl<K: Eq + Hash + Clone, R> Default for DeadlineTable<K, R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running background sweeper. Dropping it stops the loop.
pub struct SweeperHandle {
    name: String,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Runs `sweep` every `interval` on a dedicated thread until stopped.
    pub fn spawn<F>(name: &str, interval: Duration, sweep: F) -> std::io::Result<Self>
    where
        F: Fn(Instant) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("spine-{}", name))
            .spawn(move || {
                tracing::info!(sweeper = %thread_name, ?interval, "sweeper started");
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => sweep(Instant::now()),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!(sweeper = %thread_name, "sweeper stopped");
            })?;
        Ok(Self {
            name: name.to_string(),
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the loop and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(sweeper = %self.name, "sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
