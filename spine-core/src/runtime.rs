//! High-level entry point that wires the class registry, object cache,
//! lock registry, sessions and sweepers around pluggable storage.
//! Transports delegate to this.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{Authorizer, Operator};
use crate::builder::{BuiltClass, ClassBuilder, ClassRegistry};
use crate::cache::ObjectCache;
use crate::config::Config;
use crate::error::{SpineError, SpineResult};
use crate::idl::{self, InterfaceDescription};
use crate::infrastructure::{AuthSource, Store};
use crate::infrastructure_in_memory::InMemoryStore;
use crate::lock::LockRegistry;
use crate::session::{Session, SessionRegistry};
use crate::sweeper::SweeperHandle;

/// State shared by every session and transaction of one runtime.
pub(crate) struct Core {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) auth_source: Arc<dyn AuthSource>,
    pub(crate) classes: ClassRegistry,
    pub(crate) cache: ObjectCache,
    pub(crate) locks: LockRegistry,
    pub(crate) authorizer: Authorizer,
}

/// Login request. `timeout` overrides the configured session timeout,
/// capped by the configured maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default, with = "opt_secs")]
    pub timeout: Option<Duration>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_secs()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// The main entry point for serving entities. Owns the shared core, the
/// session table and the background sweepers.
pub struct Spine {
    config: Config,
    core: Arc<Core>,
    sessions: Arc<SessionRegistry>,
    sweepers: Mutex<Vec<SweeperHandle>>,
}

impl Spine {
    /// A runtime over separate entity and authorization backends.
    pub fn new(config: Config, store: Arc<dyn Store>, auth_source: Arc<dyn AuthSource>) -> Self {
        let core = Core {
            store,
            auth_source,
            classes: ClassRegistry::new(),
            cache: ObjectCache::new(config.cache_shards),
            locks: LockRegistry::new(config.lock_timeout),
            authorizer: Authorizer::new(),
        };
        Self {
            config,
            core: Arc::new(core),
            sessions: Arc::new(SessionRegistry::new()),
            sweepers: Mutex::new(Vec::new()),
        }
    }

    /// A runtime whose entities and authorization data live in one backend.
    pub fn with_backend<B>(config: Config, backend: Arc<B>) -> Self
    where
        B: Store + AuthSource + 'static,
    {
        Self::new(config, backend.clone(), backend)
    }

    /// A runtime over a fresh in-memory store, returned for seeding.
    pub fn in_memory(config: Config) -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (Self::with_backend(config, store.clone()), store)
    }

    /// A runtime backed by SQLite at the given path.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(config: Config, path: &str) -> SpineResult<Self> {
        let store = crate::infrastructure_sqlite::SqliteStore::open(path)?;
        Ok(Self::with_backend(config, Arc::new(store)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.core.cache
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.core.locks
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Builds and registers a class. Idempotent for identical models.
    pub fn register(&self, builder: ClassBuilder) -> SpineResult<Arc<BuiltClass>> {
        self.core.classes.register(builder)
    }

    pub fn class(&self, name: &str) -> SpineResult<Arc<BuiltClass>> {
        self.core.classes.get(name)
    }

    pub fn classes(&self) -> Vec<Arc<BuiltClass>> {
        self.core.classes.all()
    }

    /// Authenticates and opens a session.
    pub fn login(&self, credentials: &Credentials) -> SpineResult<Arc<Session>> {
        let principal = self
            .core
            .auth_source
            .authenticate(&credentials.username, &credentials.password)?
            .ok_or_else(|| {
                tracing::warn!(username = %credentials.username, "login failed");
                SpineError::Authentication {
                    username: credentials.username.clone(),
                }
            })?;
        let timeout = self.config.clamp_session_timeout(credentials.timeout);
        let session = Arc::new(Session::new(self.core.clone(), Operator::new(principal), timeout));
        self.sessions.insert(session.clone());
        tracing::info!(
            session_id = %session.id(),
            operator = %session.operator().principal(),
            timeout_secs = timeout.as_secs(),
            "session opened"
        );
        Ok(session)
    }

    /// Looks up a live session and refreshes its deadline.
    pub fn session(&self, id: &str) -> SpineResult<Arc<Session>> {
        self.sessions.get(id)
    }

    /// Rolls back the session's open transactions and closes it.
    pub fn logout(&self, id: &str) -> SpineResult<()> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SpineError::SessionExpired { id: id.to_string() })
    }

    /// Force-releases idle locks and drops dead cache entries.
    pub fn sweep_locks(&self, now: Instant) -> usize {
        sweep_locks(&self.core, now)
    }

    /// Logs out idle sessions.
    pub fn sweep_sessions(&self, now: Instant) -> usize {
        self.sessions.sweep(now)
    }

    /// Starts the lock and session sweepers. Calling it twice is a no-op.
    pub fn start_sweepers(&self) -> std::io::Result<()> {
        let mut sweepers = self.sweepers.lock();
        if !sweepers.is_empty() {
            return Ok(());
        }
        let core = self.core.clone();
        sweepers.push(SweeperHandle::spawn("locks", self.config.sweep_interval, move |now| {
            sweep_locks(&core, now);
        })?);
        let sessions = self.sessions.clone();
        sweepers.push(SweeperHandle::spawn(
            "sessions",
            self.config.sweep_interval,
            move |now| {
                sessions.sweep(now);
            },
        )?);
        Ok(())
    }

    pub fn stop_sweepers(&self) {
        let sweepers = std::mem::take(&mut *self.sweepers.lock());
        for sweeper in sweepers {
            sweeper.stop();
        }
    }

    /// Structured description of every registered class.
    pub fn interface(&self, module: &str) -> InterfaceDescription {
        idl::describe(module, &self.classes())
    }

    /// IDL source for every registered class.
    pub fn interface_idl(&self, module: &str, docs: bool) -> String {
        idl::render_idl(&self.interface(module), docs)
    }
}

impl Drop for Spine {
    fn drop(&mut self) {
        self.stop_sweepers();
    }
}

fn sweep_locks(core: &Core, now: Instant) -> usize {
    let reclaimed = core.locks.sweep(now);
    let purged = core.cache.purge();
    if purged > 0 {
        tracing::debug!(purged, "dead cache entries dropped");
    }
    reclaimed
}
