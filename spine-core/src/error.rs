//! Error taxonomy shared by every component of the core.

use thiserror::Error;

use crate::infrastructure::StoreError;
use crate::lock::LockMode;
use crate::types::EntityKey;

/// Result type for core operations.
pub type SpineResult<T> = Result<T, SpineError>;

/// Errors surfaced to callers of the core and, through the transport, to clients.
#[derive(Debug, Error)]
pub enum SpineError {
    /// Write to a slot that was not declared writable.
    #[error("attribute '{attribute}' of class '{class}' is not writable")]
    ImmutableAttribute {
        /// Class declaring the slot.
        class: String,
        /// The slot name.
        attribute: String,
    },

    /// Lock unavailable. The caller may retry later.
    #[error("{entity} is {held:?}-locked by another transaction")]
    Locked {
        /// The contended entity.
        entity: EntityKey,
        /// The mode currently held by the other party.
        held: LockMode,
    },

    /// Operation on a committed or rolled back transaction.
    #[error("transaction {id} is closed")]
    TransactionClosed {
        /// Session-local transaction id.
        id: u32,
    },

    /// The lock sweeper reclaimed one of this transaction's locks.
    #[error("transaction {id} lost its lock on {entity}")]
    LostLock {
        /// Session-local transaction id.
        id: u32,
        /// First entity whose lock was reclaimed.
        entity: EntityKey,
    },

    /// Persistence failed during commit. Locks are still held.
    #[error("commit failed: {reason}")]
    Commit {
        /// Failure reported by the store.
        reason: String,
    },

    /// Permission denied.
    #[error("operator {operator} may not perform '{operation}'")]
    Authorization {
        /// Principal that attempted the operation.
        operator: EntityKey,
        /// Qualified operation name.
        operation: String,
    },

    /// Login with unknown credentials.
    #[error("authentication failed for '{username}'")]
    Authentication {
        /// Username presented at login.
        username: String,
    },

    /// No cached or stored entity for the key.
    #[error("entity not found: {entity}")]
    NotFound {
        /// The missing entity.
        entity: EntityKey,
    },

    /// Uniqueness violation on create.
    #[error("entity already exists: {entity}")]
    AlreadyExists {
        /// The clashing entity.
        entity: EntityKey,
    },

    /// Access through a handle whose entity was deleted.
    #[error("entity has been deleted: {entity}")]
    ObjectDeleted {
        /// The deleted entity.
        entity: EntityKey,
    },

    /// Unknown or timed out session.
    #[error("session expired: {id}")]
    SessionExpired {
        /// Session id presented by the client.
        id: String,
    },

    /// The transaction's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A class model failed validation while building.
    #[error("invalid model for class '{class}': {message}")]
    InvalidModel {
        /// Class being built.
        class: String,
        /// What is wrong with it.
        message: String,
    },

    /// Unknown class/method/slot or a badly typed argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Store backend failure outside of commit.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl SpineError {
    /// Every exception name a client may observe, as reported by
    /// [`exception_name`](Self::exception_name).
    pub const EXCEPTIONS: &'static [&'static str] = &[
        "AlreadyExistsError",
        "AuthenticationError",
        "AuthorizationError",
        "CancelledError",
        "CommitError",
        "DatabaseError",
        "ImmutableAttributeError",
        "InvalidArgumentError",
        "LockedError",
        "LostLockError",
        "NotFoundError",
        "ObjectDeletedError",
        "ServerProgrammingError",
        "SessionExpiredError",
        "TransactionClosedError",
    ];

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        SpineError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn model(class: &str, message: impl Into<String>) -> Self {
        SpineError::InvalidModel {
            class: class.to_string(),
            message: message.into(),
        }
    }

    /// Whether the client may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SpineError::Locked { .. } | SpineError::Commit { .. })
    }

    /// Exception name used in interface descriptions and transport payloads.
    pub fn exception_name(&self) -> &'static str {
        match self {
            SpineError::ImmutableAttribute { .. } => "ImmutableAttributeError",
            SpineError::Locked { .. } => "LockedError",
            SpineError::TransactionClosed { .. } => "TransactionClosedError",
            SpineError::LostLock { .. } => "LostLockError",
            SpineError::Commit { .. } => "CommitError",
            SpineError::Authorization { .. } => "AuthorizationError",
            SpineError::Authentication { .. } => "AuthenticationError",
            SpineError::NotFound { .. } => "NotFoundError",
            SpineError::AlreadyExists { .. } => "AlreadyExistsError",
            SpineError::ObjectDeleted { .. } => "ObjectDeletedError",
            SpineError::SessionExpired { .. } => "SessionExpiredError",
            SpineError::Cancelled => "CancelledError",
            SpineError::InvalidModel { .. } => "ServerProgrammingError",
            SpineError::InvalidArgument { .. } => "InvalidArgumentError",
            SpineError::Store(_) => "DatabaseError",
        }
    }
}

impl From<StoreError> for SpineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity } => SpineError::NotFound { entity },
            StoreError::AlreadyExists { entity } => SpineError::AlreadyExists { entity },
            other => SpineError::Store(other),
        }
    }
}
