use thiserror::Error;

use crate::auth::Grant;
use crate::builder::Predicate;
use crate::model::ClassModel;
use crate::types::{EntityKey, PrimaryKey, SlotValues};

/// Errors reported by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored entity {entity}")]
    NotFound { entity: EntityKey },

    #[error("stored entity {entity} already exists")]
    AlreadyExists { entity: EntityKey },

    #[error("cannot allocate a key for class '{class}': {reason}")]
    KeyAllocation { class: String, reason: String },

    #[error("backend failure: {0}")]
    Backend(String),

    #[cfg(feature = "sqlite")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "sqlite")]
    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One entity's contribution to a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Update {
        class: String,
        key: PrimaryKey,
        slots: SlotValues,
    },
    Delete {
        class: String,
        key: PrimaryKey,
    },
}

/// Defines the contract for entity storage backends.
///
/// Backends are agnostic of the schema: they see class models, primary
/// keys and slot values only. Rows returned by `load` may carry the key
/// fields inline; the core ignores them.
pub trait Store: Send + Sync {
    /// Fetch every stored slot of an entity
    fn load(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<SlotValues>;

    /// Overwrite the given slots of an existing entity
    fn persist(&self, model: &ClassModel, key: &PrimaryKey, dirty: &SlotValues) -> StoreResult<()>;

    /// Insert a new entity. Key fields present in `initial` are used as
    /// given; a single integer key may be omitted and is then allocated.
    fn create(&self, model: &ClassModel, initial: &SlotValues) -> StoreResult<PrimaryKey>;

    fn delete(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<()>;

    /// Keys of the entities matching every predicate
    fn search(&self, model: &ClassModel, predicates: &[Predicate]) -> StoreResult<Vec<PrimaryKey>>;

    /// Apply a commit's changes atomically: all of them or none.
    fn apply(&self, changes: &[Change]) -> StoreResult<()>;
}

/// Read access to authentication and authorization data.
pub trait AuthSource: Send + Sync {
    /// Resolve credentials to a principal, `None` when they do not match
    fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<EntityKey>>;

    fn is_superuser(&self, principal: &EntityKey) -> StoreResult<bool>;

    /// Grants held directly by `grantee`
    fn grants_for(&self, grantee: &EntityKey) -> StoreResult<Vec<Grant>>;

    /// Groups `member` is a direct union member of
    fn union_groups_of(&self, member: &EntityKey) -> StoreResult<Vec<EntityKey>>;

    /// Spreads (categories) the entity belongs to
    fn spreads_of(&self, entity: &EntityKey) -> StoreResult<Vec<String>>;
}

/// Salted SHA-256 digest used by the bundled account tables.
pub fn hash_password(username: &str, password: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
