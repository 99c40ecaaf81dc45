//! # spine-core
//!
//! The entity kernel behind the Spine RPC server.
//! Builds runtime classes from declarative models, keeps one live
//! instance per entity, guards them with pessimistic read/write locks
//! held by transactions, and reclaims idle locks and sessions in the
//! background.

pub mod auth;
pub mod builder;
pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod idl;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod lock;
pub mod model;
pub mod runtime;
pub mod session;
pub mod sweeper;
pub mod transaction;
pub mod types;

pub use builder::{BuiltClass, ClassBuilder, DumpQuery, DumpRow, Predicate, SearchQuery};
pub use config::Config;
pub use error::{SpineError, SpineResult};
pub use model::{AttributeDescriptor, ClassModel, OperationDescriptor};
pub use runtime::{Credentials, Spine};
pub use transaction::{Transaction, TransactionState};
pub use types::{EntityKey, KeyValue, PrimaryKey, SemanticType, SlotValues, Value};

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod idl_test;
#[cfg(test)]
mod sweeper_test;
#[cfg(test)]
mod transaction_test;
