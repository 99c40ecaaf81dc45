mod key;
mod value;

pub use key::{EntityKey, KeyValue, PrimaryKey};
pub use value::{SemanticType, SlotValues, Value};
