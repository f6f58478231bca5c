//! The point-value data model: point UUIDs with a mutable
//! "deleted" bit, the tagged value union, state codes, and versioned point
//! values (including the `Deleted`/`Purged` tombstone subtypes).

mod point_uuid;
mod point_value;
mod state;
mod value;

pub use point_uuid::PointUuid;
pub use point_value::{PointValue, PointValueKind, VersionedValue};
pub use state::{State, StateGroup, StateValue};
pub use value::{type_code, Value};
