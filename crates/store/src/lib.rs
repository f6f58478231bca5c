//! The point-value store core: query normalization, cursor iteration, the
//! backend interface, point bindings, subscriptions, the update pipeline,
//! notification/replication fan-out, state group resolution, and the
//! archiver/purger.
//!
//! Everything here is transport-agnostic: a caller supplies an
//! [`pvs_auth::Identity`] and drives these types directly, the way
//! `pvs-session` does on behalf of whatever RPC surface sits in front of it.

pub mod archiver;
pub mod backend;
pub mod binding;
pub mod cursor;
pub mod notifier;
pub mod polator;
pub mod query;
pub mod replicator;
pub mod state_group;
pub mod subscription;
pub mod updater;

pub use archiver::Archiver;
pub use backend::{Backend, Order, ResetSpec, Responder, WriteOutcome, Writer};
pub use binding::PointBindingIndex;
pub use cursor::Cursor;
pub use notifier::Notifier;
pub use polator::{Polator, PolatorRegistry};
pub use query::{StoreValuesQuery, StoreValuesQueryBuilder, StoreValuesResponse};
pub use replicator::Replicator;
pub use state_group::StateGroupResolver;
pub use subscription::{SessionId, SubscriptionManager};
pub use updater::{PendingUpdate, PointMetadata, SuspendGate, Updater};
