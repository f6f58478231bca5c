use pvs_value::{PointUuid, VersionedValue};

use crate::query::StoreValuesQuery;

/// Iteration order a prepared [`Responder`] walks values in: forward
/// iteration yields ascending `(stamp, version)`, reverse iteration yields
/// descending.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    Forward,
    Reverse,
}

/// A fresh iteration spec a cursor hands a [`Responder`] on
/// [`Responder::reset`] -- either to start a query, or to re-window after a
/// batch boundary.
#[derive(Clone)]
pub struct ResetSpec {
    pub point_uuid: Option<PointUuid>,
    pub query: StoreValuesQuery,
    pub order: Order,
}

/// The read side of the backend interface the cursor drives.
///
/// A `Responder` is stateful: `reset` prepares an iteration, `next`/`count`
/// consume it. Implementations are pooled by the caller, one per concurrent
/// query; this trait says nothing about pooling itself.
#[async_trait::async_trait]
pub trait Responder: Send {
    /// Release any in-progress iteration and, if `spec` is given, prepare a
    /// fresh one.
    async fn reset(&mut self, spec: Option<ResetSpec>) -> anyhow::Result<()>;

    /// The next ordered value in the prepared iteration, or `None` when
    /// exhausted. Deleted rows are omitted unless the prepared query has
    /// DELETED set.
    async fn next(&mut self) -> anyhow::Result<Option<VersionedValue>>;

    /// Count values matching the prepared query without materializing
    /// them.
    async fn count(&mut self) -> anyhow::Result<u64>;

    /// This backend's row fetch cap per prepared iteration; `0` means
    /// unlimited.
    fn limit(&self) -> u32;
}

/// The outcome of a single [`Writer`] upsert.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    Inserted,
    Replaced,
}

/// The write side of the backend interface the updater pipeline drives.
#[async_trait::async_trait]
pub trait Writer: Send + Sync {
    /// Upsert keyed by `(point_uuid, stamp)`. A non-tombstone write to an
    /// existing `(point, stamp)` replaces it; `version` must be strictly
    /// greater than any prior version for this key.
    async fn upsert(&self, value: &VersionedValue) -> anyhow::Result<WriteOutcome>;

    /// Delete the row at `(point_uuid, stamp)`, returning the number of
    /// rows removed (0 or 1). Unless `drop_deleted` is set, also writes a
    /// tombstone under the point's deleted-bit shadow key.
    async fn delete(&self, point_uuid: PointUuid, stamp: i64, drop_deleted: bool) -> anyhow::Result<u64>;

    /// Physically remove all rows (plain and deleted-shadow) for
    /// `point_uuid` with `stamp` in `interval`, returning the count
    /// removed.
    async fn purge(&self, point_uuid: PointUuid, interval: pvs_common::Interval) -> anyhow::Result<u64>;

    /// Finalize the writes issued since the last commit.
    async fn commit(&self) -> anyhow::Result<()>;
}

/// A concrete backend pairs a [`Writer`] with the ability to prepare as many
/// independent [`Responder`]s as callers need concurrently, one per
/// concurrent query. `pvs-session` is generic over this trait rather than
/// over a specific backend crate.
pub trait Backend: Writer {
    fn new_responder(&self) -> Box<dyn Responder>;

    /// View this backend as a plain [`Writer`] trait object. A handwritten
    /// supertrait accessor rather than relying on trait-object upcasting,
    /// which each concrete backend can implement as `self`.
    fn writer(&self) -> &dyn Writer;
}
