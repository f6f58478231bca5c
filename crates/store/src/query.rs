use std::sync::Arc;

use pvs_common::{Interval, Sync};
use pvs_errors::ErrorMetadata;
use pvs_value::{PointUuid, Value, VersionedValue};

bitflags::bitflags! {
    /// The query type bitmask: kept as the canonical on-wire form, with
    /// strongly-typed accessors and a builder layered on top.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct QueryFlags: u32 {
        /// Only non-null values (a null value is filtered out).
        const VALUE         = 1 << 0;
        /// Return a count instead of values.
        const COUNT          = 1 << 1;
        /// Include tombstones.
        const DELETED         = 1 << 2;
        const EXTRAPOLATED    = 1 << 3;
        /// Iterate stamp-ascending from `after`.
        const FORWARD        = 1 << 4;
        const INTERPOLATED   = 1 << 5;
        /// A Mark was attached to (or produced) this query.
        const MARKED         = 1 << 6;
        /// More than one row may be returned.
        const MULTIPLE       = 1 << 7;
        const NORMALIZED      = 1 << 8;
        /// Version-ordered consumption rather than stamp-ordered.
        const PULL          = 1 << 9;
        /// Iterate stamp-descending from `before`.
        const REVERSE        = 1 << 10;
        /// `rows` is a caller-specified row target rather than the default.
        const ROWS            = 1 << 11;
        const SYNCED          = 1 << 12;
        const ANY            = 1 << 13;
        /// Interval has a lower bound.
        const AFTER           = 1 << 14;
        /// Interval has an upper bound.
        const BEFORE          = 1 << 15;
    }
}

pub const MAX_ROWS: i32 = i32::MAX;

/// Which point a query names, if any: the resolved binding or a bare UUID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryPoint {
    Bound(PointUuid),
    Uuid(PointUuid),
}

impl QueryPoint {
    pub fn point_uuid(&self) -> PointUuid {
        match self {
            QueryPoint::Bound(u) | QueryPoint::Uuid(u) => *u,
        }
    }
}

/// An immutable store-values query. Only constructible via
/// [`StoreValuesQueryBuilder::build`], which applies the normalization
/// rules below.
#[derive(Clone)]
pub struct StoreValuesQuery {
    pub point: Option<QueryPoint>,
    pub interval: Interval,
    pub sync: Option<Arc<dyn Sync>>,
    pub rows: i32,
    pub limit: i32,
    pub polator_time_limit: Option<i64>,
    pub flags: QueryFlags,
    /// Set when step 8 of the builder found no sync instant inside the
    /// interval.
    pub cancelled: bool,
}

impl StoreValuesQuery {
    pub fn is_forward(&self) -> bool {
        self.flags.contains(QueryFlags::FORWARD)
    }

    pub fn is_reverse(&self) -> bool {
        self.flags.contains(QueryFlags::REVERSE)
    }

    pub fn is_pull(&self) -> bool {
        self.flags.contains(QueryFlags::PULL)
    }

    pub fn is_polated(&self) -> bool {
        self.flags
            .intersects(QueryFlags::EXTRAPOLATED | QueryFlags::INTERPOLATED)
    }

    pub fn is_count(&self) -> bool {
        self.flags.contains(QueryFlags::COUNT)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(QueryFlags::DELETED)
    }

    pub fn is_synced(&self) -> bool {
        self.flags.contains(QueryFlags::SYNCED)
    }

    /// Returns `rows` when ROWS is set; otherwise 1 when MULTIPLE is clear,
    /// else `MAX_ROWS`.
    pub fn get_rows(&self) -> i32 {
        if self.flags.contains(QueryFlags::ROWS) {
            self.rows
        } else if !self.flags.contains(QueryFlags::MULTIPLE) {
            1
        } else {
            MAX_ROWS
        }
    }

    /// True when rows is deterministic and VALUE/SYNCED are not set.
    pub fn is_fixed(&self) -> bool {
        self.get_rows() != MAX_ROWS
            && !self.flags.contains(QueryFlags::VALUE)
            && !self.flags.contains(QueryFlags::SYNCED)
    }

    /// Narrow `limit` to at most `response_limit`.
    pub fn limited(&self, response_limit: i32) -> i32 {
        if self.limit <= 0 {
            response_limit
        } else {
            self.limit.min(response_limit)
        }
    }
}

/// Mutable collector that materializes a [`StoreValuesQuery`] via
/// [`Self::build`], applying the normalization steps below in order.
#[derive(Default, Clone)]
pub struct StoreValuesQueryBuilder {
    point: Option<QueryPoint>,
    after: Option<i64>,
    before: Option<i64>,
    sync: Option<Arc<dyn Sync>>,
    rows: Option<i32>,
    limit: i32,
    polator_time_limit: Option<i64>,
    flags: QueryFlags,
    point_is_sync_capable: bool,
}

impl StoreValuesQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point(mut self, point: QueryPoint, sync_capable: bool) -> Self {
        self.point = Some(point);
        self.point_is_sync_capable = sync_capable;
        self
    }

    pub fn after(mut self, stamp: i64) -> Self {
        self.after = Some(stamp);
        self
    }

    pub fn before(mut self, stamp: i64) -> Self {
        self.before = Some(stamp);
        self
    }

    pub fn sync(mut self, sync: Arc<dyn Sync>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn rows(mut self, rows: i32) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn polator_time_limit(mut self, limit: i64) -> Self {
        self.polator_time_limit = Some(limit);
        self
    }

    pub fn flag(mut self, flag: QueryFlags) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Apply the normalization steps below and produce an immutable query.
    pub fn build(mut self) -> anyhow::Result<StoreValuesQuery> {
        let polated = self
            .flags
            .intersects(QueryFlags::EXTRAPOLATED | QueryFlags::INTERPOLATED);
        let mut interval = Interval::new(self.after, self.before);

        // Step 1: polation over a non-instant interval implies SYNCED.
        if polated && !interval.is_instant() {
            self.flags.insert(QueryFlags::SYNCED);
        }

        // Step 2: AFTER/BEFORE flags mirror bound presence.
        self.flags.set(QueryFlags::AFTER, interval.is_bounded_after());
        self.flags.set(QueryFlags::BEFORE, interval.is_bounded_before());

        // Step 3: MULTIPLE from full-bound instant-ness.
        if interval.is_fully_bounded() {
            self.flags.set(QueryFlags::MULTIPLE, !interval.is_instant());
        }

        // Step 4: default to REVERSE ("last value") absent any other
        // traversal signal.
        if !self
            .flags
            .intersects(QueryFlags::AFTER | QueryFlags::FORWARD | QueryFlags::MULTIPLE | QueryFlags::PULL)
        {
            self.flags.insert(QueryFlags::REVERSE);
        }

        // Step 5: rows narrows/sets MULTIPLE|ROWS.
        if let Some(rows) = self.rows {
            if rows <= 1 {
                self.flags.remove(QueryFlags::MULTIPLE);
            } else {
                self.flags.insert(QueryFlags::MULTIPLE | QueryFlags::ROWS);
            }
        }

        // Step 6: PULL without ROWS implies MULTIPLE.
        if self.flags.contains(QueryFlags::PULL) && !self.flags.contains(QueryFlags::ROWS) {
            self.flags.insert(QueryFlags::MULTIPLE);
        }

        // Step 7: SYNCED requires a sync-capable point.
        if self.flags.contains(QueryFlags::SYNCED) && !self.point_is_sync_capable {
            self.flags.remove(QueryFlags::SYNCED);
        }

        // DELETED and SYNCED are mutually exclusive at build time, even when
        // both flags arrive forced by the wire format rather than the
        // builder's own setters.
        if self.flags.contains(QueryFlags::DELETED) && self.flags.contains(QueryFlags::SYNCED) {
            return Err(ErrorMetadata::illegal_argument(
                "DELETED and SYNCED flags are mutually exclusive",
            )
            .into());
        }
        if self.flags.contains(QueryFlags::PULL)
            && (self.flags.contains(QueryFlags::DELETED)
                || polated
                || self.flags.contains(QueryFlags::SYNCED))
        {
            return Err(ErrorMetadata::illegal_argument(
                "PULL is mutually exclusive with DELETED, polation and SYNCED",
            )
            .into());
        }

        // Step 8: trim to the sync schedule's default limits and snap to the
        // nearest admissible instant; an empty intersection cancels the
        // query rather than erroring (the caller still gets a response).
        let mut cancelled = false;
        if let Some(sync) = self.sync.as_ref() {
            let trimmed = interval.intersect(&sync.default_limits());
            if trimmed.is_empty() {
                cancelled = true;
            } else {
                let forward = !self.flags.contains(QueryFlags::REVERSE);
                let endpoint = if forward { trimmed.before } else { trimmed.after };
                let snapped = endpoint.and_then(|e| sync.nearest(e, !forward));
                match snapped {
                    Some(s) if trimmed.contains(s) || trimmed.is_empty() => {
                        interval = if forward {
                            Interval::new(trimmed.after, Some(s + 1))
                        } else {
                            Interval::new(Some(s), trimmed.before)
                        };
                    },
                    _ => cancelled = true,
                }
            }
        }

        let rows = self.rows.unwrap_or(0);

        Ok(StoreValuesQuery {
            point: self.point,
            interval,
            sync: self.sync,
            rows,
            limit: self.limit,
            polator_time_limit: self.polator_time_limit,
            flags: self.flags,
            cancelled,
        })
    }
}

/// Pagination continuation.
#[derive(Clone)]
pub struct Mark {
    pub query: StoreValuesQuery,
    pub next_point_uuid: Option<PointUuid>,
    pub next_stamp: i64,
    pub done_count: i32,
}

impl Mark {
    /// Build the follow-up query that resumes exactly where this mark left
    /// off. A pure function of the mark's own state rather than a method on
    /// an inner class referencing its enclosing query.
    pub fn create_query(&self) -> StoreValuesQuery {
        let mut query = self.query.clone();
        query.interval = if query.is_reverse() {
            query.interval.before_stamp(self.next_stamp + 1)
        } else {
            query.interval.after_stamp(self.next_stamp - 1)
        };
        query
    }
}

/// A reason a candidate value was filtered out of a response. Exposed for
/// diagnostics/tests, not part of the wire form.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IgnoreReason {
    Null,
    Sync,
    Deleted,
    Unauthorized,
}

/// The outcome of [`crate::cursor::Cursor::create_response`].
#[derive(Clone, Default)]
pub struct StoreValuesResponse {
    pub values: Vec<VersionedValue>,
    pub count: Option<u64>,
    pub exception: Option<String>,
    pub mark: Option<Box<Mark>>,
}

impl StoreValuesResponse {
    pub fn error(exception: impl Into<String>) -> Self {
        Self {
            exception: Some(exception.into()),
            ..Default::default()
        }
    }
}

/// Normalize a value for response when the NORMALIZED flag is set.
/// Normalization here means dropping a redundant resolved state name when
/// the code alone already identifies it -- the transport-facing concern
/// this stands in for since the wire encoder is out of scope.
pub fn normalize(mut vv: VersionedValue) -> VersionedValue {
    if let Some(Value::State(state)) = &vv.point_value.value {
        if state.code.is_some() && state.name.is_some() {
            vv.point_value.value = Some(Value::State(pvs_value::StateValue::code(
                state.code.expect("checked above"),
            )));
        }
    }
    vv
}
