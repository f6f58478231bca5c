//! Small primitives shared by the query, cursor, store and backend crates:
//! the half-open time [`Interval`] used throughout `StoreValuesQuery`, the
//! [`Sync`] schedule trait a point's sync parameter is checked against, and
//! the [`report_error`] helper used at fatal-error boundaries.

mod sync;

pub use sync::{PeriodicSync, Sync};

/// A half-open range of raw 64-bit stamps: `after` is an inclusive lower
/// bound, `before` an exclusive upper bound. Either end may be absent,
/// meaning unbounded in that direction.
///
/// An interval with `after == before` (both present and equal) denotes a
/// single instant -- the form the polator and SYNCED-interval-trimming logic
/// test for with [`Interval::is_instant`]. This reading is recorded as a
/// resolved Open Question in DESIGN.md.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Interval {
    pub after: Option<i64>,
    pub before: Option<i64>,
}

impl Interval {
    pub const UNBOUNDED: Interval = Interval {
        after: None,
        before: None,
    };

    pub fn new(after: Option<i64>, before: Option<i64>) -> Self {
        Self { after, before }
    }

    pub fn at(stamp: i64) -> Self {
        Self {
            after: Some(stamp),
            before: Some(stamp),
        }
    }

    pub fn contains(&self, stamp: i64) -> bool {
        self.after.is_none_or(|a| stamp >= a) && self.before.is_none_or(|b| stamp < b)
    }

    pub fn is_bounded_after(&self) -> bool {
        self.after.is_some()
    }

    pub fn is_bounded_before(&self) -> bool {
        self.before.is_some()
    }

    pub fn is_fully_bounded(&self) -> bool {
        self.after.is_some() && self.before.is_some()
    }

    /// A degenerate interval denoting a single stamp (both ends present and
    /// equal). Required before delegating a polated, non-counting query to a
    /// polator: an interpolation/extrapolation always
    /// targets one instant.
    pub fn is_instant(&self) -> bool {
        matches!((self.after, self.before), (Some(a), Some(b)) if a == b)
    }

    /// Is this interval empty, i.e. can no stamp satisfy it? Used after
    /// trimming a query's interval to a sync schedule's default limits
    ///: an empty result means the query is cancelled.
    pub fn is_empty(&self) -> bool {
        matches!((self.after, self.before), (Some(a), Some(b)) if a >= b)
    }

    /// Narrow `self` to the intersection with `other`.
    pub fn intersect(&self, other: &Interval) -> Interval {
        let after = match (self.after, other.after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let before = match (self.before, other.before) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Interval { after, before }
    }

    /// Return a new interval with `after` advanced to just past `stamp`,
    /// used by the cursor to re-window a forward iteration after a batch
    /// boundary.
    pub fn after_stamp(&self, stamp: i64) -> Interval {
        Interval {
            after: Some(stamp + 1),
            before: self.before,
        }
    }

    /// Return a new interval with `before` pulled back to `stamp`, used by
    /// the cursor to re-window a reverse iteration.
    pub fn before_stamp(&self, stamp: i64) -> Interval {
        Interval {
            after: self.after,
            before: Some(stamp),
        }
    }
}

/// Log a fatal error's full context chain at `error` level before the
/// caller translates it into a `ServiceClosed` boundary response.
/// Synchronous and side-effect-free beyond logging: this crate has no
/// error-reporting backend to flush.
pub fn report_error(e: &anyhow::Error) {
    tracing::error!(err = ?e, "fatal error, closing service");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_open_contains() {
        let iv = Interval::new(Some(10), Some(20));
        assert!(!iv.contains(9));
        assert!(iv.contains(10));
        assert!(iv.contains(19));
        assert!(!iv.contains(20));
    }

    #[test]
    fn unbounded_contains_everything() {
        assert!(Interval::UNBOUNDED.contains(i64::MIN));
        assert!(Interval::UNBOUNDED.contains(i64::MAX));
    }

    #[test]
    fn instant_detection() {
        assert!(Interval::at(42).is_instant());
        assert!(!Interval::new(Some(1), Some(2)).is_instant());
        assert!(!Interval::new(Some(1), None).is_instant());
    }

    #[test]
    fn intersect_narrows_both_ends() {
        let a = Interval::new(Some(10), Some(100));
        let b = Interval::new(Some(50), Some(60));
        assert_eq!(a.intersect(&b), Interval::new(Some(50), Some(60)));
    }

    #[test]
    fn empty_after_intersect_of_disjoint_ranges() {
        let a = Interval::new(Some(10), Some(20));
        let b = Interval::new(Some(30), Some(40));
        assert!(a.intersect(&b).is_empty());
    }
}
