use crate::{point_uuid::PointUuid, state::StateValue, value::Value};

/// An immutable, timestamped measurement.
///
/// A value with both `value` and `state` absent encodes tombstone intent
/// when the owning point is configured "null-removes";
/// the updater pipeline is responsible for converting such a value into a
/// [`VersionedValue::Deleted`] rather than this type enforcing it, since
/// whether null removes depends on point/store configuration the value
/// itself doesn't carry.
#[derive(Clone, Debug, PartialEq)]
pub struct PointValue {
    pub point_uuid: PointUuid,
    pub stamp: i64,
    pub state: Option<StateValue>,
    pub value: Option<Value>,
}

impl PointValue {
    pub fn new(point_uuid: PointUuid, stamp: i64) -> Self {
        Self {
            point_uuid,
            stamp,
            state: None,
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_state(mut self, state: StateValue) -> Self {
        self.state = Some(state);
        self
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

/// What kind of row a [`VersionedValue`] represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PointValueKind {
    /// An ordinary write.
    Value,
    /// A tombstone: value and state are cleared, row lives under the
    /// point's deleted-bit shadow UUID.
    Deleted,
    /// A tombstone that additionally authorizes backend row removal: purge
    /// emits `Purged` variants so replication propagates the removal.
    Purged,
}

/// A [`PointValue`] plus the server-assigned write time (`version`).
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedValue {
    pub point_value: PointValue,
    pub version: i64,
    pub kind: PointValueKind,
}

impl VersionedValue {
    pub fn value(point_uuid: PointUuid, stamp: i64, version: i64, value: Value) -> Self {
        Self {
            point_value: PointValue::new(point_uuid, stamp).with_value(value),
            version,
            kind: PointValueKind::Value,
        }
    }

    pub fn value_with_state(
        point_uuid: PointUuid,
        stamp: i64,
        version: i64,
        value: Option<Value>,
        state: Option<StateValue>,
    ) -> Self {
        let mut point_value = PointValue::new(point_uuid, stamp);
        point_value.value = value;
        point_value.state = state;
        Self {
            point_value,
            version,
            kind: PointValueKind::Value,
        }
    }

    /// Build the tombstone row for `point_uuid` at `stamp`: stored under
    /// `point_uuid.deleted()`, value and state cleared.
    pub fn deleted(point_uuid: PointUuid, stamp: i64, version: i64) -> Self {
        Self {
            point_value: PointValue::new(point_uuid.deleted(), stamp),
            version,
            kind: PointValueKind::Deleted,
        }
    }

    pub fn purged(point_uuid: PointUuid, stamp: i64, version: i64) -> Self {
        Self {
            point_value: PointValue::new(point_uuid.deleted(), stamp),
            version,
            kind: PointValueKind::Purged,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.kind, PointValueKind::Deleted | PointValueKind::Purged)
    }

    pub fn is_purged(&self) -> bool {
        matches!(self.kind, PointValueKind::Purged)
    }

    /// The point's plain (non-shadow) UUID, regardless of whether this row
    /// is stored under the deleted shadow.
    pub fn point_uuid(&self) -> PointUuid {
        self.point_value.point_uuid.undeleted()
    }

    pub fn stamp(&self) -> i64 {
        self.point_value.stamp
    }
}

#[cfg(test)]
mod tests {
    use crate::Value;

    use super::*;

    #[test]
    fn deleted_builds_a_tombstone_under_the_shadow_uuid() {
        let u = PointUuid::new_v4().undeleted();
        let d = VersionedValue::deleted(u, 100, 1);
        assert!(d.is_deleted());
        assert!(!d.is_purged());
        assert!(d.point_value.point_uuid.is_deleted());
        assert_eq!(d.point_uuid(), u);
        assert!(d.point_value.value.is_none());
    }

    #[test]
    fn purged_is_also_deleted() {
        let u = PointUuid::new_v4();
        let p = VersionedValue::purged(u, 100, 1);
        assert!(p.is_deleted());
        assert!(p.is_purged());
    }

    #[test]
    fn ordinary_value_round_trips_the_value() {
        let u = PointUuid::new_v4();
        let v = VersionedValue::value(u, 10, 1, Value::Signed64(42));
        assert_eq!(v.point_value.value, Some(Value::Signed64(42)));
        assert!(!v.is_deleted());
    }
}
