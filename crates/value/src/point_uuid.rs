use std::fmt;

use uuid::Uuid;

/// Bit reserved inside the 16-byte UUID representation to mark a point as
/// the deleted shadow of itself: UUIDs are modeled as a pair
/// `{id, deleted: bool}`, with the flag serialized into the high bit of the
/// same 16-byte form for compatibility.
///
/// `PointUuid::deleted()`/`undeleted()` flip this bit; every other bit is
/// untouched. Equality and ordering compare all 16 bytes, so a point's
/// normal and deleted UUIDs are two distinct keys that happen to differ in
/// exactly this bit -- tombstones and purges key off `.deleted()` the same
/// way ordinary writes key off the plain UUID, so the backend can expose
/// them under a distinct key.
const DELETED_BIT: u8 = 0x80;

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct PointUuid([u8; 16]);

impl PointUuid {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(*uuid.as_bytes())
    }

    pub fn new_v4() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_deleted(&self) -> bool {
        self.0[15] & DELETED_BIT != 0
    }

    /// The tombstone-shadow UUID for this point: same identity, deleted bit
    /// set. Idempotent.
    pub fn deleted(&self) -> Self {
        let mut bytes = self.0;
        bytes[15] |= DELETED_BIT;
        Self(bytes)
    }

    /// The ordinary (non-tombstone) UUID for this point. Idempotent.
    pub fn undeleted(&self) -> Self {
        let mut bytes = self.0;
        bytes[15] &= !DELETED_BIT;
        Self(bytes)
    }

    /// True if `self` and `other` name the same point, ignoring the deleted
    /// bit -- i.e. one is the tombstone shadow of the other or they're
    /// identical.
    pub fn matches(&self, other: &PointUuid) -> bool {
        self.undeleted().0 == other.undeleted().0
    }

    /// The plain `uuid::Uuid` this is serialized as on the wire, with the
    /// deleted bit left in place.
    pub fn to_uuid(self) -> Uuid {
        Uuid::from_bytes(self.0)
    }
}

impl fmt::Debug for PointUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.to_uuid(), if self.is_deleted() { "~deleted" } else { "" })
    }
}

impl fmt::Display for PointUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_uuid(), f)
    }
}

impl From<Uuid> for PointUuid {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_and_undeleted_are_distinct_but_match() {
        let u = PointUuid::new_v4().undeleted();
        let d = u.deleted();
        assert_ne!(u, d);
        assert!(!u.is_deleted());
        assert!(d.is_deleted());
        assert!(u.matches(&d));
        assert!(d.matches(&u));
    }

    #[test]
    fn deleted_is_idempotent() {
        let u = PointUuid::new_v4();
        assert_eq!(u.deleted(), u.deleted().deleted());
        assert_eq!(u.undeleted(), u.undeleted().undeleted());
    }

    #[test]
    fn ordering_considers_the_deleted_bit() {
        let u = PointUuid::from_bytes([0u8; 16]).undeleted();
        let d = u.deleted();
        assert!(u < d);
    }
}
