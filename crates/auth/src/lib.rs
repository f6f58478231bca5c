//! Identity and permission checks the cursor and updater pipeline consult
//! before touching a point.
//!
//! The transport layer authenticates the caller and hands the core an
//! [`Identity`]; everything downstream of that -- per-point and per-store
//! ACLs -- is this crate's concern. The core only assumes a
//! request/response boundary with an authenticated identity.

use std::collections::HashMap;

use parking_lot::RwLock;
use pvs_errors::ErrorMetadata;
use pvs_value::PointUuid;

bitflags::bitflags! {
    /// The actions a permission check can be made for. `Process`/`Inject`
    /// correspond to the updater's action computation:
    /// `Process` when the point has input relations, `Inject` for values
    /// with no known point.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Permission: u8 {
        const READ    = 0b0000_0001;
        const WRITE   = 0b0000_0010;
        const DELETE  = 0b0000_0100;
        const PROCESS = 0b0000_1000;
        const INJECT  = 0b0001_0000;
    }
}

/// The caller identity threaded through every store operation. `anonymous`
/// is used by tests and by `impersonate(None)`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Identity {
    user: String,
}

impl Identity {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn anonymous() -> Self {
        Self::new("")
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_empty()
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Per-point and store-wide ACLs, plus the checks the cursor/updater make
/// against them.
///
/// If a query names a point and the point has permissions configured,
/// the check requires READ for the identity -- a point absent from the
/// ACL table is unrestricted (an unconfigured point imposes no check).
pub trait Authorizer: Send + Sync {
    fn check_point(
        &self,
        identity: &Identity,
        point_uuid: PointUuid,
        required: Permission,
    ) -> anyhow::Result<()>;

    fn check_store(&self, identity: &Identity, required: Permission) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Acl {
    /// identity -> granted permissions. Absence of the point/store key
    /// entirely in the outer map means "unrestricted".
    grants: HashMap<String, Permission>,
}

impl Acl {
    fn check(&self, identity: &Identity, required: Permission) -> bool {
        self.grants
            .get(identity.user())
            .is_some_and(|granted| granted.contains(required))
    }
}

/// The default in-process authorizer: an explicit grant table per point and
/// one for the store as a whole, mutable at runtime (e.g. from a metadata
/// reload).
pub struct InMemoryAuthorizer {
    point_acls: RwLock<HashMap<PointUuid, Acl>>,
    store_acl: RwLock<Option<Acl>>,
}

impl Default for InMemoryAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuthorizer {
    pub fn new() -> Self {
        Self {
            point_acls: RwLock::new(HashMap::new()),
            store_acl: RwLock::new(None),
        }
    }

    pub fn grant_point(&self, point_uuid: PointUuid, identity: &Identity, permission: Permission) {
        let mut acls = self.point_acls.write();
        let acl = acls.entry(point_uuid).or_default();
        *acl.grants.entry(identity.user().to_string()).or_insert(Permission::empty()) |=
            permission;
    }

    pub fn grant_store(&self, identity: &Identity, permission: Permission) {
        let mut acl = self.store_acl.write();
        let acl = acl.get_or_insert_with(Acl::default);
        *acl.grants.entry(identity.user().to_string()).or_insert(Permission::empty()) |=
            permission;
    }

    pub fn clear(&self) {
        self.point_acls.write().clear();
        *self.store_acl.write() = None;
    }
}

impl Authorizer for InMemoryAuthorizer {
    fn check_point(
        &self,
        identity: &Identity,
        point_uuid: PointUuid,
        required: Permission,
    ) -> anyhow::Result<()> {
        let acls = self.point_acls.read();
        match acls.get(&point_uuid.undeleted()) {
            None => Ok(()),
            Some(acl) if acl.check(identity, required) => Ok(()),
            Some(_) => Err(ErrorMetadata::unauthorized(format!(
                "{:?} lacks {required:?} on point {point_uuid}"
            ))
            .into()),
        }
    }

    fn check_store(&self, identity: &Identity, required: Permission) -> anyhow::Result<()> {
        let acl = self.store_acl.read();
        match acl.as_ref() {
            None => Ok(()),
            Some(acl) if acl.check(identity, required) => Ok(()),
            Some(_) => Err(ErrorMetadata::unauthorized(format!(
                "{:?} lacks {required:?} on the store"
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pvs_errors::{ErrorKind, ErrorMetadataAnyhowExt};

    use super::*;

    #[test]
    fn unconfigured_point_is_unrestricted() {
        let auth = InMemoryAuthorizer::new();
        let alice = Identity::new("alice");
        assert!(auth
            .check_point(&alice, PointUuid::new_v4(), Permission::READ)
            .is_ok());
    }

    #[test]
    fn configured_point_requires_the_grant() {
        let auth = InMemoryAuthorizer::new();
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let p = PointUuid::new_v4();
        auth.grant_point(p, &alice, Permission::READ);

        assert!(auth.check_point(&alice, p, Permission::READ).is_ok());
        let err = auth.check_point(&bob, p, Permission::READ).unwrap_err();
        assert_eq!(err.error_kind(), Some(ErrorKind::Unauthorized));
    }

    #[test]
    fn grant_does_not_imply_other_permissions() {
        let auth = InMemoryAuthorizer::new();
        let alice = Identity::new("alice");
        let p = PointUuid::new_v4();
        auth.grant_point(p, &alice, Permission::READ);
        assert!(auth.check_point(&alice, p, Permission::WRITE).is_err());
    }

    #[test]
    fn store_acl_gates_store_wide_operations() {
        let auth = InMemoryAuthorizer::new();
        let alice = Identity::new("alice");
        auth.grant_store(&alice, Permission::DELETE);
        assert!(auth.check_store(&alice, Permission::DELETE).is_ok());
        assert!(auth.check_store(&Identity::new("bob"), Permission::DELETE).is_err());
    }
}
