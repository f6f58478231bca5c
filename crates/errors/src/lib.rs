//! Shared error vocabulary for the point-value store.
//!
//! Operations attach an [`ErrorMetadata`] to an `anyhow::Error` via
//! `.context(...)`. The session RPC surface downcasts to it when deciding
//! which per-element exception slot to fill: a bare `anyhow::Error`
//! with no attached metadata is always reported as an internal error.

use std::borrow::Cow;

mod status;

pub use status::StatusCode;

/// The error kinds the core surfaces across the session RPC boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    ServiceClosed,
    ServiceNotAvailable,
    SessionAuth,
    Unauthorized,
    PointUnknown,
    UnresolvedState,
    IllegalArgument,
    IllegalState,
    BadHandle,
    InvalidInterval,
    StoreAccess,
    IterationInterrupted,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ServiceClosed => "ServiceClosed",
            ErrorKind::ServiceNotAvailable => "ServiceNotAvailable",
            ErrorKind::SessionAuth => "SessionAuth",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::PointUnknown => "PointUnknown",
            ErrorKind::UnresolvedState => "UnresolvedState",
            ErrorKind::IllegalArgument => "IllegalArgument",
            ErrorKind::IllegalState => "IllegalState",
            ErrorKind::BadHandle => "BadHandle",
            ErrorKind::InvalidInterval => "InvalidInterval",
            ErrorKind::StoreAccess => "StoreAccess",
            ErrorKind::IterationInterrupted => "IterationInterrupted",
        }
    }

    /// Whether this error kind represents a fatal, service-ending condition:
    /// these abort the service and translate incoming calls to
    /// `ServiceClosed`.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::ServiceClosed | ErrorKind::ServiceNotAvailable | ErrorKind::StoreAccess
        )
    }
}

/// Attached to an `anyhow::Error` chain via `.context(...)` to classify it.
///
/// `kind` is the dispatchable classification, `short_msg` is a stable
/// machine-matchable tag usable in tests, and `msg` is the human-facing
/// description.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub kind: ErrorKind,
    pub short_msg: Cow<'static, str>,
    pub msg: Cow<'static, str>,
}

impl ErrorMetadata {
    fn new(
        kind: ErrorKind,
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn service_closed() -> Self {
        Self::new(
            ErrorKind::ServiceClosed,
            "ServiceClosed",
            "The service connection has been closed",
        )
    }

    pub fn service_not_available(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ServiceNotAvailable, "ServiceNotAvailable", msg)
    }

    pub fn session_auth(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::SessionAuth, "SessionAuth", msg)
    }

    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Unauthorized, "Unauthorized", msg)
    }

    pub fn point_unknown(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::PointUnknown, "PointUnknown", msg)
    }

    pub fn unresolved_state(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::UnresolvedState, "UnresolvedState", msg)
    }

    pub fn illegal_argument(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::IllegalArgument, "IllegalArgument", msg)
    }

    pub fn illegal_state(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::IllegalState, "IllegalState", msg)
    }

    pub fn bad_handle(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::BadHandle, "BadHandle", msg)
    }

    pub fn invalid_interval(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidInterval, "InvalidInterval", msg)
    }

    pub fn store_access(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::StoreAccess, "StoreAccess", msg)
    }

    pub fn iteration_interrupted() -> Self {
        Self::new(
            ErrorKind::IterationInterrupted,
            "IterationInterrupted",
            "Cursor iteration was interrupted",
        )
    }
}

/// Extension methods for classifying an `anyhow::Error` without having to
/// downcast by hand at every call site.
pub trait ErrorMetadataAnyhowExt {
    fn error_kind(&self) -> Option<ErrorKind>;
    fn is_fatal(&self) -> bool;
    fn short_msg(&self) -> Option<&str>;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_kind(&self) -> Option<ErrorKind> {
        self.downcast_ref::<ErrorMetadata>().map(|e| e.kind)
    }

    fn is_fatal(&self) -> bool {
        self.error_kind().map(ErrorKind::is_fatal).unwrap_or(false)
    }

    fn short_msg(&self) -> Option<&str> {
        self.downcast_ref::<ErrorMetadata>()
            .map(|e| e.short_msg.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcasts_through_anyhow_context() {
        let err: anyhow::Error =
            anyhow::anyhow!("boom").context(ErrorMetadata::point_unknown("no such point"));
        assert_eq!(err.error_kind(), Some(ErrorKind::PointUnknown));
        assert_eq!(err.short_msg(), Some("PointUnknown"));
    }

    #[test]
    fn fatal_kinds() {
        assert!(ErrorMetadata::service_closed().kind.is_fatal());
        assert!(!ErrorMetadata::unauthorized("x").kind.is_fatal());
    }
}
