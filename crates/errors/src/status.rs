use crate::ErrorKind;

/// Status codes for the embedded-C-client boundary. These are a
/// thin conversion table; the core's own logic never branches on them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    Failed = 1,
    Disconnected = 2,
    BadHandle = 3,
    PointUnknown = 4,
    IllegalState = 5,
    Unrecoverable = 6,
    Ignored = 7,
}

impl From<ErrorKind> for StatusCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ServiceClosed | ErrorKind::ServiceNotAvailable => {
                StatusCode::Disconnected
            },
            ErrorKind::SessionAuth | ErrorKind::Unauthorized => StatusCode::Failed,
            ErrorKind::PointUnknown => StatusCode::PointUnknown,
            ErrorKind::UnresolvedState | ErrorKind::IllegalArgument => StatusCode::Failed,
            ErrorKind::IllegalState => StatusCode::IllegalState,
            ErrorKind::BadHandle => StatusCode::BadHandle,
            ErrorKind::InvalidInterval => StatusCode::Failed,
            ErrorKind::StoreAccess => StatusCode::Unrecoverable,
            ErrorKind::IterationInterrupted => StatusCode::Failed,
        }
    }
}

impl StatusCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_zero() {
        assert_eq!(StatusCode::Success.as_i32(), 0);
    }

    #[test]
    fn point_unknown_maps() {
        assert_eq!(
            StatusCode::from(ErrorKind::PointUnknown),
            StatusCode::PointUnknown
        );
    }
}
