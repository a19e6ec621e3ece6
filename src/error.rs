//! Crate-wide error taxonomy.
//!
//! Every layer keeps its own `thiserror` enum close to the code that can
//! fail; this module holds the shared classification used where failures
//! cross layer boundaries (HTTP status mapping, log levels).

use thiserror::Error;

/// Failure classification shared across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Unsupported,
    AuthFailed,
    Backend,
    Store,
    Fs,
    Config,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// HTTP status code this class surfaces as on the operator API.
    pub fn http_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::Unsupported | ErrorKind::Config => 400,
            ErrorKind::AuthFailed => 401,
            _ => 500,
        }
    }
}

/// Errors surfaced by [`crate::manager::HostManager`] operations.
///
/// Adapter-internal failures never appear here: adapters fold them into
/// `ActionResult` (see `types`). This enum covers the manager's own
/// bookkeeping, which the API layer maps onto HTTP statuses.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("主机不存在")]
    HostNotFound,

    #[error("虚拟机不存在")]
    GuestNotFound,

    #[error("host already added: {0}")]
    HostExists(String),

    #[error("unsupported or disabled server type: {0}")]
    Unsupported(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] crate::catalog::StoreError),
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::HostNotFound | ManagerError::GuestNotFound => ErrorKind::NotFound,
            ManagerError::HostExists(_) => ErrorKind::AlreadyExists,
            ManagerError::Unsupported(_) => ErrorKind::Unsupported,
            ManagerError::Config(_) => ErrorKind::Config,
            ManagerError::Internal(_) => ErrorKind::Internal,
            ManagerError::Store(_) => ErrorKind::Store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_code_mapping() {
        assert_eq!(ErrorKind::NotFound.http_code(), 404);
        assert_eq!(ErrorKind::AlreadyExists.http_code(), 409);
        assert_eq!(ErrorKind::Unsupported.http_code(), 400);
        assert_eq!(ErrorKind::Config.http_code(), 400);
        assert_eq!(ErrorKind::AuthFailed.http_code(), 401);
        assert_eq!(ErrorKind::Backend.http_code(), 500);
        assert_eq!(ErrorKind::Store.http_code(), 500);
    }
}
