// Error types for the null-route daemon

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Main error type for route edits and reconciliation
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Route control socket error: {0}")]
    Resource(#[source] io::Error),

    #[error("Route to {0} already exists")]
    AlreadyExists(Ipv4Addr),

    #[error("No route to {0}")]
    NotFound(Ipv4Addr),

    #[error("Malformed route entry: {0}")]
    Format(String),

    #[error("Insufficient privilege to edit routes: {0}")]
    Permission(#[source] io::Error),

    #[error("Kernel rejected route request for {addr}: {source}")]
    Kernel {
        addr: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("Expiration timeout of {0:?} is out of range")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// AlreadyExists and NotFound are ordinary outcomes of racing edits,
    /// callers branch on them instead of aborting.
    pub fn is_expected(&self) -> bool {
        matches!(self, AppError::AlreadyExists(_) | AppError::NotFound(_))
    }

    /// Classify the errno of a failed route edit for `addr`.
    pub fn from_kernel(addr: Ipv4Addr, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EEXIST) => AppError::AlreadyExists(addr),
            Some(libc::ESRCH) | Some(libc::ENOENT) => AppError::NotFound(addr),
            Some(libc::EPERM) | Some(libc::EACCES) => AppError::Permission(err),
            _ => AppError::Kernel { addr, source: err },
        }
    }

    /// Classify a failure to acquire or release the control socket.
    pub fn from_handle(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => AppError::Permission(err),
            _ => AppError::Resource(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

    #[test]
    fn test_kernel_errno_mapping() {
        let err = AppError::from_kernel(ADDR, io::Error::from_raw_os_error(libc::EEXIST));
        assert!(matches!(err, AppError::AlreadyExists(a) if a == ADDR));

        let err = AppError::from_kernel(ADDR, io::Error::from_raw_os_error(libc::ESRCH));
        assert!(matches!(err, AppError::NotFound(a) if a == ADDR));

        let err = AppError::from_kernel(ADDR, io::Error::from_raw_os_error(libc::EPERM));
        assert!(matches!(err, AppError::Permission(_)));

        let err = AppError::from_kernel(ADDR, io::Error::from_raw_os_error(libc::EINVAL));
        match err {
            AppError::Kernel { addr, source } => {
                assert_eq!(addr, ADDR);
                assert_eq!(source.raw_os_error(), Some(libc::EINVAL));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_handle_errno_mapping() {
        let err = AppError::from_handle(io::Error::from_raw_os_error(libc::EACCES));
        assert!(matches!(err, AppError::Permission(_)));

        let err = AppError::from_handle(io::Error::from_raw_os_error(libc::EMFILE));
        assert!(matches!(err, AppError::Resource(_)));
    }

    #[test]
    fn test_error_expected() {
        assert!(AppError::AlreadyExists(ADDR).is_expected());
        assert!(AppError::NotFound(ADDR).is_expected());
        assert!(!AppError::Format("bad".to_string()).is_expected());
    }
}
