use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn allocation_failed(key: u64, size: u64, source: std::io::Error) -> Error {
        Error(ErrorKind::AllocationFailed { key, size, source }.into())
    }

    pub fn exposure_failed(key: u64, start: u64, end: u64, reason: impl Into<String>) -> Error {
        Error(
            ErrorKind::ExposureFailed {
                key,
                start,
                end,
                reason: reason.into(),
            }
            .into(),
        )
    }

    pub fn not_found(key: u64) -> Error {
        Error(ErrorKind::NotFound { key }.into())
    }

    pub fn not_locked(key: u64) -> Error {
        Error(ErrorKind::NotLocked { key }.into())
    }

    pub fn lock_timeout(key: u64, timeout: Duration) -> Error {
        Error(ErrorKind::LockTimeout { key, timeout }.into())
    }

    pub fn invalid_request(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidRequest {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn unknown_command(code: u32) -> Error {
        Error(ErrorKind::UnknownCommand { code }.into())
    }

    pub fn endpoint_closed() -> Error {
        Error(ErrorKind::EndpointClosed.into())
    }

    /// Whether a later identical request may succeed without any other caller
    /// changing the heap.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AllocationFailed { .. }
                | ErrorKind::ExposureFailed { .. }
                | ErrorKind::LockTimeout { .. }
        )
    }

    /// Negative errno reported back through the request transport.
    pub fn errno(&self) -> i64 {
        let code = match self.kind() {
            ErrorKind::AllocationFailed { .. } | ErrorKind::ExposureFailed { .. } => libc::EAGAIN,
            ErrorKind::NotFound { .. } => libc::ENOENT,
            ErrorKind::NotLocked { .. } => libc::EPERM,
            ErrorKind::LockTimeout { .. } => libc::ETIMEDOUT,
            ErrorKind::InvalidRequest { .. } => libc::EINVAL,
            ErrorKind::UnknownCommand { .. } => libc::ENOTTY,
            ErrorKind::EndpointClosed => libc::ENODEV,
        };
        -(code as i64)
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("failed to allocate {size} bytes of backing storage for object {key}: {source}")]
    AllocationFailed {
        key: u64,
        size: u64,
        source: std::io::Error,
    },

    #[error("failed to expose object {key} at [{start:#x}, {end:#x}): {reason}")]
    ExposureFailed {
        key: u64,
        start: u64,
        end: u64,
        reason: String,
    },

    #[error("object {key} not found")]
    NotFound { key: u64 },

    #[error("object {key} is not locked")]
    NotLocked { key: u64 },

    #[error("timed out after {timeout:?} waiting for the lock of object {key}")]
    LockTimeout { key: u64, timeout: Duration },

    #[error("invalid request {name}: {message}")]
    InvalidRequest { name: String, message: String },

    #[error("unknown command code {code}")]
    UnknownCommand { code: u32 },

    #[error("endpoint is no longer accepting requests")]
    EndpointClosed,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let oom = std::io::Error::from(std::io::ErrorKind::OutOfMemory);
        assert_eq!(
            Error::allocation_failed(1, 4096, oom).errno(),
            -(libc::EAGAIN as i64)
        );
        assert_eq!(
            Error::exposure_failed(1, 0, 4096, "range conflict").errno(),
            -(libc::EAGAIN as i64)
        );
        assert_eq!(Error::not_found(3).errno(), -(libc::ENOENT as i64));
        assert_eq!(Error::unknown_command(99).errno(), -(libc::ENOTTY as i64));
        assert_eq!(
            Error::invalid_request("length", "length != 0").errno(),
            -(libc::EINVAL as i64)
        );
        assert_eq!(Error::not_locked(3).errno(), -(libc::EPERM as i64));
        assert_eq!(
            Error::lock_timeout(3, Duration::from_millis(5)).errno(),
            -(libc::ETIMEDOUT as i64)
        );
        assert_eq!(Error::endpoint_closed().errno(), -(libc::ENODEV as i64));
    }

    #[test]
    fn test_retryable() {
        let oom = std::io::Error::from(std::io::ErrorKind::OutOfMemory);
        assert!(Error::allocation_failed(1, 1, oom).is_retryable());
        assert!(!Error::not_found(1).is_retryable());
        assert!(!Error::endpoint_closed().is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::exposure_failed(5, 0x1000, 0x3000, "range conflict");
        assert_eq!(
            err.to_string(),
            "failed to expose object 5 at [0x1000, 0x3000): range conflict"
        );
        assert!(matches!(err.into_kind(), ErrorKind::ExposureFailed { key: 5, .. }));
    }
}
