//! Error kinds shared across the whole LED dispatch engine.

use std::io;

/// Errors a transport, probe routine, or engine method can return.
///
/// Mirrors the error kinds from `SPEC_FULL.md` §7. Transports never panic;
/// every fallible operation returns one of these instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required argument was null/empty where a value was required.
    #[error("null or empty argument: {0}")]
    NullArg(&'static str),

    /// Allocation failed while building a registry or buffer.
    #[error("out of memory")]
    OutOfMemory,

    /// A device-tree or sysfs path was malformed or did not resolve.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The pattern is not representable by this transport/controller at all.
    #[error("pattern {pattern} is not representable on this transport")]
    InvalidState {
        /// Name of the unrepresentable pattern.
        pattern: String,
    },

    /// The pattern is representable in general but this hardware instance
    /// does not currently support it (capability bit absent, etc).
    #[error("pattern {pattern} is not supported by this controller")]
    NotSupported {
        /// Name of the unsupported pattern.
        pattern: String,
    },

    /// A wire structure (SES page, SMP frame, NPEM capability) failed to parse.
    #[error("malformed data: {0}")]
    DataError(String),

    /// A syscall (open/read/write/ioctl) failed.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A `stat`-family call failed or returned unexpected metadata.
    #[error("stat error: {0}")]
    StatError(String),
}

impl Error {
    /// Builds an [`Error::InvalidState`] for a pattern name.
    #[must_use]
    pub fn invalid_state(pattern: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            pattern: pattern.to_string(),
        }
    }

    /// Builds an [`Error::NotSupported`] for a pattern name.
    #[must_use]
    pub fn not_supported(pattern: impl std::fmt::Display) -> Self {
        Self::NotSupported {
            pattern: pattern.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::OutOfMemory.to_string(), "out of memory");
        assert_eq!(
            Error::invalid_state("REBUILD").to_string(),
            "pattern REBUILD is not representable on this transport"
        );
        assert_eq!(
            Error::not_supported("PFA").to_string(),
            "pattern PFA is not supported by this controller"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::from(io::ErrorKind::NotFound);
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
    }
}
