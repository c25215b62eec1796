//! Error types.

use std::{ffi::c_int, io, path::PathBuf};

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by the device handle and the mailbox client.
///
/// Transport failures and device-reported failures are kept apart: [`Error::Transport`] means the
/// `ioctl` itself failed, while [`Error::DeviceRejected`] means the driver delivered the command
/// and the device answered with a nonzero return code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device node does not exist.
    #[error("device node `{}` not found", .path.display())]
    DeviceNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The device name does not refer to a node inside the device-node directory.
    #[error("invalid device name `{0}`")]
    InvalidDeviceName(String),

    /// The handle was closed (explicitly, or after a failed reopen).
    #[error("device `{}` is closed", .path.display())]
    DeviceClosed { path: PathBuf },

    /// The `ioctl` (or the `open`/`stat` it depends on) failed.
    #[error("mailbox transport failed: {0}")]
    Transport(#[source] io::Error),

    /// A numeric request code that is not one of the two mailbox `ioctl`s.
    #[error("unsupported ioctl request code {0:#010x}")]
    UnsupportedIoctl(u32),

    /// The device completed the command with a nonzero return code.
    #[error("command {id} rejected by device with return code {retval} ({})", describe(.retval))]
    DeviceRejected {
        /// Command ID that was sent.
        id: u32,
        /// The `retval` field written back by the driver.
        retval: u32,
        /// The (non-negative) value returned by `ioctl(2)`.
        rc: c_int,
    },

    /// A buffer returned by the device could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A command ID outside of the command catalog.
    #[error("unknown command id {0}")]
    UnknownCommand(u32),
}

impl Error {
    /// Returns the *errno* value of a transport failure, if there is one.
    pub fn raw_os_error(&self) -> Option<c_int> {
        match self {
            Error::Transport(e) | Error::DeviceNotFound { source: e, .. } => e.raw_os_error(),
            _ => None,
        }
    }
}

/// A buffer did not have the shape of the structure it was decoded into.
///
/// Decoding never reads past the end of the supplied slice; it fails with this error instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{what} needs {needed} bytes, but only {actual} were supplied")]
    Truncated {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("{what} reports {reported}, which exceeds the capacity of {capacity}")]
    Overrun {
        what: &'static str,
        reported: usize,
        capacity: usize,
    },
}

impl DecodeError {
    pub(crate) fn check_len(what: &'static str, needed: usize, bytes: &[u8]) -> Result<(), Self> {
        if bytes.len() < needed {
            Err(DecodeError::Truncated {
                what,
                needed,
                actual: bytes.len(),
            })
        } else {
            Ok(())
        }
    }
}

/// A device-reported mailbox return code (the `retval` field of a sent command).
///
/// Only a handful of codes carry a documented meaning at this layer. Everything else is passed
/// through as-is for the caller to interpret against the opcode it sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReturnCode(pub u32);

impl ReturnCode {
    pub const SUCCESS: Self = Self(0);
    pub const NOT_SUPPORTED: Self = Self(1);
    pub const INVALID_ARGUMENT: Self = Self(2);
    pub const DEVICE_NOT_FOUND: Self = Self(3);
    pub const UNKNOWN_ERROR: Self = Self(255);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn description(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "success",
            Self::NOT_SUPPORTED => "not supported",
            Self::INVALID_ARGUMENT => "invalid argument",
            Self::DEVICE_NOT_FOUND => "device not found",
            Self::UNKNOWN_ERROR => "unknown error",
            _ => return None,
        })
    }
}

fn describe(retval: &u32) -> &'static str {
    ReturnCode(*retval).description().unwrap_or("undocumented")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_table() {
        assert_eq!(ReturnCode(0).description(), Some("success"));
        assert_eq!(ReturnCode(2).description(), Some("invalid argument"));
        assert_eq!(ReturnCode(255).description(), Some("unknown error"));
        assert_eq!(ReturnCode(4).description(), None);
        assert!(ReturnCode(0).is_success());
        assert!(!ReturnCode(1).is_success());
    }

    #[test]
    fn rejected_display() {
        let err = Error::DeviceRejected {
            id: 1,
            retval: 2,
            rc: 0,
        };
        assert_eq!(
            err.to_string(),
            "command 1 rejected by device with return code 2 (invalid argument)"
        );

        let err = Error::DeviceRejected {
            id: 1,
            retval: 7,
            rc: 0,
        };
        assert!(err.to_string().ends_with("(undocumented)"));
    }

    #[test]
    fn short_buffer() {
        assert_eq!(
            DecodeError::check_len("thing", 4, &[0; 3]),
            Err(DecodeError::Truncated {
                what: "thing",
                needed: 4,
                actual: 3
            })
        );
        assert_eq!(DecodeError::check_len("thing", 4, &[0; 4]), Ok(()));
    }

    #[test]
    fn os_error() {
        let err = Error::Transport(io::Error::from_raw_os_error(libc::EBUSY));
        assert_eq!(err.raw_os_error(), Some(libc::EBUSY));
        assert_eq!(Error::UnknownCommand(40).raw_os_error(), None);
    }
}
