//! Error types for mboxflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

use crate::mailbox::Command;
use crate::target::TargetError;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Lifecycle errors
    /// Target must be halted before a loader session can start
    NotHalted,
    /// Scratch RAM could not be allocated at the loader's load address
    ResourceUnavailable,
    /// Writing the loader image into target RAM failed
    UploadFailed(TargetError),

    // Command cycle errors
    /// The mailbox never returned to idle within the timeout budget
    OperationTimeout {
        /// Command that was in flight
        command: Command,
    },
    /// The loader completed the command but reported a non-zero status
    DeviceFailure {
        /// Command that failed
        command: Command,
        /// Raw status word written by the loader
        status: u32,
    },
    /// A mailbox register or data window access failed mid-operation
    TransferIOError(TargetError),
    /// A halt/resume/state primitive of the debug target failed
    Target(TargetError),

    // Request errors
    /// Offset and length extend beyond the flash bank
    AddressOutOfBounds,
    /// Sector range is empty or extends beyond the bank
    InvalidSectorRange {
        /// First requested sector
        first: u32,
        /// Last requested sector (inclusive)
        last: u32,
    },

    // Configuration errors
    /// Bank geometry violates `size == sector_count * sector_size`
    InvalidGeometry,
    /// Loader entry point or working size is inconsistent with its image
    InvalidLoader,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotHalted => write!(f, "target not halted"),
            Self::ResourceUnavailable => write!(f, "scratch memory not available at loader address"),
            Self::UploadFailed(e) => write!(f, "failed to load flash helper algorithm: {}", e),
            Self::OperationTimeout { command } => {
                write!(f, "flash operation {} timed out", command)
            }
            Self::DeviceFailure { command, status } => write!(
                f,
                "flash operation {} failed with status 0x{:08X}",
                command, status
            ),
            Self::TransferIOError(e) => write!(f, "mailbox transfer failed: {}", e),
            Self::Target(e) => write!(f, "debug target error: {}", e),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::InvalidSectorRange { first, last } => {
                write!(f, "invalid sector range {}..={}", first, last)
            }
            Self::InvalidGeometry => write!(f, "invalid flash bank geometry"),
            Self::InvalidLoader => write!(f, "invalid loader image"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
