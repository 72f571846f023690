//! Error types for rserprog-core
//!
//! A no_std compatible error type shared by the bus executor and its
//! collaborators. Protocol-level failures are never expressed through
//! this type; they are reported to the host as a NAK at the point of
//! detection.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// SPI transaction with neither a write nor a read phase
    EmptyTransfer,
    /// The write phase of a SPI transaction failed
    BusWriteFailed,
    /// The read phase of a SPI transaction failed
    BusReadFailed,
    /// Requested bus frequency is zero
    InvalidFrequency,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTransfer => write!(f, "SPI transfer with zero write and read length"),
            Self::BusWriteFailed => write!(f, "SPI write failed"),
            Self::BusReadFailed => write!(f, "SPI read failed"),
            Self::InvalidFrequency => write!(f, "bus frequency must be nonzero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
