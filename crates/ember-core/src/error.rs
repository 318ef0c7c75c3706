//! # EMBER Error Handling
//!
//! One error type for the whole queue/doorbell stack.
//!
//! - Errors are typed and grouped by subsystem
//! - Nothing is retried by this crate family; retry policy belongs to the caller
//! - Errors are `Copy` and `no_std` compatible

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// EMBER Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// EMBER unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Resource not found
    NotFound,
    /// Resource is busy (e.g. reservation contended)
    Busy,

    // =========================================================================
    // Hardware Errors
    // =========================================================================
    /// BAR mapping failed or BAR is unassigned
    BarMappingFailed,
    /// Doorbell index outside every registered range
    OutOfRangeAccess,
    /// Firmware scheduler refused a request
    HardwareRejected(MesStatus),

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Allocation failure (buffer object, bitmap, identifier)
    OutOfMemory,
    /// Address does not resolve to a mapping in the owning VM
    InvalidMapping,
    /// Object is larger than the operation allows
    SizeExceeded,
    /// Address not aligned
    MisalignedAddress,

    // =========================================================================
    // Usermode Queue Errors
    // =========================================================================
    /// No usermode queue functions registered for this engine
    UnsupportedEngine,
    /// Doorbell object handle does not resolve
    InvalidDoorbell,
}

impl Error {
    /// Negative errno equivalent, for the transport layer
    pub const fn to_errno(self) -> i32 {
        match self {
            Self::OutOfMemory => -12,
            Self::Busy => -16,
            Self::NotFound => -2,
            Self::HardwareRejected(_) => -5,
            Self::SizeExceeded
            | Self::InvalidParameter
            | Self::InvalidMapping
            | Self::InvalidDoorbell
            | Self::UnsupportedEngine
            | Self::MisalignedAddress
            | Self::OutOfRangeAccess
            | Self::BarMappingFailed => -22,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NotFound => write!(f, "resource not found"),
            Self::Busy => write!(f, "resource busy"),

            // Hardware
            Self::BarMappingFailed => write!(f, "BAR mapping failed"),
            Self::OutOfRangeAccess => write!(f, "doorbell index outside aperture"),
            Self::HardwareRejected(status) => {
                write!(f, "firmware scheduler rejected request: {}", status)
            }

            // Memory
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidMapping => write!(f, "address has no VM mapping"),
            Self::SizeExceeded => write!(f, "object exceeds permitted size"),
            Self::MisalignedAddress => write!(f, "misaligned address"),

            // Usermode queues
            Self::UnsupportedEngine => write!(f, "usermode queues not supported for engine"),
            Self::InvalidDoorbell => write!(f, "doorbell object does not resolve"),
        }
    }
}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Firmware scheduler (MES) status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MesStatus {
    /// Firmware did not answer in time
    Timeout,
    /// Firmware scheduler has no free hardware queue slot
    NoResources,
    /// Firmware rejected the packet contents
    InvalidPacket,
    /// Queue is not known to the firmware
    QueueNotFound,
    /// Firmware-specific failure code
    Firmware(u32),
}

impl fmt::Display for MesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::NoResources => write!(f, "no resources"),
            Self::InvalidPacket => write!(f, "invalid packet"),
            Self::QueueNotFound => write!(f, "queue not found"),
            Self::Firmware(code) => write!(f, "firmware code 0x{:x}", code),
        }
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<MesStatus> for Error {
    fn from(status: MesStatus) -> Self {
        Error::HardwareRejected(status)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::string::ToString;

    use super::*;

    #[test]
    fn test_mes_status_converts_to_hardware_rejected() {
        let err: Error = MesStatus::NoResources.into();
        assert_eq!(err, Error::HardwareRejected(MesStatus::NoResources));
        assert_eq!(
            err.to_string(),
            "firmware scheduler rejected request: no resources"
        );
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::OutOfMemory.to_errno(), -12);
        assert_eq!(Error::UnsupportedEngine.to_errno(), -22);
        assert_eq!(Error::HardwareRejected(MesStatus::Timeout).to_errno(), -5);
    }
}
