//! Error types for norsim-core
//!
//! Two layers are distinguished: `ConfigError` covers everything that can
//! go wrong while validating a device description (detected once, at
//! construction time), `Error` covers runtime access failures. Protocol
//! violations by the bus master are *not* errors - they are logged and
//! resolved according to `strict_cmd_set`.

use thiserror::Error;

/// Device description validation failure.
///
/// A device that fails validation is never constructed; the host is
/// expected to report the error and drop this device instance only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// `interleave` must be a power of two between 1 and 8
    #[error("invalid interleave {0}: must be 1, 2, 4 or 8")]
    InvalidInterleave(u32),

    /// `bus_width` must be 8, 16, 32 or 64 bits
    #[error("invalid bus width {0}: must be 8, 16, 32 or 64 bits")]
    InvalidBusWidth(u32),

    /// bus width, chip width and interleave do not line up
    #[error("bus width {bus} bits cannot be split over {interleave} chips")]
    WidthMismatch {
        /// configured bus width in bits
        bus: u32,
        /// configured chip count
        interleave: u32,
    },

    /// `max_chip_width` must be at least the chip width
    #[error("max chip width {max} bits is below chip width {chip} bits")]
    MaxChipWidthTooSmall {
        /// configured maximum chip width in bits
        max: u32,
        /// derived chip width in bits
        chip: u32,
    },

    /// `unit_size` is empty or contains an invalid entry
    #[error("invalid unit size list: {0}")]
    InvalidUnitSize(String),

    /// neither `command_set` nor a CFI table to derive it from
    #[error("no command set configured and no CFI table to derive one from")]
    NoCommandSet,

    /// `command_set` outside 1..=4
    #[error("invalid command set id {0}: must be 1-4")]
    InvalidCommandSet(u8),

    /// CFI table malformed or inconsistent with the unit list
    #[error("invalid CFI table: {0}")]
    InvalidCfi(String),

    /// `intel_lock` outside 0..=2
    #[error("invalid intel_lock mode {0}: must be 0, 1 or 2")]
    InvalidLockMode(u8),

    /// write buffer length not usable with the chip width
    #[error("invalid write buffer length {0}")]
    InvalidWriteBufferLen(usize),

    /// a state snapshot could not be applied
    #[error("invalid device state: {0}")]
    InvalidState(String),
}

/// Runtime access failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Access extends beyond the end of the flash
    #[error("address out of bounds")]
    AddressOutOfBounds,

    /// Backing store rejected a read or write
    #[error("backing store I/O failed")]
    StorageError,
}

/// Result type alias using the runtime error type
pub type Result<T> = core::result::Result<T, Error>;
