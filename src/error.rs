//! Error types for the monocle firmware core.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Three kinds with different fates:
//!
//! * [`FatalFault`] - the device cannot continue; handed to
//!   [`crate::fault::escalate`] which logs it once and resets.
//! * [`BusError`] - an I2C transaction failed; returned to the caller.
//! * [`Dropped`] - bytes were discarded because a ring was full; reported,
//!   never escalated.

/// Unrecoverable condition. Every one of these ends in a system reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalFault {
    /// A radio-stack call returned a non-success status.
    Status {
        /// Raw status code as returned by the stack.
        code: u32,
        /// Source file of the failing call.
        file: &'static str,
        /// Source line of the failing call.
        line: u32,
    },

    /// The touch controller answered with an unexpected product identifier.
    DeviceIdentity { expected: u32, found: u32 },

    /// The stack delivered an event a peripheral-only device never expects.
    UnexpectedEvent(u16),

    /// The SoftDevice hit an internal assertion and called the fault handler.
    StackAssert { id: u32, pc: u32, info: u32 },
}

/// I2C transaction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The addressed device did not acknowledge, or dropped off the bus.
    Nack,
    /// Any other bus-level failure (arbitration loss, overrun, ...).
    Other,
    /// Register access outside what the device has; nothing was sent.
    InvalidChannel(u8),
}

/// Bytes that did not fit into a ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Dropped {
    /// Bytes accepted before the ring filled up.
    pub kept: usize,
    /// Bytes discarded.
    pub lost: usize,
}

/// Top-level error type for operations that can fail more than one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Fatal(FatalFault),
    Bus(BusError),
    Dropped(Dropped),
}

// Convenience conversions

impl From<FatalFault> for Error {
    fn from(e: FatalFault) -> Self {
        Error::Fatal(e)
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Error::Bus(e)
    }
}

impl From<Dropped> for Error {
    fn from(e: Dropped) -> Self {
        Error::Dropped(e)
    }
}

impl BusError {
    /// Classify a HAL bus error.
    pub fn from_i2c<E: embedded_hal::i2c::Error>(e: E) -> Self {
        use embedded_hal::i2c::ErrorKind;
        match e.kind() {
            ErrorKind::NoAcknowledge(_) => BusError::Nack,
            _ => BusError::Other,
        }
    }
}
