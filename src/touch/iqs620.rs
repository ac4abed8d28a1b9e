//! Azoteq IQS620 capacitive sensor driver.
//!
//! The chip pulls its RDY line low whenever it has events. The board wires
//! RDY to a falling-edge GPIO event and calls [`Iqs620::service`] for each
//! edge; the driver reads the event registers and feeds the
//! [`TouchStateMachine`](super::TouchStateMachine).
//!
//! Generic over `embedded-hal` 1.0 blocking I2C and delay traits so it can
//! be exercised on the host with a register-file mock.

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};

use super::{ProxFusionFlags, TouchHandler, TouchStateMachine};
use crate::config::{
    IQS620_ADDRESS, IQS620_ATI_TARGET, IQS620_PROX_THRESHOLD, IQS620_RESET_SETTLE_MS,
    IQS620_TOUCH_THRESHOLD,
};
use crate::error::{BusError, Error, FatalFault};

/// Register map (subset in use).
pub mod reg {
    pub const ID: u8 = 0x00;
    pub const SYS_FLAGS: u8 = 0x10;
    pub const GLOBAL_EVENTS: u8 = 0x11;
    pub const PROX_FUSION_FLAGS: u8 = 0x12;
    pub const CHANNEL_COUNT_0_LO: u8 = 0x20;
    pub const PROX_FUSION_0_0: u8 = 0x40;
    pub const PROX_FUSION_0_1: u8 = 0x41;
    pub const PROX_FUSION_1_0: u8 = 0x43;
    pub const PROX_FUSION_1_1: u8 = 0x44;
    pub const PROX_FUSION_2_0: u8 = 0x46;
    pub const PROX_FUSION_2_1: u8 = 0x47;
    pub const PROX_THRESHOLD_0: u8 = 0x60;
    pub const TOUCH_THRESHOLD_0: u8 = 0x61;
    pub const PROX_THRESHOLD_1: u8 = 0x62;
    pub const TOUCH_THRESHOLD_1: u8 = 0x63;
    pub const SYS_SETTINGS: u8 = 0xD0;
    pub const ACTIVE_CHANNELS: u8 = 0xD1;
    pub const POWER_MODE: u8 = 0xD2;
}

/// Product identifier read back from [`reg::ID`] (three bytes, big-endian).
pub const ID_VALUE: u32 = 0x41_0D82;

/// Prox/touch channels on the chip.
pub const CHANNELS: u8 = 3;

bitflags! {
    /// GLOBAL_EVENTS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GlobalEvents: u8 {
        const PROX = 1 << 0;
        const SAR = 1 << 1;
        const HALL = 1 << 2;
        const HYST = 1 << 3;
        const TEMP = 1 << 4;
        const SYS = 1 << 5;
        const PMU = 1 << 6;
        const SAR_ACTIVE = 1 << 7;
    }
}

bitflags! {
    /// SYS_FLAGS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysFlags: u8 {
        const NP_UPDATE = 1 << 0;
        const EVENT = 1 << 1;
        const ATI_BUSY = 1 << 2;
        const RESET_HAPPENED = 1 << 7;
    }
}

bitflags! {
    /// SYS_SETTINGS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysSettings: u8 {
        const RESEED = 1 << 0;
        const REDO_ATI = 1 << 1;
        const ATI_BAND_1_16 = 1 << 2;
        const COMMS_ATI = 1 << 3;
        const CLK_4MHZ = 1 << 4;
        const EVENT_MODE = 1 << 5;
        const ACK_RESET = 1 << 6;
        const SOFT_RESET = 1 << 7;
    }
}

// Field values for the configuration table
const CS_RX_0: u8 = 1;
const CS_RX_1: u8 = 2;
const CAP_15PF: u8 = 0 << 6;
const CHG_FREQ_DIV_1_8: u8 = 2 << 4;
const ATI_FULL: u8 = 3;
const ATI_BASE_75: u8 = 0 << 6;
const POWER_MODE_AUTO: u8 = 0 << 3;
const NP_RATE_1_16: u8 = 3;

/// Register writes that put the chip into event mode with channels 0 and 1
/// sensing. Replayed whenever the chip reports it has reset.
pub const CONFIGURATION: [(u8, u8); 13] = [
    (
        reg::SYS_SETTINGS,
        SysSettings::ACK_RESET.bits() | SysSettings::EVENT_MODE.bits() | SysSettings::COMMS_ATI.bits(),
    ),
    (reg::ACTIVE_CHANNELS, 0b11),
    (reg::POWER_MODE, POWER_MODE_AUTO | NP_RATE_1_16),
    (reg::PROX_FUSION_0_0, CS_RX_0),
    (reg::PROX_FUSION_0_1, CS_RX_1),
    (reg::PROX_FUSION_1_0, CAP_15PF | CHG_FREQ_DIV_1_8 | ATI_FULL),
    (reg::PROX_FUSION_1_1, CAP_15PF | CHG_FREQ_DIV_1_8 | ATI_FULL),
    (reg::PROX_FUSION_2_0, ATI_BASE_75 | IQS620_ATI_TARGET),
    (reg::PROX_FUSION_2_1, ATI_BASE_75 | IQS620_ATI_TARGET),
    (reg::PROX_THRESHOLD_0, IQS620_PROX_THRESHOLD),
    (reg::PROX_THRESHOLD_1, IQS620_PROX_THRESHOLD),
    (reg::TOUCH_THRESHOLD_0, IQS620_TOUCH_THRESHOLD),
    (reg::TOUCH_THRESHOLD_1, IQS620_TOUCH_THRESHOLD),
];

/// Trailing write that restarts calibration with the new settings.
const REDO_ATI: u8 =
    SysSettings::EVENT_MODE.bits() | SysSettings::COMMS_ATI.bits() | SysSettings::REDO_ATI.bits();

/// The RDY line's edge event. The pin itself (input, pull-up, falling edge)
/// is set up when the implementor is constructed.
pub trait ReadyLine {
    fn enable(&mut self);
    fn disable(&mut self);
}

pub struct Iqs620<I2C> {
    i2c: I2C,
    address: u8,
    machine: TouchStateMachine,
}

impl<I2C: I2c> Iqs620<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, IQS620_ADDRESS)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            machine: TouchStateMachine::new(),
        }
    }

    /// Soft-reset the chip, verify it is an IQS620, and configure it.
    ///
    /// RDY events are masked from before the reset until the identity check
    /// passes. A wrong identity is fatal.
    pub fn init<R: ReadyLine, D: DelayNs>(&mut self, ready: &mut R, delay: &mut D) -> Result<(), Error> {
        self.machine = TouchStateMachine::new();

        ready.disable();
        self.write_reg(reg::SYS_SETTINGS, SysSettings::SOFT_RESET.bits())?;
        delay.delay_ms(IQS620_RESET_SETTLE_MS);

        let found = self.device_id()?;
        if found != ID_VALUE {
            return Err(FatalFault::DeviceIdentity { expected: ID_VALUE, found }.into());
        }
        ready.enable();

        self.configure()?;
        info!("iqs620: ready");
        Ok(())
    }

    /// Write the full configuration table, then trigger re-calibration.
    pub fn configure(&mut self) -> Result<(), BusError> {
        for (register, value) in CONFIGURATION {
            self.write_reg(register, value)?;
        }
        self.write_reg(reg::SYS_SETTINGS, REDO_ATI)
    }

    /// Handle one RDY edge: read pending events, run the button state
    /// machine, and reconfigure after an unexpected chip reset.
    pub fn service<H: TouchHandler + ?Sized>(&mut self, handler: &mut H) -> Result<GlobalEvents, BusError> {
        let events = GlobalEvents::from_bits_retain(self.read_reg(reg::GLOBAL_EVENTS)?);
        trace!("iqs620: events {=u8:#x}", events.bits());

        if events.contains(GlobalEvents::PROX) {
            let flags = ProxFusionFlags::from_bits_truncate(self.read_reg(reg::PROX_FUSION_FLAGS)?);
            trace!("iqs620: prox flags {=u8:#x}", flags.bits());
            self.machine.update(flags, handler);
        }

        if events.contains(GlobalEvents::SYS) {
            let sys = SysFlags::from_bits_retain(self.read_reg(reg::SYS_FLAGS)?);
            if sys.contains(SysFlags::RESET_HAPPENED) {
                warn!("iqs620: reset detected, reconfiguring");
                self.configure()?;
            }
        }

        Ok(events)
    }

    /// Three-byte product identifier.
    pub fn device_id(&mut self) -> Result<u32, BusError> {
        let mut id = [0u8; 3];
        self.read_regs(reg::ID, &mut id)?;
        Ok(u32::from_be_bytes([0, id[0], id[1], id[2]]))
    }

    /// Raw capacitance count of `channel` (0..[`CHANNELS`]).
    pub fn channel_count(&mut self, channel: u8) -> Result<u16, BusError> {
        if channel >= CHANNELS {
            return Err(BusError::InvalidChannel(channel));
        }
        let mut count = [0u8; 2];
        self.read_regs(reg::CHANNEL_COUNT_0_LO + channel * 2, &mut count)?;
        Ok(u16::from_le_bytes(count))
    }

    /// Bit n set while button n is down.
    pub fn button_status(&self) -> u16 {
        self.machine.button_status()
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    fn write_reg(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(BusError::from_i2c)
    }

    fn read_reg(&mut self, register: u8) -> Result<u8, BusError> {
        let mut value = [0u8];
        self.read_regs(register, &mut value)?;
        Ok(value[0])
    }

    /// Register read. The TWI peripheral sometimes flags a data NACK on
    /// reads that still delivered valid data, so that one is not an error.
    /// An address NACK means the chip did not answer at all.
    fn read_regs(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        match self.i2c.write_read(self.address, &[register], buf) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data | NoAcknowledgeSource::Unknown)
                ) =>
            {
                debug!("iqs620: nack reading {=u8:#x}, keeping data", register);
                Ok(())
            }
            Err(e) => Err(BusError::from_i2c(e)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════
