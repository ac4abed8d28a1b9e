//! Bluetooth Low Energy subsystem.
//!
//! This module drives the Nordic SoftDevice S132 in **Peripheral** role:
//!
//! 1. **Services** - two vendor GATT services, each a write-only RX
//!    characteristic plus a notify-only TX characteristic. The *console*
//!    service carries REPL text, the *raw* service carries opaque bytes.
//! 2. **Advertising** - connectable advertising with the device name,
//!    flags, and the console service UUID.
//! 3. **Dispatcher** - drains SoC and BLE events from the stack on every
//!    stack interrupt and answers each one, feeding incoming writes into
//!    the per-service RX rings.
//! 4. **Link** - the main-loop side: connection status, negotiated
//!    payload size, transmit, and RX/TX ring access.
//!
//! Connection state lives in [`link::LinkState`], written only by the
//! dispatcher and read lock-free by everyone else.

pub mod adv;
pub mod dispatch;
pub mod link;
pub mod stack;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatch::{DispatchReport, Dispatcher};
pub use link::{BleLink, LinkState, Transmit};
pub use stack::{BleEvent, GattSetup, RadioStack, RawError, SocEvent};

/// Connection handle assigned by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

impl ConnHandle {
    /// Sentinel meaning "no connection".
    pub const INVALID: ConnHandle = ConnHandle(0xFFFF);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// The two byte-stream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceKind {
    /// Nordic UART-compatible REPL console.
    Console,
    /// Opaque data channel.
    Raw,
}

impl ServiceKind {
    /// 128-bit base UUID, big-endian as written in documentation.
    pub const fn base_uuid(self) -> [u8; 16] {
        match self {
            // 6E400000-B5A3-F393-E0A9-E50E24DCCA9E
            ServiceKind::Console => [
                0x6E, 0x40, 0x00, 0x00, 0xB5, 0xA3, 0xF3, 0x93, 0xE0, 0xA9, 0xE5, 0x0E, 0x24,
                0xDC, 0xCA, 0x9E,
            ],
            // E5700000-7BAC-429A-B4CE-57FF900F479D
            ServiceKind::Raw => [
                0xE5, 0x70, 0x00, 0x00, 0x7B, 0xAC, 0x42, 0x9A, 0xB4, 0xCE, 0x57, 0xFF, 0x90,
                0x0F, 0x47, 0x9D,
            ],
        }
    }

    /// Base UUID in the little-endian order the stack expects.
    pub fn base_uuid_le(self) -> [u8; 16] {
        let mut le = self.base_uuid();
        le.reverse();
        le
    }
}

/// Short UUIDs inside each vendor base.
pub const SERVICE_UUID: u16 = 0x0001;
pub const RX_CHAR_UUID: u16 = 0x0002;
pub const TX_CHAR_UUID: u16 = 0x0003;

/// Attribute handles of one byte-stream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceHandles {
    /// Vendor UUID type handle the service was registered under.
    pub uuid_kind: u8,
    pub service: u16,
    /// Value handle of the peer-writable characteristic.
    pub rx_value: u16,
    /// Value handle of the notify characteristic.
    pub tx_value: u16,
    pub tx_cccd: u16,
}

/// Handles of both services, as produced by bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Services {
    pub console: ServiceHandles,
    pub raw: ServiceHandles,
}

impl Services {
    pub fn get(&self, kind: ServiceKind) -> &ServiceHandles {
        match kind {
            ServiceKind::Console => &self.console,
            ServiceKind::Raw => &self.raw,
        }
    }

    /// Which service owns the RX characteristic with this value handle.
    pub fn rx_owner(&self, value_handle: u16) -> Option<ServiceKind> {
        if value_handle == self.console.rx_value {
            Some(ServiceKind::Console)
        } else if value_handle == self.raw.rx_value {
            Some(ServiceKind::Raw)
        } else {
            None
        }
    }
}
