//! Seam between the firmware and the SoftDevice.
//!
//! The S132 is driven through supervisor calls that only exist on target.
//! Everything above this module talks to it through two traits instead:
//!
//! * [`GattSetup`] - one-shot calls made while bringing the stack up.
//! * [`RadioStack`] - event retrieval and the replies the dispatcher and
//!   the transmit path issue at runtime.
//!
//! The on-target implementation lives in the binary (`softdevice.rs`);
//! host tests substitute scripted mocks.

use heapless::Vec;

use super::ConnHandle;
use crate::config::MAX_WRITE_LENGTH;

// nRF status codes we look at by value
pub const NRF_SUCCESS: u32 = 0;
pub const NRF_ERROR_NOT_FOUND: u32 = 5;
pub const NRF_ERROR_INVALID_STATE: u32 = 8;
pub const NRF_ERROR_RESOURCES: u32 = 19;
pub const BLE_ERROR_GATTS_SYS_ATTR_MISSING: u32 = 0x3401;

/// HCI reason sent when we drop a link after a GATT server timeout.
pub const BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION: u8 = 0x13;

/// Non-success status returned by a stack call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawError(pub u32);

impl RawError {
    /// Interpret a raw return code. Only the low 16 bits carry the status;
    /// anything with those clear counts as success.
    pub fn check(code: u32) -> Result<(), RawError> {
        if code & 0x0000_FFFF == NRF_SUCCESS {
            Ok(())
        } else {
            Err(RawError(code))
        }
    }
}

/// A 16-bit UUID, either SIG-assigned or an offset into a registered
/// vendor base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid {
    /// Type handle returned by [`GattSetup::add_vendor_uuid`].
    pub kind: u8,
    pub short: u16,
}

/// Characteristic properties the two services use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CharProps {
    /// Peer writes, with or without response. Open security.
    Write,
    /// Peer subscribes to notifications. Open security.
    Notify,
}

/// Handles of a freshly added characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharHandles {
    pub value: u16,
    pub cccd: u16,
}

/// Preferred peripheral connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    pub min_interval: u16,
    pub max_interval: u16,
    pub slave_latency: u16,
    pub sup_timeout: u16,
}

/// System-on-chip event drained before BLE events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocEvent {
    FlashOperationSuccess,
    FlashOperationError,
    Other(u32),
}

/// BLE event copied out of the stack's event buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent {
    Connected { conn: ConnHandle },
    Disconnected { conn: ConnHandle, reason: u8 },
    PhyUpdateRequest { conn: ConnHandle },
    ExchangeMtuRequest { conn: ConnHandle, client_rx_mtu: u16 },
    Write {
        conn: ConnHandle,
        handle: u16,
        data: Vec<u8, MAX_WRITE_LENGTH>,
    },
    GattcTimeout { conn: ConnHandle },
    GattsTimeout { conn: ConnHandle },
    SysAttrMissing { conn: ConnHandle },
    SecParamsRequest { conn: ConnHandle },
    SecInfoRequest { conn: ConnHandle },
    SecRequest { conn: ConnHandle },
    AuthKeyRequest { conn: ConnHandle },
    DataLengthUpdateRequest { conn: ConnHandle },
    ConnParamUpdateRequest { conn: ConnHandle },
    UserMemRequest { conn: ConnHandle },
    /// Any event id not listed above.
    Other(u16),
}

/// Calls made once while the stack is being brought up.
pub trait GattSetup {
    /// Register a 128-bit vendor base (little-endian bytes), returning its type handle.
    fn add_vendor_uuid(&mut self, base: &[u8; 16]) -> Result<u8, RawError>;

    /// Add a primary service, returning its handle.
    fn add_primary_service(&mut self, uuid: Uuid) -> Result<u16, RawError>;

    /// Add a variable-length characteristic to `service`.
    fn add_characteristic(
        &mut self,
        service: u16,
        uuid: Uuid,
        props: CharProps,
        max_len: u16,
    ) -> Result<CharHandles, RawError>;

    /// Set the GAP device name (open write security).
    fn set_device_name(&mut self, name: &str) -> Result<(), RawError>;

    /// Store the peripheral preferred connection parameters.
    fn set_preferred_conn_params(&mut self, params: &ConnParams) -> Result<(), RawError>;

    /// Configure connectable undirected advertising with `data` as payload.
    /// Returns the advertising set handle.
    fn configure_advertising(&mut self, data: &[u8], interval: u32) -> Result<u8, RawError>;
}

/// Calls made while the stack is running.
pub trait RadioStack {
    /// Next pending SoC event, or `None` once the queue is drained.
    fn next_soc_event(&mut self) -> Option<SocEvent>;

    /// Next pending BLE event, or `None` once the queue is drained.
    fn next_ble_event(&mut self) -> Result<Option<BleEvent>, RawError>;

    /// Request the stored preferred connection parameters on `conn`.
    fn update_conn_params(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    /// Tell the stack there is no stored system attribute state for `conn`.
    fn set_empty_sys_attr(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    fn start_advertising(&mut self, adv_handle: u8) -> Result<(), RawError>;

    /// Accept a PHY update with automatic selection in both directions.
    fn update_phy_auto(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    fn reply_mtu(&mut self, conn: ConnHandle, server_rx_mtu: u16) -> Result<(), RawError>;

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), RawError>;

    /// Answer a security-parameters request with "pairing not supported".
    fn reject_pairing(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    /// Answer a security-info request with no keys.
    fn reply_no_sec_info(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    /// Answer a central's security request without starting pairing.
    fn decline_security(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    /// Answer an auth-key request with no key.
    fn reply_no_auth_key(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    /// Accept a data-length update with automatic parameters.
    fn update_data_length_auto(&mut self, conn: ConnHandle) -> Result<(), RawError>;

    /// Send `data` as a handle-value notification on `value_handle`.
    fn notify(&mut self, conn: ConnHandle, value_handle: u16, data: &[u8]) -> Result<(), RawError>;
}

impl<T: RadioStack + ?Sized> RadioStack for &mut T {
    fn next_soc_event(&mut self) -> Option<SocEvent> {
        (**self).next_soc_event()
    }
    fn next_ble_event(&mut self) -> Result<Option<BleEvent>, RawError> {
        (**self).next_ble_event()
    }
    fn update_conn_params(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).update_conn_params(conn)
    }
    fn set_empty_sys_attr(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).set_empty_sys_attr(conn)
    }
    fn start_advertising(&mut self, adv_handle: u8) -> Result<(), RawError> {
        (**self).start_advertising(adv_handle)
    }
    fn update_phy_auto(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).update_phy_auto(conn)
    }
    fn reply_mtu(&mut self, conn: ConnHandle, server_rx_mtu: u16) -> Result<(), RawError> {
        (**self).reply_mtu(conn, server_rx_mtu)
    }
    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), RawError> {
        (**self).disconnect(conn, reason)
    }
    fn reject_pairing(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).reject_pairing(conn)
    }
    fn reply_no_sec_info(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).reply_no_sec_info(conn)
    }
    fn decline_security(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).decline_security(conn)
    }
    fn reply_no_auth_key(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).reply_no_auth_key(conn)
    }
    fn update_data_length_auto(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        (**self).update_data_length_auto(conn)
    }
    fn notify(&mut self, conn: ConnHandle, value_handle: u16, data: &[u8]) -> Result<(), RawError> {
        (**self).notify(conn, value_handle, data)
    }
}
