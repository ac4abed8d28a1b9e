//! Application-wide constants and compile-time configuration.
//!
//! All radio parameters, buffer sizes, and touch-controller tuning
//! live here so they can be tuned in one place.

// BLE

/// GAP device name, also carried in the advertising payload.
pub const DEVICE_NAME: &str = "monocle";

/// Largest ATT MTU this device will accept.
pub const BLE_MAX_MTU_LENGTH: u16 = 128;

/// ATT MTU before any exchange has completed.
pub const BLE_DEFAULT_MTU_LENGTH: u16 = 23;

/// ATT header bytes subtracted from the MTU to get the notification payload.
pub const ATT_HEADER_LENGTH: u16 = 3;

/// Advertising interval (in 0.625 ms units). 32 = 20 ms.
pub const ADV_INTERVAL: u32 = (20 * 1000) / 625;

/// Preferred connection interval (in 1.25 ms units). 12 = 15 ms.
pub const CONN_INTERVAL_MIN: u16 = (15 * 1000) / 1250;
pub const CONN_INTERVAL_MAX: u16 = (15 * 1000) / 1250;

/// Number of connection events the peripheral may skip.
pub const SLAVE_LATENCY: u16 = 3;

/// Supervision timeout (in 10 ms units). 200 = 2 s.
pub const CONN_SUP_TIMEOUT: u16 = ((2000_u32 * 1000) / 10000) as u16;

// SoftDevice stack configuration

/// Simultaneous peripheral links.
pub const SD_PERIPH_CONN_COUNT: u8 = 1;

/// Radio time per connection event (in 1.25 ms units).
pub const SD_EVENT_LENGTH: u16 = 3;

/// Queued handle-value notifications per link.
pub const SD_HVN_TX_QUEUE_SIZE: u8 = 1;

/// Vendor-specific 128-bit UUID bases (console + raw).
pub const SD_VS_UUID_COUNT: u8 = 2;

/// Attribute table size in bytes.
pub const SD_ATTR_TAB_SIZE: u32 = 1408;

/// No Service Changed characteristic.
pub const SD_SERVICE_CHANGED: bool = false;

// Buffers

/// Capacity of every byte ring (one slot is always kept empty).
pub const RING_BUFFER_LENGTH: usize = 1024 + 45;

/// Largest single GATT write the stack can deliver to us.
pub const MAX_WRITE_LENGTH: usize = BLE_MAX_MTU_LENGTH as usize;

// Touch controller (IQS620)

/// 7-bit I2C address of the IQS620.
pub const IQS620_ADDRESS: u8 = 0x44;

/// Settle time after a soft reset (ms).
pub const IQS620_RESET_SETTLE_MS: u32 = 10;

/// ATI target value written to both channels.
pub const IQS620_ATI_TARGET: u8 = 0x1E;

/// Proximity threshold for both channels.
pub const IQS620_PROX_THRESHOLD: u8 = 10;

/// Touch threshold for both channels.
pub const IQS620_TOUCH_THRESHOLD: u8 = 10;

// Bootloader

/// GPREGRET value the bootloader checks to stay in DFU mode.
pub const BOOTLOADER_DFU_MAGIC: u32 = 0xB1;

// GPIO pin assignments (Monocle board)
//
// These are logical names; actual `embassy_nrf::peripherals::*` types are
// selected in `main.rs`.
//
//   Touch RDY      → P0.02
//   I2C SDA        → P0.17
//   I2C SCL        → P0.18
