//! Hardware-independent core of the monocle firmware.
//!
//! Everything that can be tested on the host lives here: the SPSC byte
//! ring, the BLE link manager and event dispatcher (driven through the
//! [`ble::stack`] traits), the console adapter, and the IQS620 touch
//! driver and state machine (driven through `embedded-hal`).
//!
//! Usage: `cargo test --lib`
//!
//! Note: The embedded binary (main.rs, `embedded` feature) supplies the
//! SoftDevice S132 implementation of the stack traits, the board fault
//! handler, and the Embassy tasks that tie the pieces together.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod ble;
pub mod bus;
pub mod config;
pub mod console;
pub mod error;
pub mod fault;
pub mod ring;
pub mod touch;

pub use error::{BusError, Dropped, Error, FatalFault};
