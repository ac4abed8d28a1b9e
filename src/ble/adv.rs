//! Advertising payload builder.
//!
//! Legacy advertising data is a sequence of `[len, type, body...]`
//! structures packed into 31 bytes.

use heapless::Vec;

use super::ServiceKind;
use crate::error::Dropped;

/// Longest legacy advertising payload.
pub const ADV_DATA_MAX_LEN: usize = 31;

// AD types
const AD_FLAGS: u8 = 0x01;
const AD_UUID128_MORE_AVAILABLE: u8 = 0x06;
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// LE General Discoverable, BR/EDR not supported.
const FLAGS_GENERAL_DISC_NO_BREDR: u8 = 0x06;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisingPayload {
    data: Vec<u8, ADV_DATA_MAX_LEN>,
}

impl AdvertisingPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one AD structure. Nothing is written if it does not fit.
    pub fn push_field(&mut self, ad_type: u8, body: &[u8]) -> Result<(), Dropped> {
        let needed = 2 + body.len();
        let dropped = Dropped { kept: 0, lost: needed };
        if needed > self.data.capacity() - self.data.len() || body.len() >= u8::MAX as usize {
            return Err(dropped);
        }
        self.data
            .extend_from_slice(&[1 + body.len() as u8, ad_type])
            .and_then(|()| self.data.extend_from_slice(body))
            .map_err(|()| dropped)
    }

    pub fn complete_name(&mut self, name: &str) -> Result<(), Dropped> {
        self.push_field(AD_COMPLETE_LOCAL_NAME, name.as_bytes())
    }

    pub fn flags(&mut self) -> Result<(), Dropped> {
        self.push_field(AD_FLAGS, &[FLAGS_GENERAL_DISC_NO_BREDR])
    }

    /// Advertise one service of `kind`, as an incomplete 128-bit list.
    pub fn service_uuid(&mut self, kind: ServiceKind, short: u16) -> Result<(), Dropped> {
        self.push_field(AD_UUID128_MORE_AVAILABLE, &uuid128_le(kind, short))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Full 128-bit UUID of `short` within the vendor base of `kind`, in
/// over-the-air (little-endian) order.
pub fn uuid128_le(kind: ServiceKind, short: u16) -> [u8; 16] {
    let mut le = kind.base_uuid_le();
    le[12..14].copy_from_slice(&short.to_le_bytes());
    le
}
