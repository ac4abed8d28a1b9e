//! Scripted stand-in for the SoftDevice used by unit tests.

use std::collections::VecDeque;
use std::vec::Vec;

use super::stack::{
    BleEvent, CharHandles, CharProps, ConnParams, GattSetup, RadioStack, RawError, SocEvent, Uuid,
};
use super::ConnHandle;

/// One recorded stack call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddVendorUuid([u8; 16]),
    AddService(Uuid),
    AddCharacteristic(u16, Uuid, CharProps),
    SetDeviceName,
    SetPpcp,
    ConfigureAdvertising,
    StartAdvertising(u8),
    UpdateConnParams(ConnHandle),
    SetEmptySysAttr(ConnHandle),
    UpdatePhyAuto(ConnHandle),
    ReplyMtu(ConnHandle, u16),
    Disconnect(ConnHandle, u8),
    RejectPairing(ConnHandle),
    ReplyNoSecInfo(ConnHandle),
    DeclineSecurity(ConnHandle),
    ReplyNoAuthKey(ConnHandle),
    UpdateDataLengthAuto(ConnHandle),
    Notify(ConnHandle, u16),
}

pub struct MockStack {
    pub soc_events: VecDeque<SocEvent>,
    pub ble_events: VecDeque<BleEvent>,
    pub calls: Vec<Call>,
    pub notifications: Vec<(u16, Vec<u8>)>,
    /// Status codes consumed by successive `notify` calls; empty means success.
    pub notify_results: VecDeque<u32>,
    /// Status code returned by every runtime reply call.
    pub fail_replies_with: Option<u32>,
    /// Status code returned by every setup call.
    pub fail_setup_with: Option<u32>,
    pub adv_data: Vec<u8>,
    next_handle: u16,
    next_uuid_kind: u8,
}

impl MockStack {
    pub fn new() -> Self {
        Self {
            soc_events: VecDeque::new(),
            ble_events: VecDeque::new(),
            calls: Vec::new(),
            notifications: Vec::new(),
            notify_results: VecDeque::new(),
            fail_replies_with: None,
            fail_setup_with: None,
            adv_data: Vec::new(),
            next_handle: 10,
            next_uuid_kind: 2,
        }
    }

    fn setup(&mut self, call: Call) -> Result<(), RawError> {
        self.calls.push(call);
        match self.fail_setup_with {
            Some(code) => Err(RawError(code)),
            None => Ok(()),
        }
    }

    fn reply(&mut self, call: Call) -> Result<(), RawError> {
        self.calls.push(call);
        match self.fail_replies_with {
            Some(code) => Err(RawError(code)),
            None => Ok(()),
        }
    }

    fn handle(&mut self) -> u16 {
        let h = self.next_handle;
        self.next_handle += 2;
        h
    }
}

impl GattSetup for MockStack {
    fn add_vendor_uuid(&mut self, base: &[u8; 16]) -> Result<u8, RawError> {
        self.setup(Call::AddVendorUuid(*base))?;
        let kind = self.next_uuid_kind;
        self.next_uuid_kind += 1;
        Ok(kind)
    }

    fn add_primary_service(&mut self, uuid: Uuid) -> Result<u16, RawError> {
        self.setup(Call::AddService(uuid))?;
        Ok(self.handle())
    }

    fn add_characteristic(
        &mut self,
        service: u16,
        uuid: Uuid,
        props: CharProps,
        _max_len: u16,
    ) -> Result<CharHandles, RawError> {
        self.setup(Call::AddCharacteristic(service, uuid, props))?;
        let value = self.handle();
        Ok(CharHandles { value, cccd: value + 1 })
    }

    fn set_device_name(&mut self, _name: &str) -> Result<(), RawError> {
        self.setup(Call::SetDeviceName)
    }

    fn set_preferred_conn_params(&mut self, _params: &ConnParams) -> Result<(), RawError> {
        self.setup(Call::SetPpcp)
    }

    fn configure_advertising(&mut self, data: &[u8], _interval: u32) -> Result<u8, RawError> {
        self.setup(Call::ConfigureAdvertising)?;
        self.adv_data = data.to_vec();
        Ok(0)
    }
}

impl RadioStack for MockStack {
    fn next_soc_event(&mut self) -> Option<SocEvent> {
        self.soc_events.pop_front()
    }

    fn next_ble_event(&mut self) -> Result<Option<BleEvent>, RawError> {
        Ok(self.ble_events.pop_front())
    }

    fn update_conn_params(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::UpdateConnParams(conn))
    }

    fn set_empty_sys_attr(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::SetEmptySysAttr(conn))
    }

    fn start_advertising(&mut self, adv_handle: u8) -> Result<(), RawError> {
        self.reply(Call::StartAdvertising(adv_handle))
    }

    fn update_phy_auto(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::UpdatePhyAuto(conn))
    }

    fn reply_mtu(&mut self, conn: ConnHandle, server_rx_mtu: u16) -> Result<(), RawError> {
        self.reply(Call::ReplyMtu(conn, server_rx_mtu))
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), RawError> {
        self.reply(Call::Disconnect(conn, reason))
    }

    fn reject_pairing(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::RejectPairing(conn))
    }

    fn reply_no_sec_info(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::ReplyNoSecInfo(conn))
    }

    fn decline_security(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::DeclineSecurity(conn))
    }

    fn reply_no_auth_key(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::ReplyNoAuthKey(conn))
    }

    fn update_data_length_auto(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        self.reply(Call::UpdateDataLengthAuto(conn))
    }

    fn notify(&mut self, conn: ConnHandle, value_handle: u16, data: &[u8]) -> Result<(), RawError> {
        self.calls.push(Call::Notify(conn, value_handle));
        let code = self.notify_results.pop_front().unwrap_or(0);
        RawError::check(code)?;
        self.notifications.push((value_handle, data.to_vec()));
        Ok(())
    }
}
