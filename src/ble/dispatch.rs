//! Stack event dispatcher.
//!
//! Runs whenever the stack signals that events are pending. Each run drains
//! the SoC queue first, then the BLE queue, answering every event the
//! stack requires a reply to. Nothing in here waits: an event is handled
//! to completion before the next one is fetched.
//!
//! The dispatcher is the only writer of [`LinkState`] and the only producer
//! into the RX rings.

use super::link::LinkState;
use super::stack::{BleEvent, RadioStack, SocEvent, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION};
use super::{ServiceKind, Services};
use crate::config::{BLE_MAX_MTU_LENGTH, RING_BUFFER_LENGTH};
use crate::error::FatalFault;
use crate::fault::{check, escalate, FaultHandler};
use crate::ring::Producer;

/// GATT client timeout event id. A peripheral never runs client procedures.
pub const BLE_GATTC_EVT_TIMEOUT: u16 = 0x3A;

/// Events handled by one [`Dispatcher::dispatch`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DispatchReport {
    pub soc_events: usize,
    pub ble_events: usize,
    /// Written bytes discarded because an RX ring was full.
    pub rx_dropped: usize,
}

pub struct Dispatcher<'a> {
    state: &'a LinkState,
    services: Services,
    adv_handle: u8,
    console_rx: Producer<'a, RING_BUFFER_LENGTH>,
    raw_rx: Producer<'a, RING_BUFFER_LENGTH>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        state: &'a LinkState,
        services: Services,
        adv_handle: u8,
        console_rx: Producer<'a, RING_BUFFER_LENGTH>,
        raw_rx: Producer<'a, RING_BUFFER_LENGTH>,
    ) -> Self {
        Self { state, services, adv_handle, console_rx, raw_rx }
    }

    /// Drain every pending SoC event, then every pending BLE event.
    ///
    /// Stops at the first fatal fault; events still queued stay unread.
    pub fn dispatch<S: RadioStack>(&mut self, sd: &mut S) -> Result<DispatchReport, FatalFault> {
        let mut report = DispatchReport::default();

        while let Some(evt) = sd.next_soc_event() {
            self.on_soc_event(evt);
            report.soc_events += 1;
        }

        while let Some(evt) = check(sd.next_ble_event())? {
            report.rx_dropped += self.on_ble_event(sd, evt)?;
            report.ble_events += 1;
        }

        Ok(report)
    }

    fn on_soc_event(&mut self, evt: SocEvent) {
        match evt {
            SocEvent::FlashOperationSuccess => debug!("soc: flash operation done"),
            SocEvent::FlashOperationError => warn!("soc: flash operation failed"),
            SocEvent::Other(id) => trace!("soc: event {}", id),
        }
    }

    /// Handle one BLE event. Returns the number of written bytes dropped.
    fn on_ble_event<S: RadioStack>(&mut self, sd: &mut S, evt: BleEvent) -> Result<usize, FatalFault> {
        match evt {
            BleEvent::Connected { conn } => {
                info!("ble: connected ({})", conn.0);
                self.state.on_connected(conn);
                check(sd.update_conn_params(conn))?;
                check(sd.set_empty_sys_attr(conn))?;
            }

            BleEvent::Disconnected { reason, .. } => {
                info!("ble: disconnected (reason {=u8:#x})", reason);
                self.state.on_disconnected();
                check(sd.start_advertising(self.adv_handle))?;
            }

            BleEvent::PhyUpdateRequest { conn } => check(sd.update_phy_auto(conn))?,

            BleEvent::ExchangeMtuRequest { conn, client_rx_mtu } => {
                check(sd.reply_mtu(conn, BLE_MAX_MTU_LENGTH))?;
                let payload = self.state.on_mtu_exchange(client_rx_mtu);
                debug!("ble: client mtu {}, payload now {}", client_rx_mtu, payload);
            }

            BleEvent::Write { handle, data, .. } => {
                let rx = match self.services.rx_owner(handle) {
                    Some(ServiceKind::Console) => &mut self.console_rx,
                    Some(ServiceKind::Raw) => &mut self.raw_rx,
                    // CCCD writes and anything else not addressed to an RX value
                    None => return Ok(0),
                };
                if let Err(dropped) = rx.push_slice(&data) {
                    debug!("ble: rx ring full, dropped {} bytes", dropped.lost);
                    return Ok(dropped.lost);
                }
            }

            BleEvent::GattcTimeout { .. } => {
                return Err(FatalFault::UnexpectedEvent(BLE_GATTC_EVT_TIMEOUT));
            }

            BleEvent::GattsTimeout { conn } => {
                check(sd.disconnect(conn, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION))?;
            }

            BleEvent::SysAttrMissing { conn } => check(sd.set_empty_sys_attr(conn))?,
            BleEvent::SecParamsRequest { conn } => check(sd.reject_pairing(conn))?,
            BleEvent::SecInfoRequest { conn } => check(sd.reply_no_sec_info(conn))?,
            BleEvent::SecRequest { conn } => check(sd.decline_security(conn))?,
            BleEvent::AuthKeyRequest { conn } => check(sd.reply_no_auth_key(conn))?,
            BleEvent::DataLengthUpdateRequest { conn } => check(sd.update_data_length_auto(conn))?,

            // Central-role requests; the stack handles them without a reply from us.
            BleEvent::ConnParamUpdateRequest { .. } | BleEvent::UserMemRequest { .. } => {}

            BleEvent::Other(id) => trace!("ble: unhandled event {=u16:#x}", id),
        }
        Ok(0)
    }
}

/// Run one dispatch and escalate any fault through `faults`.
pub fn dispatch_or_reset<S, H>(
    dispatcher: &mut Dispatcher<'_>,
    sd: &mut S,
    faults: &mut H,
) -> Option<DispatchReport>
where
    S: RadioStack,
    H: FaultHandler + ?Sized,
{
    match dispatcher.dispatch(sd) {
        Ok(report) => Some(report),
        Err(fault) => {
            escalate(faults, fault);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::link::Ring;
    use crate::ble::mock::{Call, MockStack};
    use crate::ble::{ConnHandle, ServiceHandles};
    use crate::ring::Consumer;

    const CONN: ConnHandle = ConnHandle(0);
    const CONSOLE_RX: u16 = 10;
    const RAW_RX: u16 = 20;

    fn services() -> Services {
        Services {
            console: ServiceHandles { rx_value: CONSOLE_RX, tx_value: 12, ..Default::default() },
            raw: ServiceHandles { rx_value: RAW_RX, tx_value: 22, ..Default::default() },
        }
    }

    fn write(handle: u16, data: &[u8]) -> BleEvent {
        BleEvent::Write {
            conn: CONN,
            handle,
            data: heapless::Vec::from_slice(data).unwrap(),
        }
    }

    struct Fixture {
        console: Ring,
        raw: Ring,
        state: LinkState,
    }

    impl Fixture {
        fn new() -> Box<Self> {
            Box::new(Self { console: Ring::new(), raw: Ring::new(), state: LinkState::new() })
        }

        fn split(
            &mut self,
        ) -> (Dispatcher<'_>, Consumer<'_, RING_BUFFER_LENGTH>, Consumer<'_, RING_BUFFER_LENGTH>)
        {
            let (console_tx, console_rx) = self.console.split();
            let (raw_tx, raw_rx) = self.raw.split();
            let dispatcher = Dispatcher::new(&self.state, services(), 0, console_tx, raw_tx);
            (dispatcher, console_rx, raw_rx)
        }
    }

    fn drain(rx: &mut Consumer<'_, RING_BUFFER_LENGTH>) -> Vec<u8> {
        core::iter::from_fn(|| rx.try_pop()).collect()
    }

    // ════════════════════════════════════════════════════════════════════════
    // Connection lifecycle
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn connect_stores_handle_and_requests_params() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        sd.ble_events.push_back(BleEvent::Connected { conn: ConnHandle(4) });

        let report = dispatcher.dispatch(&mut sd).unwrap();
        assert_eq!(report.ble_events, 1);
        assert_eq!(
            sd.calls,
            [Call::UpdateConnParams(ConnHandle(4)), Call::SetEmptySysAttr(ConnHandle(4))]
        );
        assert_eq!(fx.state.conn_handle(), Some(ConnHandle(4)));
    }

    #[test]
    fn disconnect_clears_handle_and_restarts_advertising() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        sd.ble_events.push_back(BleEvent::Connected { conn: CONN });
        sd.ble_events.push_back(BleEvent::Disconnected { conn: CONN, reason: 0x13 });

        dispatcher.dispatch(&mut sd).unwrap();
        assert_eq!(sd.calls.last(), Some(&Call::StartAdvertising(0)));
        assert!(!fx.state.is_connected());
    }

    #[test]
    fn mtu_exchange_replies_with_device_max() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        sd.ble_events.push_back(BleEvent::Connected { conn: CONN });
        sd.ble_events.push_back(BleEvent::ExchangeMtuRequest { conn: CONN, client_rx_mtu: 64 });

        dispatcher.dispatch(&mut sd).unwrap();
        assert!(sd.calls.contains(&Call::ReplyMtu(CONN, 128)));
        assert_eq!(fx.state.effective_payload(), 61);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Writes
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn writes_route_by_handle() {
        let mut fx = Fixture::new();
        let (mut dispatcher, mut console_rx, mut raw_rx) = fx.split();
        let mut sd = MockStack::new();
        sd.ble_events.push_back(write(CONSOLE_RX, b"print(1)\r"));
        sd.ble_events.push_back(write(RAW_RX, &[0xDE, 0xAD]));
        sd.ble_events.push_back(write(CONSOLE_RX + 1, b"cccd"));

        dispatcher.dispatch(&mut sd).unwrap();
        assert_eq!(drain(&mut console_rx), b"print(1)\r");
        assert_eq!(drain(&mut raw_rx), [0xDE, 0xAD]);
        assert!(sd.calls.is_empty());
    }

    #[test]
    fn write_into_nearly_full_ring_is_truncated() {
        let mut fx = Fixture::new();
        let (mut dispatcher, mut console_rx, _) = fx.split();
        let mut sd = MockStack::new();

        // 1068 usable bytes: fill 1060, then write 10 more.
        let capacity = RING_BUFFER_LENGTH - 1;
        for _ in 0..10 {
            sd.ble_events.push_back(write(CONSOLE_RX, &[b'.'; 100]));
        }
        sd.ble_events.push_back(write(CONSOLE_RX, &[b'.'; 60]));
        sd.ble_events.push_back(write(CONSOLE_RX, &[b'!'; 10]));

        let report = dispatcher.dispatch(&mut sd).unwrap();
        assert_eq!(report.rx_dropped, 2);
        let received = drain(&mut console_rx);
        assert_eq!(received.len(), capacity);
        assert_eq!(&received[1060..], &[b'!'; 8]);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Security and housekeeping replies
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn required_replies_are_issued() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        for evt in [
            BleEvent::PhyUpdateRequest { conn: CONN },
            BleEvent::SysAttrMissing { conn: CONN },
            BleEvent::SecParamsRequest { conn: CONN },
            BleEvent::SecInfoRequest { conn: CONN },
            BleEvent::SecRequest { conn: CONN },
            BleEvent::AuthKeyRequest { conn: CONN },
            BleEvent::DataLengthUpdateRequest { conn: CONN },
            BleEvent::GattsTimeout { conn: CONN },
        ] {
            sd.ble_events.push_back(evt);
        }

        dispatcher.dispatch(&mut sd).unwrap();
        assert_eq!(
            sd.calls,
            [
                Call::UpdatePhyAuto(CONN),
                Call::SetEmptySysAttr(CONN),
                Call::RejectPairing(CONN),
                Call::ReplyNoSecInfo(CONN),
                Call::DeclineSecurity(CONN),
                Call::ReplyNoAuthKey(CONN),
                Call::UpdateDataLengthAuto(CONN),
                Call::Disconnect(CONN, 0x13),
            ]
        );
    }

    #[test]
    fn central_only_requests_are_ignored() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        sd.ble_events.push_back(BleEvent::ConnParamUpdateRequest { conn: CONN });
        sd.ble_events.push_back(BleEvent::UserMemRequest { conn: CONN });
        sd.ble_events.push_back(BleEvent::Other(0x99));

        let report = dispatcher.dispatch(&mut sd).unwrap();
        assert_eq!(report.ble_events, 3);
        assert!(sd.calls.is_empty());
    }

    #[test]
    fn soc_events_drain_before_ble_events() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        sd.soc_events.push_back(SocEvent::FlashOperationSuccess);
        sd.soc_events.push_back(SocEvent::FlashOperationError);
        sd.soc_events.push_back(SocEvent::Other(9));
        sd.ble_events.push_back(BleEvent::Connected { conn: CONN });

        let report = dispatcher.dispatch(&mut sd).unwrap();
        assert_eq!(report, DispatchReport { soc_events: 3, ble_events: 1, rx_dropped: 0 });
        assert!(sd.soc_events.is_empty());
    }

    #[test]
    fn nothing_pending_changes_nothing() {
        let mut fx = Fixture::new();
        let (mut dispatcher, console_rx, raw_rx) = fx.split();
        let mut sd = MockStack::new();

        assert_eq!(dispatcher.dispatch(&mut sd).unwrap(), DispatchReport::default());
        assert!(sd.calls.is_empty());
        assert!(console_rx.is_empty() && raw_rx.is_empty());
        assert!(!fx.state.is_connected());
    }

    // ════════════════════════════════════════════════════════════════════════
    // Faults
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn gattc_timeout_is_fatal() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        sd.ble_events.push_back(BleEvent::GattcTimeout { conn: CONN });

        assert_eq!(
            dispatcher.dispatch(&mut sd),
            Err(FatalFault::UnexpectedEvent(BLE_GATTC_EVT_TIMEOUT))
        );
    }

    #[test]
    fn failed_reply_stops_the_drain() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        sd.fail_replies_with = Some(8);
        sd.ble_events.push_back(BleEvent::PhyUpdateRequest { conn: CONN });
        sd.ble_events.push_back(BleEvent::Connected { conn: CONN });

        let fault = dispatcher.dispatch(&mut sd).unwrap_err();
        assert!(matches!(fault, FatalFault::Status { code: 8, file, .. } if file.ends_with("dispatch.rs")));
        assert_eq!(sd.ble_events.len(), 1);
        assert!(!fx.state.is_connected());
    }

    #[derive(Default)]
    struct CountingFaults {
        logs: usize,
        resets: usize,
    }

    impl FaultHandler for CountingFaults {
        fn log(&mut self, _fault: &FatalFault) {
            self.logs += 1;
        }
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn dispatch_or_reset_escalates_once() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        let mut faults = CountingFaults::default();
        sd.ble_events.push_back(BleEvent::GattcTimeout { conn: CONN });
        sd.ble_events.push_back(BleEvent::GattcTimeout { conn: CONN });

        assert_eq!(dispatch_or_reset(&mut dispatcher, &mut sd, &mut faults), None);
        assert_eq!((faults.logs, faults.resets), (1, 1));
    }

    #[test]
    fn dispatch_or_reset_passes_report_through() {
        let mut fx = Fixture::new();
        let (mut dispatcher, _, _) = fx.split();
        let mut sd = MockStack::new();
        let mut faults = CountingFaults::default();

        assert_eq!(
            dispatch_or_reset(&mut dispatcher, &mut sd, &mut faults),
            Some(DispatchReport::default())
        );
        assert_eq!((faults.logs, faults.resets), (0, 0));
    }
}
