//! Link manager: bring-up, connection state, and the main-loop side of the
//! two byte-stream services.

use core::sync::atomic::{AtomicU16, Ordering};

use super::adv::AdvertisingPayload;
use super::stack::{
    CharProps, ConnParams, GattSetup, RadioStack, RawError, Uuid,
    BLE_ERROR_GATTS_SYS_ATTR_MISSING, NRF_ERROR_INVALID_STATE, NRF_ERROR_RESOURCES,
};
use super::{
    ConnHandle, ServiceHandles, ServiceKind, Services, RX_CHAR_UUID, SERVICE_UUID, TX_CHAR_UUID,
};
use crate::config::{
    ADV_INTERVAL, ATT_HEADER_LENGTH, BLE_DEFAULT_MTU_LENGTH, BLE_MAX_MTU_LENGTH,
    CONN_INTERVAL_MAX, CONN_INTERVAL_MIN, CONN_SUP_TIMEOUT, DEVICE_NAME, MAX_WRITE_LENGTH,
    RING_BUFFER_LENGTH, SLAVE_LATENCY,
};
use crate::error::{Dropped, FatalFault};
use crate::fault::check;
use crate::ring::{Consumer, Producer, RingBuffer};

/// Ring type used for every RX and TX queue.
pub type Ring = RingBuffer<RING_BUFFER_LENGTH>;

// ═══════════════════════════════════════════════════════════════════════════
// Connection state
// ═══════════════════════════════════════════════════════════════════════════

/// Connection handle and negotiated notification payload.
///
/// Written only from the dispatcher; read from anywhere.
pub struct LinkState {
    conn: AtomicU16,
    payload: AtomicU16,
}

impl LinkState {
    pub const fn new() -> Self {
        Self {
            conn: AtomicU16::new(ConnHandle::INVALID.0),
            payload: AtomicU16::new(BLE_DEFAULT_MTU_LENGTH - ATT_HEADER_LENGTH),
        }
    }

    pub fn conn_handle(&self) -> Option<ConnHandle> {
        let conn = ConnHandle(self.conn.load(Ordering::Acquire));
        conn.is_valid().then_some(conn)
    }

    pub fn is_connected(&self) -> bool {
        self.conn_handle().is_some()
    }

    /// Largest notification body the current link accepts.
    pub fn effective_payload(&self) -> usize {
        self.payload.load(Ordering::Acquire) as usize
    }

    pub(crate) fn on_connected(&self, conn: ConnHandle) {
        self.payload
            .store(BLE_DEFAULT_MTU_LENGTH - ATT_HEADER_LENGTH, Ordering::Release);
        self.conn.store(conn.0, Ordering::Release);
    }

    pub(crate) fn on_disconnected(&self) {
        self.conn.store(ConnHandle::INVALID.0, Ordering::Release);
    }

    /// Record the outcome of an MTU exchange and return the new payload size.
    pub(crate) fn on_mtu_exchange(&self, client_rx_mtu: u16) -> u16 {
        let payload = negotiated_payload(BLE_MAX_MTU_LENGTH, client_rx_mtu);
        self.payload.store(payload, Ordering::Release);
        payload
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification payload after an MTU exchange: the smaller of both sides'
/// MTU, less the ATT header.
pub fn negotiated_payload(device_max_mtu: u16, client_mtu: u16) -> u16 {
    device_max_mtu.min(client_mtu).saturating_sub(ATT_HEADER_LENGTH)
}

// ═══════════════════════════════════════════════════════════════════════════
// Bring-up
// ═══════════════════════════════════════════════════════════════════════════

/// Register `kind`'s vendor base and add its service with an RX (write)
/// and a TX (notify) characteristic.
pub fn configure_service(
    sd: &mut impl GattSetup,
    kind: ServiceKind,
) -> Result<ServiceHandles, FatalFault> {
    let uuid_kind = check(sd.add_vendor_uuid(&kind.base_uuid_le()))?;
    let uuid = |short| Uuid { kind: uuid_kind, short };

    let service = check(sd.add_primary_service(uuid(SERVICE_UUID)))?;
    let max_len = BLE_MAX_MTU_LENGTH - ATT_HEADER_LENGTH;
    let rx = check(sd.add_characteristic(service, uuid(RX_CHAR_UUID), CharProps::Write, max_len))?;
    let tx = check(sd.add_characteristic(service, uuid(TX_CHAR_UUID), CharProps::Notify, max_len))?;

    debug!("ble: {} service at {}, rx {} tx {}", kind, service, rx.value, tx.value);

    Ok(ServiceHandles {
        uuid_kind,
        service,
        rx_value: rx.value,
        tx_value: tx.value,
        tx_cccd: tx.cccd,
    })
}

/// Build the advertising payload, configure it, and start advertising.
/// Returns the advertising set handle to restart with after a disconnect.
pub fn start_advertising<S: GattSetup + RadioStack>(sd: &mut S) -> Result<u8, FatalFault> {
    let mut adv = AdvertisingPayload::new();
    let built = adv
        .complete_name(DEVICE_NAME)
        .and_then(|_| adv.flags())
        .and_then(|_| adv.service_uuid(ServiceKind::Console, SERVICE_UUID));
    if let Err(dropped) = built {
        warn!("ble: advertising payload truncated by {} bytes", dropped.lost);
    }

    let adv_handle = check(sd.configure_advertising(adv.as_bytes(), ADV_INTERVAL))?;
    check(sd.start_advertising(adv_handle))?;
    info!("ble: advertising as {=str}", DEVICE_NAME);
    Ok(adv_handle)
}

/// GAP setup, both services, then advertising. Any stack failure is fatal.
pub fn bring_up<S: GattSetup + RadioStack>(sd: &mut S) -> Result<(Services, u8), FatalFault> {
    check(sd.set_device_name(DEVICE_NAME))?;
    check(sd.set_preferred_conn_params(&ConnParams {
        min_interval: CONN_INTERVAL_MIN,
        max_interval: CONN_INTERVAL_MAX,
        slave_latency: SLAVE_LATENCY,
        sup_timeout: CONN_SUP_TIMEOUT,
    }))?;

    let services = Services {
        console: configure_service(sd, ServiceKind::Console)?,
        raw: configure_service(sd, ServiceKind::Raw)?,
    };
    let adv_handle = start_advertising(sd)?;
    Ok((services, adv_handle))
}

// ═══════════════════════════════════════════════════════════════════════════
// Main-loop side
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome of a single notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transmit {
    /// This many bytes went out as one notification.
    Sent(usize),
    /// The stack's notification queue is full (`NRF_ERROR_RESOURCES`);
    /// retry later.
    Busy,
    /// No central is connected. Nothing was sent.
    NotConnected,
    /// The central has not enabled notifications. Nothing was sent.
    ///
    /// Covers `NRF_ERROR_INVALID_STATE` (CCCD not enabled) and
    /// `BLE_ERROR_GATTS_SYS_ATTR_MISSING` (system attributes not yet set on
    /// this link). Every other non-success status is fatal.
    NotSubscribed,
}

/// Rings owned by the main loop for one service.
pub struct ServicePort<'a> {
    /// Bytes written by the peer, filled by the dispatcher.
    pub rx: Consumer<'a, RING_BUFFER_LENGTH>,
    /// Outgoing bytes waiting for [`BleLink::flush`].
    pub tx_in: Producer<'a, RING_BUFFER_LENGTH>,
    pub tx_out: Consumer<'a, RING_BUFFER_LENGTH>,
}

impl<'a> ServicePort<'a> {
    pub fn new(
        rx: Consumer<'a, RING_BUFFER_LENGTH>,
        tx: (Producer<'a, RING_BUFFER_LENGTH>, Consumer<'a, RING_BUFFER_LENGTH>),
    ) -> Self {
        Self { rx, tx_in: tx.0, tx_out: tx.1 }
    }
}

pub struct BleLink<'a> {
    state: &'a LinkState,
    services: Services,
    console: ServicePort<'a>,
    raw: ServicePort<'a>,
}

impl<'a> BleLink<'a> {
    pub fn new(
        state: &'a LinkState,
        services: Services,
        console: ServicePort<'a>,
        raw: ServicePort<'a>,
    ) -> Self {
        Self { state, services, console, raw }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn effective_payload(&self) -> usize {
        self.state.effective_payload()
    }

    pub fn is_rx_pending(&self, kind: ServiceKind) -> bool {
        !self.port(kind).rx.is_empty()
    }

    pub fn read_byte(&mut self, kind: ServiceKind) -> Option<u8> {
        self.port_mut(kind).rx.try_pop()
    }

    /// Send at most one payload's worth of `bytes` as a notification on
    /// `kind`'s TX characteristic.
    pub fn transmit<S: RadioStack>(
        &self,
        sd: &mut S,
        kind: ServiceKind,
        bytes: &[u8],
    ) -> Result<Transmit, FatalFault> {
        let Some(conn) = self.state.conn_handle() else {
            return Ok(Transmit::NotConnected);
        };
        let len = bytes.len().min(self.state.effective_payload());
        let handle = self.services.get(kind).tx_value;

        match sd.notify(conn, handle, &bytes[..len]) {
            Ok(()) => Ok(Transmit::Sent(len)),
            Err(RawError(code)) => match code & 0x0000_FFFF {
                NRF_ERROR_RESOURCES => Ok(Transmit::Busy),
                NRF_ERROR_INVALID_STATE | BLE_ERROR_GATTS_SYS_ATTR_MISSING => {
                    Ok(Transmit::NotSubscribed)
                }
                _ => check(Err(RawError(code))),
            },
        }
    }

    /// Queue `bytes` for [`flush`](Self::flush). Output produced while no
    /// central is connected is discarded.
    pub fn queue(&mut self, kind: ServiceKind, bytes: &[u8]) -> Result<(), Dropped> {
        if !self.is_connected() {
            return Ok(());
        }
        self.port_mut(kind).tx_in.push_slice(bytes)
    }

    /// Bytes waiting in `kind`'s TX ring.
    pub fn pending_tx(&self, kind: ServiceKind) -> usize {
        self.port(kind).tx_out.len()
    }

    /// Drain `kind`'s TX ring in payload-sized notifications until it is
    /// empty or the stack pushes back. Returns the bytes sent.
    pub fn flush<S: RadioStack>(&mut self, sd: &mut S, kind: ServiceKind) -> Result<usize, FatalFault> {
        let mut chunk = [0u8; MAX_WRITE_LENGTH];
        let mut sent = 0;
        loop {
            let limit = self.effective_payload().min(chunk.len());
            let n = self.port(kind).tx_out.peek_into(&mut chunk[..limit]);
            if n == 0 {
                return Ok(sent);
            }
            match self.transmit(sd, kind, &chunk[..n])? {
                Transmit::Sent(k) => {
                    self.port_mut(kind).tx_out.discard(k);
                    sent += k;
                }
                Transmit::Busy => return Ok(sent),
                Transmit::NotSubscribed => self.port_mut(kind).tx_out.discard(n),
                Transmit::NotConnected => {
                    self.port_mut(kind).tx_out.discard(usize::MAX);
                    return Ok(sent);
                }
            }
        }
    }

    fn port(&self, kind: ServiceKind) -> &ServicePort<'a> {
        match kind {
            ServiceKind::Console => &self.console,
            ServiceKind::Raw => &self.raw,
        }
    }

    fn port_mut(&mut self, kind: ServiceKind) -> &mut ServicePort<'a> {
        match kind {
            ServiceKind::Console => &mut self.console,
            ServiceKind::Raw => &mut self.raw,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::{Call, MockStack};
    use crate::ble::stack::NRF_SUCCESS;

    // ════════════════════════════════════════════════════════════════════════
    // MTU negotiation
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn payload_uses_the_smaller_mtu() {
        assert_eq!(negotiated_payload(128, 64), 61);
        assert_eq!(negotiated_payload(128, 200), 125);
        assert_eq!(negotiated_payload(128, 128), 125);
    }

    #[test]
    fn payload_never_underflows() {
        assert_eq!(negotiated_payload(128, 2), 0);
    }

    #[test]
    fn link_state_tracks_connection() {
        let state = LinkState::new();
        assert!(!state.is_connected());
        assert_eq!(state.effective_payload(), 20);

        state.on_connected(ConnHandle(3));
        assert_eq!(state.conn_handle(), Some(ConnHandle(3)));
        assert_eq!(state.on_mtu_exchange(64), 61);
        assert_eq!(state.effective_payload(), 61);

        state.on_disconnected();
        assert!(!state.is_connected());
    }

    #[test]
    fn reconnect_resets_payload_to_default() {
        let state = LinkState::new();
        state.on_connected(ConnHandle(0));
        state.on_mtu_exchange(247);
        state.on_disconnected();
        state.on_connected(ConnHandle(1));
        assert_eq!(state.effective_payload(), 20);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Bring-up
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn bring_up_order() {
        let mut sd = MockStack::new();
        let (services, adv_handle) = bring_up(&mut sd).unwrap();

        assert_eq!(sd.calls[0], Call::SetDeviceName);
        assert_eq!(sd.calls[1], Call::SetPpcp);
        assert_eq!(sd.calls[2], Call::AddVendorUuid(ServiceKind::Console.base_uuid_le()));
        assert!(sd.calls.contains(&Call::AddVendorUuid(ServiceKind::Raw.base_uuid_le())));
        assert_eq!(sd.calls.last(), Some(&Call::StartAdvertising(adv_handle)));

        assert_ne!(services.console.rx_value, services.raw.rx_value);
        assert_ne!(services.console.rx_value, services.console.tx_value);
    }

    #[test]
    fn advertising_payload_carries_name_flags_and_console_uuid() {
        let mut sd = MockStack::new();
        start_advertising(&mut sd).unwrap();
        let adv = sd.adv_data.as_slice();
        assert_eq!(&adv[..9], &[8, 0x09, b'm', b'o', b'n', b'o', b'c', b'l', b'e']);
        assert_eq!(&adv[9..12], &[2, 0x01, 0x06]);
        assert_eq!(adv[13], 0x06);
        assert_eq!(adv.len(), 30);
    }

    #[test]
    fn setup_failure_is_fatal_with_location() {
        let mut sd = MockStack::new();
        sd.fail_setup_with = Some(4);
        match configure_service(&mut sd, ServiceKind::Console) {
            Err(FatalFault::Status { code, file, line }) => {
                assert_eq!(code, 4);
                assert!(file.ends_with("link.rs"));
                assert!(line > 0);
            }
            other => panic!("expected status fault, got {:?}", other),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // Transmit
    // ════════════════════════════════════════════════════════════════════════

    fn services() -> Services {
        Services {
            console: ServiceHandles { rx_value: 10, tx_value: 12, ..Default::default() },
            raw: ServiceHandles { rx_value: 20, tx_value: 22, ..Default::default() },
        }
    }

    struct Rings {
        console_rx: Ring,
        console_tx: Ring,
        raw_rx: Ring,
        raw_tx: Ring,
    }

    impl Rings {
        fn new() -> Box<Self> {
            Box::new(Self {
                console_rx: Ring::new(),
                console_tx: Ring::new(),
                raw_rx: Ring::new(),
                raw_tx: Ring::new(),
            })
        }
    }

    fn link<'a>(state: &'a LinkState, rings: &'a mut Rings) -> BleLink<'a> {
        let (_, console_rx) = rings.console_rx.split();
        let (_, raw_rx) = rings.raw_rx.split();
        BleLink::new(
            state,
            services(),
            ServicePort::new(console_rx, rings.console_tx.split()),
            ServicePort::new(raw_rx, rings.raw_tx.split()),
        )
    }

    #[test]
    fn transmit_without_connection_sends_nothing() {
        let state = LinkState::new();
        let mut rings = Rings::new();
        let link = link(&state, &mut rings);
        let mut sd = MockStack::new();
        assert_eq!(
            link.transmit(&mut sd, ServiceKind::Console, b"hi").unwrap(),
            Transmit::NotConnected
        );
        assert!(sd.notifications.is_empty());
    }

    #[test]
    fn transmit_truncates_to_payload() {
        let state = LinkState::new();
        state.on_connected(ConnHandle(1));
        let mut rings = Rings::new();
        let link = link(&state, &mut rings);
        let mut sd = MockStack::new();

        let data = [0x55u8; 40];
        assert_eq!(link.transmit(&mut sd, ServiceKind::Raw, &data).unwrap(), Transmit::Sent(20));
        assert_eq!(sd.notifications[0].0, 22);
        assert_eq!(sd.notifications[0].1.len(), 20);
    }

    #[test]
    fn transmit_maps_backpressure_and_subscription() {
        let state = LinkState::new();
        state.on_connected(ConnHandle(1));
        let mut rings = Rings::new();
        let link = link(&state, &mut rings);
        let mut sd = MockStack::new();

        sd.notify_results.push_back(NRF_ERROR_RESOURCES);
        sd.notify_results.push_back(NRF_ERROR_INVALID_STATE);
        sd.notify_results.push_back(BLE_ERROR_GATTS_SYS_ATTR_MISSING);
        sd.notify_results.push_back(3);
        assert_eq!(link.transmit(&mut sd, ServiceKind::Console, b"x").unwrap(), Transmit::Busy);
        for _ in 0..2 {
            assert_eq!(
                link.transmit(&mut sd, ServiceKind::Console, b"x").unwrap(),
                Transmit::NotSubscribed
            );
        }
        assert!(matches!(
            link.transmit(&mut sd, ServiceKind::Console, b"x"),
            Err(FatalFault::Status { code: 3, .. })
        ));
    }

    #[test]
    fn queue_discards_while_disconnected() {
        let state = LinkState::new();
        let mut rings = Rings::new();
        let mut link = link(&state, &mut rings);
        link.queue(ServiceKind::Console, b"lost").unwrap();
        assert_eq!(link.pending_tx(ServiceKind::Console), 0);
    }

    #[test]
    fn flush_chunks_by_payload() {
        let state = LinkState::new();
        state.on_connected(ConnHandle(1));
        state.on_mtu_exchange(23 + 7);
        let mut rings = Rings::new();
        let mut link = link(&state, &mut rings);
        let mut sd = MockStack::new();

        let text = [b'a'; 60];
        link.queue(ServiceKind::Console, &text).unwrap();
        assert_eq!(link.flush(&mut sd, ServiceKind::Console).unwrap(), 60);

        let sizes: Vec<usize> = sd.notifications.iter().map(|n| n.1.len()).collect();
        assert_eq!(sizes, [27, 27, 6]);
        assert!(sd.notifications.iter().all(|n| n.0 == 12));
        assert_eq!(link.pending_tx(ServiceKind::Console), 0);
    }

    #[test]
    fn flush_keeps_bytes_when_busy() {
        let state = LinkState::new();
        state.on_connected(ConnHandle(1));
        let mut rings = Rings::new();
        let mut link = link(&state, &mut rings);
        let mut sd = MockStack::new();

        link.queue(ServiceKind::Console, &[b'z'; 30]).unwrap();
        sd.notify_results.push_back(NRF_SUCCESS);
        sd.notify_results.push_back(NRF_ERROR_RESOURCES);
        assert_eq!(link.flush(&mut sd, ServiceKind::Console).unwrap(), 20);
        assert_eq!(link.pending_tx(ServiceKind::Console), 10);

        assert_eq!(link.flush(&mut sd, ServiceKind::Console).unwrap(), 10);
        assert_eq!(link.pending_tx(ServiceKind::Console), 0);
    }

    #[test]
    fn rx_bytes_are_read_per_service() {
        let state = LinkState::new();
        let mut rings = Rings::new();
        let (mut console_in, _) = rings.console_rx.split();
        console_in.push_slice(b"ok").unwrap();
        let mut link = link(&state, &mut rings);

        assert!(link.is_rx_pending(ServiceKind::Console));
        assert!(!link.is_rx_pending(ServiceKind::Raw));
        assert_eq!(link.read_byte(ServiceKind::Console), Some(b'o'));
        assert_eq!(link.read_byte(ServiceKind::Console), Some(b'k'));
        assert_eq!(link.read_byte(ServiceKind::Console), None);
    }
}
