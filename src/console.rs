//! Character console over the BLE console service.
//!
//! This is the byte-stream interface an interpreter's REPL sits on:
//! stdout goes out as notifications, stdin comes from peer writes.

use crate::ble::link::BleLink;
use crate::ble::stack::RadioStack;
use crate::ble::ServiceKind;
use crate::error::FatalFault;

pub struct Console<'l, 'a, S> {
    link: &'l mut BleLink<'a>,
    sd: S,
}

impl<'l, 'a, S: RadioStack> Console<'l, 'a, S> {
    pub fn new(link: &'l mut BleLink<'a>, sd: S) -> Self {
        Self { link, sd }
    }

    /// Queue `bytes` for the peer and push out as much as the stack takes.
    ///
    /// Output is discarded while disconnected and truncated when the TX
    /// ring is full.
    pub fn stdout_write(&mut self, bytes: &[u8]) -> Result<(), FatalFault> {
        if let Err(dropped) = self.link.queue(ServiceKind::Console, bytes) {
            debug!("console: tx ring full, dropped {} bytes", dropped.lost);
        }
        self.flush()
    }

    /// Retry any output the stack pushed back on.
    pub fn flush(&mut self) -> Result<(), FatalFault> {
        self.link.flush(&mut self.sd, ServiceKind::Console).map(|_| ())
    }

    pub fn poll_readable(&self) -> bool {
        self.link.is_rx_pending(ServiceKind::Console)
    }

    pub fn try_read_byte(&mut self) -> Option<u8> {
        self.link.read_byte(ServiceKind::Console)
    }

    /// Block until the peer sends a byte. `idle` runs between polls; it is
    /// where the caller services background work or sleeps.
    pub fn stdin_read_byte(&mut self, mut idle: impl FnMut()) -> Result<u8, FatalFault> {
        loop {
            if let Some(byte) = self.try_read_byte() {
                return Ok(byte);
            }
            self.flush()?;
            idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::link::{LinkState, Ring, ServicePort};
    use crate::ble::mock::MockStack;
    use crate::ble::{ConnHandle, ServiceHandles, Services};

    struct Rings {
        console_rx: Ring,
        console_tx: Ring,
        raw_rx: Ring,
        raw_tx: Ring,
    }

    fn rings() -> Box<Rings> {
        Box::new(Rings {
            console_rx: Ring::new(),
            console_tx: Ring::new(),
            raw_rx: Ring::new(),
            raw_tx: Ring::new(),
        })
    }

    fn services() -> Services {
        Services {
            console: ServiceHandles { rx_value: 10, tx_value: 12, ..Default::default() },
            raw: ServiceHandles { rx_value: 20, tx_value: 22, ..Default::default() },
        }
    }

    #[test]
    fn stdout_is_notified_on_the_console_tx_handle() {
        let state = LinkState::new();
        state.on_connected(ConnHandle(0));
        let mut r = rings();
        let (_, console_rx) = r.console_rx.split();
        let (_, raw_rx) = r.raw_rx.split();
        let mut link = BleLink::new(
            &state,
            services(),
            ServicePort::new(console_rx, r.console_tx.split()),
            ServicePort::new(raw_rx, r.raw_tx.split()),
        );
        let mut sd = MockStack::new();

        Console::new(&mut link, &mut sd).stdout_write(b">>> ").unwrap();
        assert_eq!(sd.notifications, [(12, b">>> ".to_vec())]);
    }

    #[test]
    fn stdout_while_disconnected_is_dropped() {
        let state = LinkState::new();
        let mut r = rings();
        let (_, console_rx) = r.console_rx.split();
        let (_, raw_rx) = r.raw_rx.split();
        let mut link = BleLink::new(
            &state,
            services(),
            ServicePort::new(console_rx, r.console_tx.split()),
            ServicePort::new(raw_rx, r.raw_tx.split()),
        );
        let mut sd = MockStack::new();

        Console::new(&mut link, &mut sd).stdout_write(b"nobody listening").unwrap();
        assert!(sd.notifications.is_empty());
        assert_eq!(link.pending_tx(ServiceKind::Console), 0);
    }

    #[test]
    fn stdin_waits_through_idle_until_a_byte_arrives() {
        let state = LinkState::new();
        let mut r = rings();
        let (mut peer, console_rx) = r.console_rx.split();
        let (_, raw_rx) = r.raw_rx.split();
        let mut link = BleLink::new(
            &state,
            services(),
            ServicePort::new(console_rx, r.console_tx.split()),
            ServicePort::new(raw_rx, r.raw_tx.split()),
        );
        let mut sd = MockStack::new();
        let mut console = Console::new(&mut link, &mut sd);

        assert!(!console.poll_readable());
        let mut idles = 0;
        let byte = console
            .stdin_read_byte(|| {
                idles += 1;
                if idles == 3 {
                    peer.push(b'\r');
                }
            })
            .unwrap();
        assert_eq!(byte, b'\r');
        assert_eq!(idles, 3);
        assert!(!console.poll_readable());
    }
}
