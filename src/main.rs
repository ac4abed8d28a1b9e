//! Monocle firmware entry point.
//!
//! Startup order: clocks and interrupt priorities, SoftDevice, GATT services
//! and advertising, byte rings, I2C scan, touch controller. After that three
//! tasks run:
//!   - `ble_task`: drains stack events whenever SWI2 fires
//!   - `touch_task`: services the IQS620 on each RDY edge
//!   - `console_task`: line echo on the console service, loopback on raw

#![no_std]
#![no_main]

mod board;
mod softdevice;

use defmt::{debug, error, info, warn};
use embassy_executor::Spawner;
use embassy_futures::select::select;
use embassy_nrf::gpio::{Input, Pull};
use embassy_nrf::interrupt::Priority;
use embassy_nrf::peripherals::TWISPI0;
use embassy_nrf::twim::{self, Twim};
use embassy_nrf::bind_interrupts;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Delay, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use monocle::ble::dispatch::dispatch_or_reset;
use monocle::ble::link::{self, LinkState, Ring, ServicePort};
use monocle::ble::{BleLink, Dispatcher, ServiceKind};
use monocle::config::DEVICE_NAME;
use monocle::console::Console;
use monocle::touch::iqs620::Iqs620;
use monocle::{bus, Error, FatalFault};

use crate::board::{BoardFaults, ButtonLog, TouchReady};
use crate::softdevice::{Sd132, STACK_EVENT};

bind_interrupts!(struct Irqs {
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<TWISPI0>;
});

type TouchBus = Twim<'static, TWISPI0>;

/// Longest console line kept for command matching.
const LINE_LENGTH: usize = 32;

/// Console poll period when no stack event arrives.
const CONSOLE_POLL_MS: u64 = 20;

static LINK_STATE: LinkState = LinkState::new();

/// Raised after each dispatch so the console sees new input promptly.
static CONSOLE_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static CONSOLE_RX: StaticCell<Ring> = StaticCell::new();
static CONSOLE_TX: StaticCell<Ring> = StaticCell::new();
static RAW_RX: StaticCell<Ring> = StaticCell::new();
static RAW_TX: StaticCell<Ring> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // Keep embassy's interrupts clear of the SoftDevice's reserved levels.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    info!("monocle: starting");

    if let Err(fault) = softdevice::enable() {
        board::fatal(fault);
    }

    let mut sd = Sd132::commands();
    let (services, adv_handle) = match link::bring_up(&mut sd) {
        Ok(up) => up,
        Err(fault) => board::fatal(fault),
    };
    info!("ble: advertising as \"{}\"", DEVICE_NAME);

    let (console_rx_in, console_rx_out) = CONSOLE_RX.init(Ring::new()).split();
    let (raw_rx_in, raw_rx_out) = RAW_RX.init(Ring::new()).split();
    let console_tx = CONSOLE_TX.init(Ring::new()).split();
    let raw_tx = RAW_TX.init(Ring::new()).split();

    let dispatcher = Dispatcher::new(&LINK_STATE, services, adv_handle, console_rx_in, raw_rx_in);
    let link = BleLink::new(
        &LINK_STATE,
        services,
        ServicePort::new(console_rx_out, console_tx),
        ServicePort::new(raw_rx_out, raw_tx),
    );

    spawner.must_spawn(ble_task(dispatcher));
    spawner.must_spawn(console_task(link));

    let mut i2c: TouchBus = Twim::new(p.TWISPI0, Irqs, p.P0_17, p.P0_18, twim::Config::default());
    bus::scan(&mut i2c, |_| {});

    let mut ready = TouchReady::new(Input::new(p.P0_02, Pull::Up));
    let mut touch = Iqs620::new(i2c);
    match touch.init(&mut ready, &mut Delay) {
        Ok(()) => spawner.must_spawn(touch_task(touch, ready)),
        Err(Error::Fatal(fault)) => board::fatal(fault),
        Err(e) => error!("touch: init failed: {}, buttons disabled", e),
    }
}

#[embassy_executor::task]
async fn ble_task(mut dispatcher: Dispatcher<'static>) -> ! {
    let mut sd = Sd132::with_events();
    let mut faults = BoardFaults;

    loop {
        if let Some(report) = dispatch_or_reset(&mut dispatcher, &mut sd, &mut faults) {
            if report.rx_dropped > 0 {
                warn!("ble: rx ring full, dropped {} bytes", report.rx_dropped);
            }
            CONSOLE_WAKE.signal(());
        }
        STACK_EVENT.wait().await;
    }
}

#[embassy_executor::task]
async fn touch_task(mut touch: Iqs620<TouchBus>, mut ready: TouchReady) -> ! {
    let mut buttons = ButtonLog;

    loop {
        ready.wait().await;
        match touch.service(&mut buttons) {
            Ok(_) => debug!("touch: status {=u16:#b}", touch.button_status()),
            Err(e) => warn!("touch: service failed: {}", e),
        }
    }
}

#[embassy_executor::task]
async fn console_task(mut link: BleLink<'static>) -> ! {
    let mut sd = Sd132::commands();
    let mut line = heapless::Vec::<u8, LINE_LENGTH>::new();

    loop {
        if let Err(fault) = echo_console(&mut Console::new(&mut link, &mut sd), &mut line) {
            board::fatal(fault);
        }
        if let Err(fault) = loopback_raw(&mut link, &mut sd) {
            board::fatal(fault);
        }

        select(CONSOLE_WAKE.wait(), Timer::after_millis(CONSOLE_POLL_MS)).await;
    }
}

/// Echo console input and answer each line with a prompt. The line
/// `bootloader` reboots into DFU.
fn echo_console(
    console: &mut Console<'_, 'static, &mut Sd132>,
    line: &mut heapless::Vec<u8, LINE_LENGTH>,
) -> Result<(), FatalFault> {
    while let Some(byte) = console.try_read_byte() {
        if byte != b'\r' {
            // Overlong lines just stop matching any command.
            line.push(byte).ok();
            console.stdout_write(&[byte])?;
            continue;
        }

        if line.as_slice() == b"bootloader" {
            board::enter_bootloader();
        }
        line.clear();
        console.stdout_write(b"\r\n>>> ")?;
    }
    console.flush()
}

/// Send every byte received on the raw service straight back.
fn loopback_raw(link: &mut BleLink<'static>, sd: &mut Sd132) -> Result<(), FatalFault> {
    let mut chunk = [0u8; 64];
    loop {
        let mut n = 0;
        while n < chunk.len() {
            match link.read_byte(ServiceKind::Raw) {
                Some(byte) => {
                    chunk[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        if n == 0 {
            break;
        }
        if let Err(dropped) = link.queue(ServiceKind::Raw, &chunk[..n]) {
            debug!("raw: tx ring full, dropped {} bytes", dropped.lost);
        }
    }
    link.flush(sd, ServiceKind::Raw).map(|_| ())
}
