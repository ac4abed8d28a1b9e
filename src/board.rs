//! Monocle board glue: fault reset, touch ready line, bootloader entry.

use cortex_m::peripheral::{DCB, SCB};
use defmt::{error, info};
use embassy_nrf::gpio::Input;

use monocle::config::BOOTLOADER_DFU_MAGIC;
use monocle::fault::{escalate, FaultHandler};
use monocle::touch::iqs620::ReadyLine;
use monocle::touch::{Button, ButtonEvent, TouchHandler};
use monocle::FatalFault;

/// Logs over RTT, stops at a breakpoint under a debugger, then resets.
pub struct BoardFaults;

impl FaultHandler for BoardFaults {
    fn log(&mut self, fault: &FatalFault) {
        error!("fatal: {}", fault);
    }

    fn reset(&mut self) {
        if DCB::is_debugger_attached() {
            cortex_m::asm::bkpt();
        }
        SCB::sys_reset();
    }
}

/// Escalate a fault that has no caller left to hand it to.
pub fn fatal(fault: FatalFault) -> ! {
    escalate(&mut BoardFaults, fault);
    SCB::sys_reset()
}

/// RDY pin of the IQS620 (falling edge, pull-up).
///
/// `disable` only masks the edges; the pin stays configured so the touch
/// task can keep waiting on it.
pub struct TouchReady {
    pin: Input<'static>,
    armed: bool,
}

impl TouchReady {
    pub fn new(pin: Input<'static>) -> Self {
        Self { pin, armed: false }
    }

    /// Wait for the next falling edge while armed.
    pub async fn wait(&mut self) {
        loop {
            self.pin.wait_for_falling_edge().await;
            if self.armed {
                return;
            }
        }
    }
}

impl ReadyLine for TouchReady {
    fn enable(&mut self) {
        self.armed = true;
    }

    fn disable(&mut self) {
        self.armed = false;
    }
}

/// Button events go to the log until something consumes them.
pub struct ButtonLog;

impl TouchHandler for ButtonLog {
    fn on_button(&mut self, button: Button, event: ButtonEvent) {
        info!("touch: {} {}", button, event);
    }
}

/// Reboot into the DFU bootloader.
pub fn enter_bootloader() -> ! {
    info!("rebooting into bootloader");
    if let Err(fault) = crate::softdevice::set_dfu_magic(BOOTLOADER_DFU_MAGIC) {
        fatal(fault);
    }
    SCB::sys_reset()
}
