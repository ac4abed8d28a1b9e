//! Fatal-fault escalation.
//!
//! Every call into the radio stack goes through [`check`], which turns a
//! non-success status into a [`FatalFault`] stamped with the caller's
//! source location. Whoever ends up holding the fault hands it to
//! [`escalate`]: one log line, then a reset.

use core::panic::Location;

use crate::ble::stack::RawError;
use crate::error::FatalFault;

/// Board-level reaction to a fatal fault.
///
/// On target `reset` never returns. Test doubles record the call instead.
pub trait FaultHandler {
    fn log(&mut self, fault: &FatalFault);
    fn reset(&mut self);
}

/// Convert a stack status into a fatal fault carrying the call site.
#[track_caller]
pub fn check<T>(result: Result<T, RawError>) -> Result<T, FatalFault> {
    match result {
        Ok(value) => Ok(value),
        Err(RawError(code)) => {
            let caller = Location::caller();
            Err(FatalFault::Status {
                code,
                file: caller.file(),
                line: caller.line(),
            })
        }
    }
}

/// Log `fault` exactly once, then reset.
pub fn escalate<H: FaultHandler + ?Sized>(handler: &mut H, fault: FatalFault) {
    handler.log(&fault);
    handler.reset();
}
