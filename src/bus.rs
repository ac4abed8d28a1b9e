//! I2C bus helpers.

use embedded_hal::i2c::I2c;

/// Valid 7-bit addresses probed by [`scan`].
pub const SCAN_RANGE: core::ops::RangeInclusive<u8> = 1..=127;

/// Probe every address with a one-byte read and report each that
/// acknowledges. Returns how many devices answered.
pub fn scan<I: I2c>(i2c: &mut I, mut found: impl FnMut(u8)) -> usize {
    let mut count = 0;
    let mut sample = [0u8];
    for address in SCAN_RANGE {
        if i2c.read(address, &mut sample).is_ok() {
            info!("i2c: device at {=u8:#x}", address);
            found(address);
            count += 1;
        }
    }
    if count == 0 {
        info!("i2c: no devices found");
    }
    count
}
