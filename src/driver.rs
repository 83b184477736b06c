use std::{
    fmt, hint,
    time::{Duration, Instant},
};

use crate::error::{GpioError, Result};
use crate::gpio::{Direction, Level};
use crate::gpio_pin_data::ProcessorPin;

/// A backend that moves levels in and out of GPIO lines.
///
/// Drivers only touch hardware. Ownership and direction checks are done by
/// [`GpioConnection`](crate::GpioConnection) before a driver is called, so a
/// driver can assume the pin was set up with the matching direction.
///
/// All methods take `&self`: single-pin writes on the BCM283x go through the
/// set/clear registers and never race with writes to other pins.
pub trait GpioDriver: fmt::Debug + Send + Sync {
    /// Prepares `pin` for use in `direction` (export, function select).
    fn allocate(&self, pin: ProcessorPin, direction: Direction) -> Result<()>;

    /// Returns `pin` to the operating system.
    fn release(&self, pin: ProcessorPin) -> Result<()>;

    fn write(&self, pin: ProcessorPin, level: Level) -> Result<()>;

    fn read(&self, pin: ProcessorPin) -> Result<Level>;

    /// Blocks until `pin` reads `level` or `timeout` elapses.
    ///
    /// The default busy-polls [`read`](GpioDriver::read). Backends with
    /// interrupt support may override it.
    fn wait(&self, pin: ProcessorPin, level: Level, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.read(pin)? == level {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(GpioError::Timeout {
                    pin,
                    level,
                    timeout,
                });
            }
            hint::spin_loop();
        }
    }
}
