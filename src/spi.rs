//! Bit-banged SPI over plain GPIO lines.
//!
//! The transport shifts one bit per clock cycle and does no byte alignment:
//! callers state the exact number of bits each protocol field needs.
//!
//! Mode 0 (the default) drives data before the leading clock edge and samples
//! on it:
//!
//! ```text
//! SELECT ‾‾\___________________________/‾‾
//! CLOCK  ____/‾‾\__/‾‾\__/‾‾\__ ... ______
//! MOSI   ___X=====X=====X=====X ...
//! ```

use log::{debug, trace, warn};
use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use crate::error::{GpioError, Result};
use crate::gpio::{GpioConnection, InputPin, Level, OutputPin};
use crate::gpio_pin_data::ProcessorPin;
use crate::timer;

/// The order bits of a multi-bit value are shifted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// The clock level between transfers (CPOL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPolarity {
    IdleLow,
    IdleHigh,
}

/// Which clock edge data is sampled on (CPHA).
///
/// * `LeadingEdge` - data is driven before the first edge of the cycle and sampled on it
/// * `TrailingEdge` - data is driven on the first edge and sampled on the second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPhase {
    LeadingEdge,
    TrailingEdge,
}

/// The level that selects the slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectPolarity {
    ActiveLow,
    ActiveHigh,
}

/// Wire settings of an [`SpiConnection`].
///
/// `clock_delay` is spent once in each half of a clock cycle, so the clock
/// period is at least twice that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiSettings {
    pub bit_order: BitOrder,
    pub clock_polarity: ClockPolarity,
    pub clock_phase: ClockPhase,
    pub select_polarity: SelectPolarity,
    pub clock_delay: Duration,
}

impl Default for SpiSettings {
    fn default() -> Self {
        SpiSettings {
            bit_order: BitOrder::MsbFirst,
            clock_polarity: ClockPolarity::IdleLow,
            clock_phase: ClockPhase::LeadingEdge,
            select_polarity: SelectPolarity::ActiveLow,
            clock_delay: Duration::ZERO,
        }
    }
}

impl SpiSettings {
    pub fn idle_clock(&self) -> Level {
        match self.clock_polarity {
            ClockPolarity::IdleLow => Level::LOW,
            ClockPolarity::IdleHigh => Level::HIGH,
        }
    }

    pub fn selected(&self) -> Level {
        match self.select_polarity {
            SelectPolarity::ActiveLow => Level::LOW,
            SelectPolarity::ActiveHigh => Level::HIGH,
        }
    }
}

/// The lines used by an [`SpiConnection`].
///
/// `miso` may be left out for write-only devices and `mosi` for read-only ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub clock: ProcessorPin,
    pub select: ProcessorPin,
    pub miso: Option<ProcessorPin>,
    pub mosi: Option<ProcessorPin>,
}

impl SpiPins {
    fn validate(&self) -> Result<()> {
        let pins: Vec<ProcessorPin> = [Some(self.clock), Some(self.select), self.miso, self.mosi]
            .into_iter()
            .flatten()
            .collect();
        for (i, pin) in pins.iter().enumerate() {
            if pins[i + 1..].contains(pin) {
                return Err(GpioError::InvalidConfiguration(format!(
                    "{} is used for more than one SPI role",
                    pin
                )));
            }
        }
        if self.miso.is_none() && self.mosi.is_none() {
            return Err(GpioError::InvalidConfiguration(String::from(
                "an SPI connection needs at least one data line",
            )));
        }
        Ok(())
    }
}

/// A bit-level SPI master on GPIO lines.
///
/// All pins are owned by the connection and released when it is dropped.
///
/// # Example
///
/// ```rust
/// use raspi_io::{GpioConnection, ProcessorPin, SimulatedGpioDriver, SpiConnection, SpiPins, SpiSettings};
///
/// let gpio = GpioConnection::new(SimulatedGpioDriver::new());
/// let pins = SpiPins {
///     clock: ProcessorPin(11),
///     select: ProcessorPin(8),
///     miso: Some(ProcessorPin(9)),
///     mosi: Some(ProcessorPin(10)),
/// };
/// let mut spi = SpiConnection::open(&gpio, pins, SpiSettings::default()).unwrap();
///
/// let value = spi
///     .transaction(|bus| {
///         bus.write_bits(0b1101, 4)?;
///         bus.read_bits(8)
///     })
///     .unwrap();
/// assert_eq!(value, 0);
/// assert!(!spi.is_selected());
/// ```
#[derive(Debug)]
pub struct SpiConnection {
    clock: OutputPin,
    select: OutputPin,
    miso: Option<InputPin>,
    mosi: Option<OutputPin>,
    settings: SpiSettings,
}

impl SpiConnection {
    /// Allocates the pins and parks the bus: clock idle, slave deselected, MOSI low.
    pub fn open(gpio: &GpioConnection, pins: SpiPins, settings: SpiSettings) -> Result<Self> {
        pins.validate()?;

        let clock = gpio.output(pins.clock, settings.idle_clock())?;
        let select = gpio.output(pins.select, !settings.selected())?;
        let mosi = pins.mosi.map(|pin| gpio.output(pin, Level::LOW)).transpose()?;
        let miso = pins.miso.map(|pin| gpio.input(pin)).transpose()?;
        debug!("opened SPI connection on {:?} with {:?}", pins, settings);

        Ok(SpiConnection {
            clock,
            select,
            miso,
            mosi,
            settings,
        })
    }

    pub fn settings(&self) -> &SpiSettings {
        &self.settings
    }

    pub fn is_selected(&self) -> bool {
        self.select.level() == self.settings.selected()
    }

    /// Asserts the select line for the lifetime of the returned guard.
    ///
    /// Dropping the guard deasserts the line and returns the clock to idle, also
    /// when the caller bails out with an error or a panic.
    pub fn select_slave(&mut self) -> Result<SlaveSelection<'_>> {
        let selected = self.settings.selected();
        self.select.write(selected)?;
        trace!("spi: selected slave on {}", self.select.pin());
        Ok(SlaveSelection { connection: self })
    }

    /// Runs `f` with the slave selected.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SpiConnection) -> Result<T>,
    {
        let mut selection = self.select_slave()?;
        f(&mut selection)
    }

    fn release_bus(&mut self) -> Result<()> {
        let deselected = !self.settings.selected();
        let select_result = self.select.write(deselected);
        let idle = self.settings.idle_clock();
        let clock_result = if self.clock.level() != idle {
            self.clock.write(idle)
        } else {
            Ok(())
        };
        trace!("spi: deselected slave on {}", self.select.pin());
        select_result.and(clock_result)
    }

    /// Shifts one bit out on MOSI.
    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.require_mosi()?;
        self.clock_cycle(Some(bit), false)?;
        Ok(())
    }

    /// Shifts one bit in from MISO.
    pub fn read_bit(&mut self) -> Result<bool> {
        self.require_miso()?;
        self.clock_cycle(None, true)
    }

    /// Shifts the low `count` bits of `value` out, in the configured bit order.
    pub fn write_bits(&mut self, value: u64, count: u32) -> Result<()> {
        self.require_mosi()?;
        check_count(count)?;
        for i in 0..count {
            let shift = self.shift(i, count);
            self.clock_cycle(Some((value >> shift) & 1 == 1), false)?;
        }
        trace!("spi: wrote {:#b} ({} bits)", value, count);
        Ok(())
    }

    /// Shifts `count` bits in and assembles them in the configured bit order.
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        self.require_miso()?;
        check_count(count)?;
        let mut value = 0u64;
        for i in 0..count {
            let shift = self.shift(i, count);
            if self.clock_cycle(None, true)? {
                value |= 1 << shift;
            }
        }
        trace!("spi: read {:#b} ({} bits)", value, count);
        Ok(value)
    }

    /// Full-duplex exchange: writes `value` while reading the same number of bits.
    pub fn transfer_bits(&mut self, value: u64, count: u32) -> Result<u64> {
        self.require_mosi()?;
        self.require_miso()?;
        check_count(count)?;
        let mut received = 0u64;
        for i in 0..count {
            let shift = self.shift(i, count);
            if self.clock_cycle(Some((value >> shift) & 1 == 1), true)? {
                received |= 1 << shift;
            }
        }
        Ok(received)
    }

    /// Issues one clock pulse without moving data, e.g. an ADC sample-and-hold clock.
    pub fn synchronize_clock(&mut self) -> Result<()> {
        self.clock_cycle(None, false)?;
        Ok(())
    }

    fn shift(&self, index: u32, count: u32) -> u32 {
        match self.settings.bit_order {
            BitOrder::MsbFirst => count - 1 - index,
            BitOrder::LsbFirst => index,
        }
    }

    fn require_mosi(&self) -> Result<()> {
        if self.mosi.is_none() {
            return Err(GpioError::UnsupportedOperation("writing without a MOSI pin"));
        }
        Ok(())
    }

    fn require_miso(&self) -> Result<()> {
        if self.miso.is_none() {
            return Err(GpioError::UnsupportedOperation("reading without a MISO pin"));
        }
        Ok(())
    }

    fn drive(&mut self, bit: Option<bool>) -> Result<()> {
        match (bit, self.mosi.as_mut()) {
            (Some(bit), Some(mosi)) => mosi.write(Level::from(bit)),
            _ => Ok(()),
        }
    }

    fn sample(&self, sample: bool) -> Result<bool> {
        match (sample, self.miso.as_ref()) {
            (true, Some(miso)) => miso.is_high(),
            _ => Ok(false),
        }
    }

    /// One full clock cycle. Returns the sampled MISO bit, or `false` when not sampling.
    fn clock_cycle(&mut self, bit: Option<bool>, sample: bool) -> Result<bool> {
        let idle = self.settings.idle_clock();
        let delay = self.settings.clock_delay;

        let received = match self.settings.clock_phase {
            ClockPhase::LeadingEdge => {
                self.drive(bit)?;
                timer::sleep(delay);
                self.clock.write(!idle)?;
                let received = self.sample(sample)?;
                timer::sleep(delay);
                self.clock.write(idle)?;
                received
            }
            ClockPhase::TrailingEdge => {
                self.clock.write(!idle)?;
                self.drive(bit)?;
                timer::sleep(delay);
                self.clock.write(idle)?;
                let received = self.sample(sample)?;
                timer::sleep(delay);
                received
            }
        };
        Ok(received)
    }
}

fn check_count(count: u32) -> Result<()> {
    if count > u64::BITS {
        return Err(GpioError::InvalidConfiguration(format!(
            "cannot shift {} bits in one call",
            count
        )));
    }
    Ok(())
}

/// A selected slave. Deselects on drop.
#[derive(Debug)]
pub struct SlaveSelection<'a> {
    connection: &'a mut SpiConnection,
}

impl Deref for SlaveSelection<'_> {
    type Target = SpiConnection;

    fn deref(&self) -> &SpiConnection {
        self.connection
    }
}

impl DerefMut for SlaveSelection<'_> {
    fn deref_mut(&mut self) -> &mut SpiConnection {
        self.connection
    }
}

impl Drop for SlaveSelection<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.connection.release_bus() {
            warn!("failed to deselect slave on {}: {}", self.connection.select.pin(), e);
        }
    }
}
