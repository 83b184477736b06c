//! MCP3008 (10-bit) and MCP3208 (12-bit) eight-channel ADCs.
//!
//! A conversion is requested with a start bit, the single-ended/differential
//! bit and a 3-bit channel number, MSB first. One further clock lets the chip
//! sample, then the result is shifted out MSB first.

use log::debug;

use crate::analog::AnalogValue;
use crate::error::{GpioError, Result};
use crate::spi::{BitOrder, SpiConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mcp3xxxModel {
    Mcp3008,
    Mcp3208,
}

impl Mcp3xxxModel {
    pub fn resolution(&self) -> u32 {
        match self {
            Mcp3xxxModel::Mcp3008 => 10,
            Mcp3xxxModel::Mcp3208 => 12,
        }
    }

    pub fn full_scale(&self) -> u64 {
        (1 << self.resolution()) - 1
    }
}

/// How the selected channel is measured.
///
/// In differential mode the channel number selects a pair (0: CH0+ CH1-, 1: CH0- CH1+, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    SingleEnded,
    Differential,
}

pub const CHANNELS: u8 = 8;

#[derive(Debug)]
pub struct Mcp3xxx {
    spi: SpiConnection,
    model: Mcp3xxxModel,
}

impl Mcp3xxx {
    /// Wraps an SPI connection. The chip only speaks MSB first.
    pub fn new(spi: SpiConnection, model: Mcp3xxxModel) -> Result<Self> {
        if spi.settings().bit_order != BitOrder::MsbFirst {
            return Err(GpioError::InvalidConfiguration(format!(
                "{:?} needs an MSB-first connection",
                model
            )));
        }
        Ok(Mcp3xxx { spi, model })
    }

    pub fn model(&self) -> Mcp3xxxModel {
        self.model
    }

    pub fn read(&mut self, channel: u8, mode: InputMode) -> Result<AnalogValue> {
        if channel >= CHANNELS {
            return Err(GpioError::InvalidConfiguration(format!(
                "channel {} does not exist on {:?}",
                channel, self.model
            )));
        }

        let resolution = self.model.resolution();
        let raw = self.spi.transaction(|bus| {
            bus.write_bit(true)?;
            bus.write_bit(mode == InputMode::SingleEnded)?;
            bus.write_bits(u64::from(channel), 3)?;
            bus.synchronize_clock()?;
            bus.read_bits(resolution)
        })?;
        debug!("{:?} channel {} ({:?}) read {}", self.model, channel, mode, raw);

        AnalogValue::new(raw, self.model.full_scale())
    }

    pub fn into_inner(self) -> SpiConnection {
        self.spi
    }
}
