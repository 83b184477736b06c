use std::fmt;

use crate::error::{GpioError, Result};

/// A raw converter reading together with the converter's full-scale value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogValue {
    value: u64,
    range: u64,
}

impl AnalogValue {
    /// Fails when `range` is zero or `value` exceeds it.
    pub fn new(value: u64, range: u64) -> Result<Self> {
        if range == 0 || value > range {
            return Err(GpioError::InvalidConfiguration(format!(
                "analog value {} is outside 0..={}",
                value, range
            )));
        }
        Ok(AnalogValue { value, range })
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn range(&self) -> u64 {
        self.range
    }

    /// The reading as a fraction of full scale, in `0.0..=1.0`.
    pub fn relative(&self) -> f64 {
        self.value as f64 / self.range as f64
    }

    /// Scales the reading to `full_scale`, e.g. the converter's reference voltage.
    pub fn scaled(&self, full_scale: f64) -> f64 {
        self.relative() * full_scale
    }
}

impl fmt::Display for AnalogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.range)
    }
}
