use std::{io, time::Duration};

use thiserror::Error;

use crate::gpio::{Direction, Level};
use crate::gpio_pin_data::{ProcessorPin, Revision};

/// Errors raised by the pin registry, the timing primitives and the bus transport.
///
/// None of these are retried by the library itself. Retry policy belongs to
/// the device driver that sits on top.
#[derive(Error, Debug)]
pub enum GpioError {
    #[error("{0} is already allocated")]
    AllocationConflict(ProcessorPin),

    #[error("{0} is not allocated")]
    NotAllocated(ProcessorPin),

    #[error("{pin} is allocated as {actual}, the operation needs {expected}")]
    WrongDirection {
        pin: ProcessorPin,
        expected: Direction,
        actual: Direction,
    },

    #[error("timed out after {timeout:?} waiting for {pin} to become {level}")]
    Timeout {
        pin: ProcessorPin,
        level: Level,
        timeout: Duration,
    },

    #[error("timed out after {timeout:?} waiting for {pin} to be exported")]
    ExportTimeout { pin: ProcessorPin, timeout: Duration },

    #[error("{0} is not supported by this connection")]
    UnsupportedOperation(&'static str),

    #[error("no mapping for {pin} on board revision {revision}")]
    MappingNotFound { pin: String, revision: Revision },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, GpioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_cause() {
        let err = GpioError::from(io::Error::new(io::ErrorKind::PermissionDenied, "/dev/gpiomem"));
        assert_eq!(err.to_string(), "I/O error: /dev/gpiomem");
    }

    #[test]
    fn test_export_timeout_message() {
        let err = GpioError::ExportTimeout {
            pin: ProcessorPin(23),
            timeout: Duration::from_millis(30),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 30ms waiting for GPIO23 to be exported"
        );
    }
}
