//! GPIO and bit-banged SPI primitives for the Raspberry Pi.
//!
//! * [`gpio_pin_data`] translates header positions to processor lines for the
//!   detected board revision.
//! * [`GpioConnection`] hands out pins exclusively, checks directions, and
//!   provides busy-wait edge detection and pulse measurement.
//! * [`SpiConnection`] shifts arbitrary bit counts over GPIO lines, with a
//!   select guard that always leaves the bus idle.
//!
//! Hardware access goes through a [`GpioDriver`]: [`MemoryGpioDriver`] maps
//! `/dev/gpiomem`, [`SysfsGpioDriver`] uses `/sys/class/gpio`, and
//! [`SimulatedGpioDriver`] runs without hardware.

pub mod analog;
pub mod config;
pub mod driver;
pub mod error;
pub mod gpio;
pub mod gpio_pin_data;
pub mod mcp3xxx;
pub mod memory;
pub mod sim;
pub mod spi;
pub mod sysfs;
pub mod timer;

pub use analog::AnalogValue;
pub use config::{DriverKind, Settings};
pub use driver::GpioDriver;
pub use error::{GpioError, Result};
pub use gpio::{Direction, GpioConnection, InputPin, Level, OutputPin, PinConfiguration, PinHandle};
pub use gpio_pin_data::{board, init_board, ConnectorPin, PinMapping, ProcessorPin, Revision};
pub use mcp3xxx::{InputMode, Mcp3xxx, Mcp3xxxModel};
pub use memory::MemoryGpioDriver;
pub use sim::SimulatedGpioDriver;
pub use spi::{
    BitOrder, ClockPhase, ClockPolarity, SelectPolarity, SlaveSelection, SpiConnection, SpiPins,
    SpiSettings,
};
pub use sysfs::SysfsGpioDriver;
