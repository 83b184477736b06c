//! Memory-mapped GPIO backend for the BCM2835/BCM2836/BCM2837.
//!
//! Maps the 4 KiB GPIO register block exposed by `/dev/gpiomem` and drives
//! pins through the function select, set, clear and level registers.

use log::debug;
use std::{
    fmt,
    fs::OpenOptions,
    io,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    ptr::{self, NonNull},
};

use crate::driver::GpioDriver;
use crate::error::{GpioError, Result};
use crate::gpio::{Direction, Level};
use crate::gpio_pin_data::ProcessorPin;

pub static GPIOMEM_PATH: &str = "/dev/gpiomem";

const GPIO_BLOCK_SIZE: usize = 4096;

// Register offsets
const GPFSEL0: usize = 0x00; // Function select, 10 pins per register
const GPSET0: usize = 0x1C; // Output set
const GPCLR0: usize = 0x28; // Output clear
const GPLEV0: usize = 0x34; // Pin level

const FSEL_INPUT: u32 = 0b000;
const FSEL_OUTPUT: u32 = 0b001;
const FSEL_MASK: u32 = 0b111;

const MAX_PIN: u8 = 53;

/// GPIO backend writing the peripheral registers directly.
pub struct MemoryGpioDriver {
    path: PathBuf,
    base: NonNull<u32>,
}

// The mapping is owned by the driver and only accessed through volatile
// single-word reads and writes.
unsafe impl Send for MemoryGpioDriver {}
unsafe impl Sync for MemoryGpioDriver {}

impl fmt::Debug for MemoryGpioDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGpioDriver")
            .field("path", &self.path)
            .finish()
    }
}

impl MemoryGpioDriver {
    /// Maps the GPIO register block from `path`, normally `/dev/gpiomem`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)?;

        // SAFETY: a fresh shared mapping of the device; the result is checked below.
        let mapped = unsafe {
            libc::mmap(
                ptr::null_mut(),
                GPIO_BLOCK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if mapped == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }

        // the mapping stays valid after `file` is closed
        let base = NonNull::new(mapped as *mut u32)
            .ok_or_else(|| GpioError::Io(io::Error::new(io::ErrorKind::Other, "mmap returned null")))?;
        debug!("mapped GPIO registers from {}", path.display());

        Ok(MemoryGpioDriver { path, base })
    }

    pub fn open_default() -> Result<Self> {
        MemoryGpioDriver::open(GPIOMEM_PATH)
    }

    #[inline]
    fn read_reg(&self, offset: usize) -> u32 {
        // SAFETY: every offset used in this module lies inside the mapped block.
        unsafe { ptr::read_volatile(self.base.as_ptr().add(offset / 4)) }
    }

    #[inline]
    fn write_reg(&self, offset: usize, value: u32) {
        // SAFETY: see read_reg.
        unsafe { ptr::write_volatile(self.base.as_ptr().add(offset / 4), value) }
    }

    fn check_pin(pin: ProcessorPin) -> Result<u8> {
        if pin.number() > MAX_PIN {
            return Err(GpioError::InvalidConfiguration(format!(
                "{} does not exist on this processor",
                pin
            )));
        }
        Ok(pin.number())
    }

    fn set_function(&self, pin: ProcessorPin, function: u32) -> Result<()> {
        let number = Self::check_pin(pin)? as usize;
        let offset = GPFSEL0 + (number / 10) * 4;
        let shift = (number % 10) * 3;

        let mut value = self.read_reg(offset);
        value &= !(FSEL_MASK << shift);
        value |= function << shift;
        self.write_reg(offset, value);
        Ok(())
    }
}

impl Drop for MemoryGpioDriver {
    fn drop(&mut self) {
        // SAFETY: base was returned by mmap with GPIO_BLOCK_SIZE and is not used afterwards.
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, GPIO_BLOCK_SIZE);
        }
    }
}

impl GpioDriver for MemoryGpioDriver {
    fn allocate(&self, pin: ProcessorPin, direction: Direction) -> Result<()> {
        let function = match direction {
            Direction::IN => FSEL_INPUT,
            Direction::OUT => FSEL_OUTPUT,
        };
        self.set_function(pin, function)
    }

    fn release(&self, pin: ProcessorPin) -> Result<()> {
        self.set_function(pin, FSEL_INPUT)
    }

    fn write(&self, pin: ProcessorPin, level: Level) -> Result<()> {
        let number = Self::check_pin(pin)? as usize;
        let base = match level {
            Level::HIGH => GPSET0,
            Level::LOW => GPCLR0,
        };
        self.write_reg(base + (number / 32) * 4, 1 << (number % 32));
        Ok(())
    }

    fn read(&self, pin: ProcessorPin) -> Result<Level> {
        let number = Self::check_pin(pin)? as usize;
        let value = self.read_reg(GPLEV0 + (number / 32) * 4);
        Ok(Level::from(value & (1 << (number % 32)) != 0))
    }
}
