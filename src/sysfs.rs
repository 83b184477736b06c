use log::{debug, warn};
use std::{
    fs,
    io::{Read, Seek, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use crate::driver::GpioDriver;
use crate::error::{GpioError, Result};
use crate::gpio::{Direction, Level};
use crate::gpio_pin_data::ProcessorPin;

pub static SYSFS_ROOT: &str = "/sys/class/gpio";

const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(1);

/// GPIO backend on top of the legacy `/sys/class/gpio` interface.
///
/// Every read and write opens the line's `value` file, so this backend is far
/// slower than [`MemoryGpioDriver`](crate::MemoryGpioDriver). It does not need
/// access to `/dev/gpiomem` though.
#[derive(Debug, Clone)]
pub struct SysfsGpioDriver {
    root: PathBuf,
    export_timeout: Duration,
}

impl Default for SysfsGpioDriver {
    fn default() -> Self {
        SysfsGpioDriver::new(SYSFS_ROOT)
    }
}

impl SysfsGpioDriver {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        SysfsGpioDriver {
            root: root.as_ref().to_path_buf(),
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
        }
    }

    /// Bounds how long `allocate` waits for udev to create the exported line.
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    fn gpio_dir(&self, pin: ProcessorPin) -> PathBuf {
        self.root.join(format!("gpio{}", pin.number()))
    }

    fn check_write_access(&self) -> Result<()> {
        for name in ["export", "unexport"] {
            let metadata = fs::metadata(self.root.join(name))?;
            if metadata.permissions().readonly() {
                return Err(GpioError::InvalidConfiguration(format!(
                    "no write access to {}",
                    self.root.join(name).display()
                )));
            }
        }
        Ok(())
    }

    fn configured_direction(&self, pin: ProcessorPin) -> Option<Direction> {
        let direction = fs::read_to_string(self.gpio_dir(pin).join("direction")).ok()?;
        match direction.trim() {
            "in" => Some(Direction::IN),
            "out" => Some(Direction::OUT),
            _ => None,
        }
    }

    fn export(&self, pin: ProcessorPin) -> Result<()> {
        let gpio_dir = self.gpio_dir(pin);
        if !gpio_dir.exists() {
            write_file(&self.root.join("export"), &pin.number().to_string())?;
        }

        let value_path = gpio_dir.join("value");
        let start = Instant::now();
        while !value_path.exists() {
            if start.elapsed() >= self.export_timeout {
                return Err(GpioError::ExportTimeout {
                    pin,
                    timeout: self.export_timeout,
                });
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    fn unexport(&self, pin: ProcessorPin) -> Result<()> {
        if self.gpio_dir(pin).exists() {
            write_file(&self.root.join("unexport"), &pin.number().to_string())?;
        }
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new().write(true).open(path)?;
    file.rewind()?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

impl GpioDriver for SysfsGpioDriver {
    fn allocate(&self, pin: ProcessorPin, direction: Direction) -> Result<()> {
        self.check_write_access()?;

        // warn if the line has been set up outside of this process
        if let Some(existing) = self.configured_direction(pin) {
            warn!(
                "{} is already exported as {}, continuing anyway",
                pin, existing
            );
        }

        self.export(pin)?;
        let direction = match direction {
            Direction::IN => "in",
            Direction::OUT => "out",
        };
        write_file(&self.gpio_dir(pin).join("direction"), direction)?;
        debug!("sysfs: exported {} as {}", pin, direction);
        Ok(())
    }

    fn release(&self, pin: ProcessorPin) -> Result<()> {
        self.unexport(pin)?;
        debug!("sysfs: unexported {}", pin);
        Ok(())
    }

    fn write(&self, pin: ProcessorPin, level: Level) -> Result<()> {
        let value = match level {
            Level::HIGH => "1",
            Level::LOW => "0",
        };
        write_file(&self.gpio_dir(pin).join("value"), value)
    }

    fn read(&self, pin: ProcessorPin) -> Result<Level> {
        let mut file = fs::File::open(self.gpio_dir(pin).join("value"))?;
        let mut value = String::new();
        file.read_to_string(&mut value)?;
        match value.trim() {
            "0" => Ok(Level::LOW),
            _ => Ok(Level::HIGH),
        }
    }
}
