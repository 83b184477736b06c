use log::{debug, trace, warn};
use std::{
    collections::HashMap,
    fmt,
    ops::Not,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::config::{DriverKind, Settings};
use crate::driver::GpioDriver;
use crate::error::{GpioError, Result};
use crate::gpio_pin_data::{board, init_board, ConnectorPin, PinMapping, ProcessorPin};
use crate::memory::MemoryGpioDriver;
use crate::sim::SimulatedGpioDriver;
use crate::sysfs::SysfsGpioDriver;
use crate::timer;

/// Specifies the level of a GPIO line.
///
/// * `LOW` - 0
/// * `HIGH` - 1
///
/// # Example
///
/// ```rust
/// use raspi_io::Level;
///
/// assert_eq!(Level::from(true), Level::HIGH);
/// assert_eq!(!Level::HIGH, Level::LOW);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Level {
    LOW = 0,
    HIGH = 1,
}

impl Level {
    pub fn is_high(&self) -> bool {
        *self == Level::HIGH
    }

    pub fn is_low(&self) -> bool {
        *self == Level::LOW
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::HIGH
        } else {
            Level::LOW
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> Self {
        level.is_high()
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::LOW => Level::HIGH,
            Level::HIGH => Level::LOW,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::LOW => f.write_str("LOW"),
            Level::HIGH => f.write_str("HIGH"),
        }
    }
}

/// Specifies the direction a pin is allocated for.
///
/// * `IN` - Input
/// * `OUT` - Output
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Direction {
    IN,
    OUT,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::IN => f.write_str("IN"),
            Direction::OUT => f.write_str("OUT"),
        }
    }
}

/// Who may drive an allocated pin.
///
/// Pins taken with [`GpioConnection::allocate`] are driven through the
/// connection. Pins behind an [`OutputPin`] or [`InputPin`] carry a token that
/// only the handle holds, so a handle that outlived its allocation cannot touch
/// the next owner's pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Connection,
    Handle(u64),
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    direction: Direction,
    owner: Owner,
    // false while the driver is still setting the pin up
    ready: bool,
}

/// The set of pins currently owned through one connection.
///
/// Every pin starts unallocated. `reserve` takes it, `activate` marks it set
/// up in hardware, `remove` frees it; there are no other transitions.
#[derive(Debug, Default)]
struct PinRegistry {
    pins: HashMap<ProcessorPin, Allocation>,
    next_token: u64,
}

impl PinRegistry {
    fn reserve(&mut self, pin: ProcessorPin, direction: Direction, handle: bool) -> Result<Owner> {
        if self.pins.contains_key(&pin) {
            return Err(GpioError::AllocationConflict(pin));
        }
        let owner = if handle {
            self.next_token += 1;
            Owner::Handle(self.next_token)
        } else {
            Owner::Connection
        };
        self.pins.insert(
            pin,
            Allocation {
                direction,
                owner,
                ready: false,
            },
        );
        Ok(owner)
    }

    fn activate(&mut self, pin: ProcessorPin) {
        if let Some(allocation) = self.pins.get_mut(&pin) {
            allocation.ready = true;
        }
    }

    fn remove(&mut self, pin: ProcessorPin) {
        self.pins.remove(&pin);
    }

    fn get(&self, pin: ProcessorPin) -> Result<Allocation> {
        match self.pins.get(&pin) {
            Some(allocation) if allocation.ready => Ok(*allocation),
            _ => Err(GpioError::NotAllocated(pin)),
        }
    }

    /// Fails with `NotAllocated` unless `pin` is set up and held by `owner`.
    fn owned_by(&self, pin: ProcessorPin, owner: Owner) -> Result<Allocation> {
        let allocation = self.get(pin)?;
        if allocation.owner != owner {
            return Err(GpioError::NotAllocated(pin));
        }
        Ok(allocation)
    }
}

/// Describes one pin to be set up by [`GpioConnection::configure`].
///
/// Constructors validate the combination: inputs take no initial level and the
/// line number must be reachable by the GPIO registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinConfiguration {
    pin: ProcessorPin,
    direction: Direction,
    initial: Option<Level>,
    name: Option<String>,
}

impl PinConfiguration {
    pub fn new(
        pin: ProcessorPin,
        direction: Direction,
        initial: Option<Level>,
        name: Option<&str>,
    ) -> Result<Self> {
        if pin.number() > ProcessorPin::MAX {
            return Err(GpioError::InvalidConfiguration(format!(
                "{} is out of range",
                pin
            )));
        }
        if direction == Direction::IN && initial.is_some() {
            return Err(GpioError::InvalidConfiguration(format!(
                "initial level is not valid for input {}",
                pin
            )));
        }

        Ok(PinConfiguration {
            pin,
            direction,
            initial,
            name: name.map(String::from),
        })
    }

    pub fn input(pin: ProcessorPin, name: Option<&str>) -> Result<Self> {
        PinConfiguration::new(pin, Direction::IN, None, name)
    }

    pub fn output(pin: ProcessorPin, initial: Level, name: Option<&str>) -> Result<Self> {
        PinConfiguration::new(pin, Direction::OUT, Some(initial), name)
    }

    pub fn pin(&self) -> ProcessorPin {
        self.pin
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn initial(&self) -> Option<Level> {
        self.initial
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Owns the pin registry and the hardware backend.
///
/// Clones share both, so pins allocated through one clone are seen as taken by
/// every other clone. Separate connections do not coordinate with each other.
///
/// # Example
///
/// ```rust
/// use raspi_io::{GpioConnection, Level, ProcessorPin, SimulatedGpioDriver};
///
/// let gpio = GpioConnection::new(SimulatedGpioDriver::new());
/// let mut led = gpio.output(ProcessorPin(17), Level::LOW).unwrap();
/// led.set_high().unwrap();
/// assert!(gpio.output(ProcessorPin(17), Level::LOW).is_err());
/// drop(led);
/// assert!(gpio.output(ProcessorPin(17), Level::LOW).is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct GpioConnection {
    driver: Arc<dyn GpioDriver>,
    registry: Arc<Mutex<PinRegistry>>,
    mapping: Option<&'static PinMapping>,
}

impl GpioConnection {
    /// Creates a connection on top of `driver` with no pins allocated.
    pub fn new<D: GpioDriver + 'static>(driver: D) -> Self {
        GpioConnection::with_driver(Arc::new(driver))
    }

    pub fn with_driver(driver: Arc<dyn GpioDriver>) -> Self {
        GpioConnection {
            driver,
            registry: Arc::new(Mutex::new(PinRegistry::default())),
            mapping: board(),
        }
    }

    /// Opens the backend chosen in `settings` and initialises the board mapping.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mapping = init_board(settings.revision)?;

        let driver: Arc<dyn GpioDriver> = match settings.driver {
            DriverKind::Memory => Arc::new(MemoryGpioDriver::open(&settings.gpiomem_path)?),
            DriverKind::Sysfs => Arc::new(
                SysfsGpioDriver::new(&settings.sysfs_root).with_export_timeout(settings.export_timeout()),
            ),
            DriverKind::Simulated => Arc::new(SimulatedGpioDriver::new()),
        };
        debug!("opened {:?} driver", settings.driver);

        Ok(GpioConnection::with_driver(driver).with_mapping(mapping))
    }

    /// Uses `mapping` for connector translations instead of the process-wide board.
    pub fn with_mapping(mut self, mapping: &'static PinMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn driver(&self) -> &Arc<dyn GpioDriver> {
        &self.driver
    }

    /// Translates a connector position using this connection's board mapping.
    pub fn to_processor(&self, pin: ConnectorPin) -> Result<ProcessorPin> {
        match self.mapping.or_else(board) {
            Some(mapping) => mapping.to_processor(pin),
            None => Err(GpioError::InvalidConfiguration(String::from(
                "board revision is not initialised; call init_board first",
            ))),
        }
    }

    fn registry(&self) -> MutexGuard<'_, PinRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes exclusive ownership of `pin` for `direction`.
    ///
    /// Fails with `AllocationConflict` when the pin is already owned, whatever
    /// direction it was taken for.
    pub fn allocate(&self, pin: ProcessorPin, direction: Direction) -> Result<()> {
        self.claim(pin, direction, false)?;
        Ok(())
    }

    fn claim(&self, pin: ProcessorPin, direction: Direction, handle: bool) -> Result<Owner> {
        let owner = self.registry().reserve(pin, direction, handle)?;

        // the driver may block for a while (sysfs export), so the registry
        // stays unlocked and the reservation keeps other claimants out
        if let Err(e) = self.driver.allocate(pin, direction) {
            self.registry().remove(pin);
            return Err(e);
        }
        self.registry().activate(pin);
        debug!("allocated {} as {}", pin, direction);
        Ok(owner)
    }

    /// Gives `pin` back, whoever holds it. Handles still referring to the pin
    /// fail with `NotAllocated` from then on.
    ///
    /// Releasing a pin that is not owned fails with `NotAllocated`. If the
    /// driver cannot release the pin it stays allocated.
    pub fn release(&self, pin: ProcessorPin) -> Result<()> {
        let mut registry = self.registry();
        let allocation = registry.get(pin)?;
        self.driver.release(pin)?;
        registry.remove(pin);
        debug!("released {} ({})", pin, allocation.direction);
        Ok(())
    }

    /// Releases every pin owned through this connection.
    ///
    /// Every pin is attempted; the first driver error is returned once all of
    /// them have been tried.
    pub fn cleanup(&self) -> Result<()> {
        let mut first_error = None;
        for (pin, _) in self.allocated_pins() {
            match self.release(pin) {
                Ok(()) | Err(GpioError::NotAllocated(_)) => {}
                Err(e) => {
                    warn!("failed to release {}: {}", pin, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Returns the direction `pin` was allocated for, or `None` if it is free.
    pub fn direction(&self, pin: ProcessorPin) -> Option<Direction> {
        self.registry().get(pin).ok().map(|allocation| allocation.direction)
    }

    pub fn allocated_pins(&self) -> Vec<(ProcessorPin, Direction)> {
        let mut pins: Vec<_> = self
            .registry()
            .pins
            .iter()
            .filter(|(_, allocation)| allocation.ready)
            .map(|(pin, allocation)| (*pin, allocation.direction))
            .collect();
        pins.sort_by_key(|(pin, _)| *pin);
        pins
    }

    /// Drives an output pin taken with [`allocate`](GpioConnection::allocate).
    ///
    /// Writing to an input fails with `WrongDirection`. Pins owned by an
    /// [`OutputPin`] (including the lines of an [`SpiConnection`](crate::SpiConnection))
    /// can only be driven through that handle; writing them here fails with
    /// `AllocationConflict`.
    pub fn write(&self, pin: ProcessorPin, level: Level) -> Result<()> {
        let registry = self.registry();
        let allocation = registry.get(pin)?;
        if allocation.owner != Owner::Connection {
            return Err(GpioError::AllocationConflict(pin));
        }
        if allocation.direction != Direction::OUT {
            return Err(GpioError::WrongDirection {
                pin,
                expected: Direction::OUT,
                actual: allocation.direction,
            });
        }
        self.driver.write(pin, level)
    }

    /// Samples an allocated pin.
    ///
    /// Outputs may be read as well; the returned level is what the line
    /// currently carries.
    pub fn read(&self, pin: ProcessorPin) -> Result<Level> {
        self.registry().get(pin)?;
        self.driver.read(pin)
    }

    /// Busy-waits until `pin` reads `level`, failing with `Timeout` after `timeout`.
    pub fn wait(&self, pin: ProcessorPin, level: Level, timeout: Duration) -> Result<()> {
        self.registry().get(pin)?;
        self.driver.wait(pin, level, timeout)
    }

    /// Measures how long `pin` stays at `level`.
    ///
    /// Waits for the line to be at the opposite level, then for it to reach
    /// `level`, then for it to leave it, and returns the time between the last
    /// two edges. A pulse already in progress when the call starts is skipped.
    /// `timeout` bounds each phase separately.
    pub fn measure_pulse(&self, pin: ProcessorPin, level: Level, timeout: Duration) -> Result<Duration> {
        self.registry().get(pin)?;
        measure_pulse(self.driver.as_ref(), pin, level, timeout)
    }

    /// Allocates `pin` as an output driven to `initial`.
    pub fn output(&self, pin: ProcessorPin, initial: Level) -> Result<OutputPin> {
        let config = PinConfiguration::output(pin, initial, None)?;
        self.open_output(&config)
    }

    /// Allocates `pin` as an input.
    pub fn input(&self, pin: ProcessorPin) -> Result<InputPin> {
        let config = PinConfiguration::input(pin, None)?;
        self.open_input(&config)
    }

    /// Sets up a batch of pins.
    ///
    /// The whole batch is checked for duplicate pins and names before anything
    /// is allocated. If one allocation fails the pins already set up are released.
    pub fn configure(&self, configs: &[PinConfiguration]) -> Result<Vec<PinHandle>> {
        for (i, config) in configs.iter().enumerate() {
            for other in &configs[i + 1..] {
                if other.pin == config.pin {
                    return Err(GpioError::InvalidConfiguration(format!(
                        "{} is configured twice",
                        config.pin
                    )));
                }
                if config.name.is_some() && other.name == config.name {
                    return Err(GpioError::InvalidConfiguration(format!(
                        "pin name {:?} is used twice",
                        config.name().unwrap_or_default()
                    )));
                }
            }
        }

        let mut handles = Vec::with_capacity(configs.len());
        for config in configs {
            let handle = match config.direction {
                Direction::IN => PinHandle::Input(self.open_input(config)?),
                Direction::OUT => PinHandle::Output(self.open_output(config)?),
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    fn open_output(&self, config: &PinConfiguration) -> Result<OutputPin> {
        let owner = self.claim(config.pin, Direction::OUT, true)?;
        let mut output = OutputPin {
            connection: self.clone(),
            pin: config.pin,
            owner,
            name: config.name.clone(),
            level: Level::LOW,
        };
        // the handle now owns the pin, so a failed write still releases it
        output.write(config.initial.unwrap_or(Level::LOW))?;
        Ok(output)
    }

    fn open_input(&self, config: &PinConfiguration) -> Result<InputPin> {
        let owner = self.claim(config.pin, Direction::IN, true)?;
        Ok(InputPin {
            connection: self.clone(),
            pin: config.pin,
            owner,
            name: config.name.clone(),
        })
    }

    fn check_owner(&self, pin: ProcessorPin, owner: Owner) -> Result<()> {
        self.registry().owned_by(pin, owner)?;
        Ok(())
    }

    fn write_owned(&self, pin: ProcessorPin, owner: Owner, level: Level) -> Result<()> {
        let registry = self.registry();
        registry.owned_by(pin, owner)?;
        self.driver.write(pin, level)
    }

    fn read_owned(&self, pin: ProcessorPin, owner: Owner) -> Result<Level> {
        let registry = self.registry();
        registry.owned_by(pin, owner)?;
        self.driver.read(pin)
    }

    /// Releases `pin` only while `owner` still holds it.
    fn release_owned(&self, pin: ProcessorPin, owner: Owner, name: Option<&str>) {
        let mut registry = self.registry();
        if registry.owned_by(pin, owner).is_err() {
            trace!("{} ({:?}) was already released", pin, name);
            return;
        }
        match self.driver.release(pin) {
            Ok(()) => {
                registry.remove(pin);
                debug!("released {} ({:?})", pin, name);
            }
            Err(e) => warn!("failed to release {} ({:?}): {}", pin, name, e),
        }
    }
}

pub(crate) fn measure_pulse(
    driver: &dyn GpioDriver,
    pin: ProcessorPin,
    level: Level,
    timeout: Duration,
) -> Result<Duration> {
    driver.wait(pin, !level, timeout)?;
    driver.wait(pin, level, timeout)?;
    let start = Instant::now();
    driver.wait(pin, !level, timeout)?;
    let width = start.elapsed();
    trace!("{} pulse on {} lasted {:?}", level, pin, width);
    Ok(width)
}

/// An output pin owned by one consumer. The pin is released when the handle is dropped.
#[derive(Debug)]
pub struct OutputPin {
    connection: GpioConnection,
    pin: ProcessorPin,
    owner: Owner,
    name: Option<String>,
    level: Level,
}

impl OutputPin {
    pub fn pin(&self) -> ProcessorPin {
        self.pin
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The level last written to the pin.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Fails with `NotAllocated` once the pin has been released through the connection.
    pub fn write(&mut self, level: Level) -> Result<()> {
        self.connection.write_owned(self.pin, self.owner, level)?;
        self.level = level;
        Ok(())
    }

    pub fn set_high(&mut self) -> Result<()> {
        self.write(Level::HIGH)
    }

    pub fn set_low(&mut self) -> Result<()> {
        self.write(Level::LOW)
    }

    pub fn toggle(&mut self) -> Result<()> {
        self.write(!self.level)
    }

    /// Inverts the pin for `duration`, then restores it.
    pub fn blink(&mut self, duration: Duration) -> Result<()> {
        self.toggle()?;
        timer::sleep(duration);
        self.toggle()
    }
}

impl Drop for OutputPin {
    fn drop(&mut self) {
        self.connection
            .release_owned(self.pin, self.owner, self.name.as_deref());
    }
}

/// An input pin owned by one consumer. The pin is released when the handle is dropped.
#[derive(Debug)]
pub struct InputPin {
    connection: GpioConnection,
    pin: ProcessorPin,
    owner: Owner,
    name: Option<String>,
}

impl InputPin {
    pub fn pin(&self) -> ProcessorPin {
        self.pin
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn read(&self) -> Result<Level> {
        self.connection.read_owned(self.pin, self.owner)
    }

    pub fn is_high(&self) -> Result<bool> {
        Ok(self.read()?.is_high())
    }

    pub fn wait(&self, level: Level, timeout: Duration) -> Result<()> {
        self.connection.check_owner(self.pin, self.owner)?;
        self.connection.driver.wait(self.pin, level, timeout)
    }

    /// See [`GpioConnection::measure_pulse`].
    pub fn measure_pulse(&self, level: Level, timeout: Duration) -> Result<Duration> {
        self.connection.check_owner(self.pin, self.owner)?;
        measure_pulse(self.connection.driver.as_ref(), self.pin, level, timeout)
    }
}

impl Drop for InputPin {
    fn drop(&mut self) {
        self.connection
            .release_owned(self.pin, self.owner, self.name.as_deref());
    }
}

/// A pin set up by [`GpioConnection::configure`].
#[derive(Debug)]
pub enum PinHandle {
    Input(InputPin),
    Output(OutputPin),
}

impl PinHandle {
    pub fn pin(&self) -> ProcessorPin {
        match self {
            PinHandle::Input(input) => input.pin(),
            PinHandle::Output(output) => output.pin(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            PinHandle::Input(input) => input.name(),
            PinHandle::Output(output) => output.name(),
        }
    }

    pub fn into_input(self) -> Option<InputPin> {
        match self {
            PinHandle::Input(input) => Some(input),
            PinHandle::Output(_) => None,
        }
    }

    pub fn into_output(self) -> Option<OutputPin> {
        match self {
            PinHandle::Output(output) => Some(output),
            PinHandle::Input(_) => None,
        }
    }
}
