//! In-process GPIO backend.
//!
//! Nothing touches hardware: outputs are recorded in a trace and inputs are fed
//! from per-pin scripts. Used by the test suite and by the `simulated` driver
//! setting for dry runs of a wiring.

use log::trace;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::driver::GpioDriver;
use crate::error::Result;
use crate::gpio::{Direction, Level};
use crate::gpio_pin_data::ProcessorPin;

#[derive(Debug, Default)]
struct SimState {
    set_up: HashMap<ProcessorPin, Direction>,
    released: HashSet<ProcessorPin>,
    outputs: HashMap<ProcessorPin, Level>,
    inputs: HashMap<ProcessorPin, Level>,
    scripts: HashMap<ProcessorPin, VecDeque<Level>>,
    writes: Vec<(ProcessorPin, Level)>,
}

/// A GPIO backend backed by memory.
///
/// Clones share state, so a test can keep one clone for inspection and hand
/// the other to a [`GpioConnection`](crate::GpioConnection).
///
/// Reading an input pops the next level from its script; once the script is
/// exhausted the pin holds the last scripted level (or the level set with
/// [`set_input`](SimulatedGpioDriver::set_input), `LOW` by default).
/// Reading an output returns the last level written.
#[derive(Clone, Debug, Default)]
pub struct SimulatedGpioDriver {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedGpioDriver {
    pub fn new() -> Self {
        SimulatedGpioDriver::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Holds `pin` at `level` and discards any pending script.
    pub fn set_input(&self, pin: ProcessorPin, level: Level) {
        let mut state = self.state();
        state.scripts.remove(&pin);
        state.inputs.insert(pin, level);
    }

    /// Queues levels returned by successive reads of `pin`.
    pub fn script<I>(&self, pin: ProcessorPin, levels: I)
    where
        I: IntoIterator<Item = Level>,
    {
        let mut state = self.state();
        state.scripts.entry(pin).or_default().extend(levels);
    }

    /// Every write in order, across all pins.
    pub fn writes(&self) -> Vec<(ProcessorPin, Level)> {
        self.state().writes.clone()
    }

    /// The writes made to `pin`, in order.
    pub fn levels_written(&self, pin: ProcessorPin) -> Vec<Level> {
        self.state()
            .writes
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
            .collect()
    }

    /// The level an output pin currently drives, if it was ever written.
    pub fn output_level(&self, pin: ProcessorPin) -> Option<Level> {
        self.state().outputs.get(&pin).copied()
    }

    /// Whether `pin` is currently allocated on this backend.
    pub fn is_set_up(&self, pin: ProcessorPin) -> bool {
        self.state().set_up.contains_key(&pin)
    }

    /// Whether `pin` has been released at least once.
    pub fn was_released(&self, pin: ProcessorPin) -> bool {
        self.state().released.contains(&pin)
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

impl GpioDriver for SimulatedGpioDriver {
    fn allocate(&self, pin: ProcessorPin, direction: Direction) -> Result<()> {
        trace!("sim: set up {} as {}", pin, direction);
        self.state().set_up.insert(pin, direction);
        Ok(())
    }

    fn release(&self, pin: ProcessorPin) -> Result<()> {
        trace!("sim: release {}", pin);
        let mut state = self.state();
        state.set_up.remove(&pin);
        state.released.insert(pin);
        Ok(())
    }

    fn write(&self, pin: ProcessorPin, level: Level) -> Result<()> {
        let mut state = self.state();
        state.outputs.insert(pin, level);
        state.writes.push((pin, level));
        Ok(())
    }

    fn read(&self, pin: ProcessorPin) -> Result<Level> {
        let mut state = self.state();
        if state.set_up.get(&pin) == Some(&Direction::OUT) {
            return Ok(state.outputs.get(&pin).copied().unwrap_or(Level::LOW));
        }

        if let Some(script) = state.scripts.get_mut(&pin) {
            if let Some(level) = script.pop_front() {
                if script.is_empty() {
                    state.scripts.remove(&pin);
                    state.inputs.insert(pin, level);
                }
                return Ok(level);
            }
        }

        Ok(state.inputs.get(&pin).copied().unwrap_or(Level::LOW))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_then_hold_last_level() {
        let sim = SimulatedGpioDriver::new();
        let pin = ProcessorPin(5);
        sim.allocate(pin, Direction::IN).unwrap();
        sim.script(pin, [Level::HIGH, Level::LOW, Level::HIGH]);

        let read: Vec<Level> = (0..5).map(|_| sim.read(pin).unwrap()).collect();
        assert_eq!(
            read,
            vec![Level::HIGH, Level::LOW, Level::HIGH, Level::HIGH, Level::HIGH]
        );
    }

    #[test]
    fn test_output_reads_back_last_write() {
        let sim = SimulatedGpioDriver::new();
        let pin = ProcessorPin(6);
        sim.allocate(pin, Direction::OUT).unwrap();
        assert_eq!(sim.read(pin).unwrap(), Level::LOW);
        sim.write(pin, Level::HIGH).unwrap();
        assert_eq!(sim.read(pin).unwrap(), Level::HIGH);
        assert_eq!(sim.output_level(pin), Some(Level::HIGH));
    }

    #[test]
    fn test_release_is_recorded() {
        let sim = SimulatedGpioDriver::new();
        let pin = ProcessorPin(12);
        sim.allocate(pin, Direction::IN).unwrap();
        sim.release(pin).unwrap();
        assert!(!sim.is_set_up(pin));
        assert!(sim.was_released(pin));
    }
}
