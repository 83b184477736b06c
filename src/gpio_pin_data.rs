use std::{collections::HashMap, fmt, str::FromStr};

use log::debug;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::error::{GpioError, Result};

/// Specifies the hardware revision of the board.
///
/// The revision decides how connector positions translate to processor lines.
/// Revision 2 moved three P1 pins to other processor lines and added the P5 header.
///
/// * `V1` - Model B revision 1.0
/// * `V2` - Model A and B revision 2.0
///
/// # Example
///
/// ```rust
/// use raspi_io::Revision;
///
/// assert_eq!(Revision::from_str("2").unwrap(), Revision::V2);
/// assert_eq!(Revision::V1.to_str(), "1");
/// ```
#[derive(Debug, Eq, Hash, PartialEq, Clone, Copy, Deserialize)]
#[serde(try_from = "u8")]
pub enum Revision {
    V1,
    V2,
}

impl Revision {
    /// Converts a string to a `Revision`. Valid strings are `"1"` and `"2"`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Revision> {
        match s.trim() {
            "1" => Ok(Revision::V1),
            "2" => Ok(Revision::V2),
            _ => Err(GpioError::InvalidConfiguration(format!(
                "unknown board revision: {}",
                s
            ))),
        }
    }

    pub fn to_str(&self) -> &str {
        match self {
            Revision::V1 => "1",
            Revision::V2 => "2",
        }
    }
}

impl TryFrom<u8> for Revision {
    type Error = GpioError;

    fn try_from(value: u8) -> Result<Self> {
        Revision::from_str(&value.to_string())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// A GPIO line identified by its processor-level (BCM) number.
#[derive(Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Clone, Copy)]
pub struct ProcessorPin(pub u8);

impl ProcessorPin {
    /// Highest line number reachable through the first bank of GPIO registers.
    pub const MAX: u8 = 31;

    pub fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for ProcessorPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// A position on one of the board's external headers.
///
/// Only positions that carry a GPIO line are listed. The P5 header exists on
/// revision 2 boards only.
#[derive(Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Clone, Copy)]
pub enum ConnectorPin {
    P1Pin03,
    P1Pin05,
    P1Pin07,
    P1Pin08,
    P1Pin10,
    P1Pin11,
    P1Pin12,
    P1Pin13,
    P1Pin15,
    P1Pin16,
    P1Pin18,
    P1Pin19,
    P1Pin21,
    P1Pin22,
    P1Pin23,
    P1Pin24,
    P1Pin26,
    P5Pin03,
    P5Pin04,
    P5Pin05,
    P5Pin06,
}

impl ConnectorPin {
    pub const ALL: [ConnectorPin; 21] = [
        ConnectorPin::P1Pin03,
        ConnectorPin::P1Pin05,
        ConnectorPin::P1Pin07,
        ConnectorPin::P1Pin08,
        ConnectorPin::P1Pin10,
        ConnectorPin::P1Pin11,
        ConnectorPin::P1Pin12,
        ConnectorPin::P1Pin13,
        ConnectorPin::P1Pin15,
        ConnectorPin::P1Pin16,
        ConnectorPin::P1Pin18,
        ConnectorPin::P1Pin19,
        ConnectorPin::P1Pin21,
        ConnectorPin::P1Pin22,
        ConnectorPin::P1Pin23,
        ConnectorPin::P1Pin24,
        ConnectorPin::P1Pin26,
        ConnectorPin::P5Pin03,
        ConnectorPin::P5Pin04,
        ConnectorPin::P5Pin05,
        ConnectorPin::P5Pin06,
    ];

    /// Returns the header name and the position on that header.
    pub fn position(&self) -> (&'static str, u8) {
        match self {
            ConnectorPin::P1Pin03 => ("P1", 3),
            ConnectorPin::P1Pin05 => ("P1", 5),
            ConnectorPin::P1Pin07 => ("P1", 7),
            ConnectorPin::P1Pin08 => ("P1", 8),
            ConnectorPin::P1Pin10 => ("P1", 10),
            ConnectorPin::P1Pin11 => ("P1", 11),
            ConnectorPin::P1Pin12 => ("P1", 12),
            ConnectorPin::P1Pin13 => ("P1", 13),
            ConnectorPin::P1Pin15 => ("P1", 15),
            ConnectorPin::P1Pin16 => ("P1", 16),
            ConnectorPin::P1Pin18 => ("P1", 18),
            ConnectorPin::P1Pin19 => ("P1", 19),
            ConnectorPin::P1Pin21 => ("P1", 21),
            ConnectorPin::P1Pin22 => ("P1", 22),
            ConnectorPin::P1Pin23 => ("P1", 23),
            ConnectorPin::P1Pin24 => ("P1", 24),
            ConnectorPin::P1Pin26 => ("P1", 26),
            ConnectorPin::P5Pin03 => ("P5", 3),
            ConnectorPin::P5Pin04 => ("P5", 4),
            ConnectorPin::P5Pin05 => ("P5", 5),
            ConnectorPin::P5Pin06 => ("P5", 6),
        }
    }
}

impl fmt::Display for ConnectorPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (header, position) = self.position();
        write!(f, "{}-{}", header, position)
    }
}

impl FromStr for ConnectorPin {
    type Err = GpioError;

    /// Parses `"P1-11"` style names, case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        let (header, position) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| GpioError::InvalidConfiguration(format!("invalid connector pin: {}", s)))?;
        let position: u8 = position
            .parse()
            .map_err(|_| GpioError::InvalidConfiguration(format!("invalid connector pin: {}", s)))?;

        ConnectorPin::ALL
            .iter()
            .copied()
            .find(|pin| {
                let (h, p) = pin.position();
                h.eq_ignore_ascii_case(header) && p == position
            })
            .ok_or_else(|| GpioError::InvalidConfiguration(format!("invalid connector pin: {}", s)))
    }
}

/// One row of the translation table: a connector position and the processor
/// line it carries on each revision. `None` means the position is absent on that revision.
#[derive(Clone, Copy, Debug)]
struct PinDefinition {
    connector: ConnectorPin,
    rev1: Option<u8>,
    rev2: Option<u8>,
}

const fn pin(connector: ConnectorPin, rev1: Option<u8>, rev2: Option<u8>) -> PinDefinition {
    PinDefinition {
        connector,
        rev1,
        rev2,
    }
}

static PIN_DEFS: [PinDefinition; 21] = [
    pin(ConnectorPin::P1Pin03, Some(0), Some(2)),
    pin(ConnectorPin::P1Pin05, Some(1), Some(3)),
    pin(ConnectorPin::P1Pin07, Some(4), Some(4)),
    pin(ConnectorPin::P1Pin08, Some(14), Some(14)),
    pin(ConnectorPin::P1Pin10, Some(15), Some(15)),
    pin(ConnectorPin::P1Pin11, Some(17), Some(17)),
    pin(ConnectorPin::P1Pin12, Some(18), Some(18)),
    pin(ConnectorPin::P1Pin13, Some(21), Some(27)),
    pin(ConnectorPin::P1Pin15, Some(22), Some(22)),
    pin(ConnectorPin::P1Pin16, Some(23), Some(23)),
    pin(ConnectorPin::P1Pin18, Some(24), Some(24)),
    pin(ConnectorPin::P1Pin19, Some(10), Some(10)),
    pin(ConnectorPin::P1Pin21, Some(9), Some(9)),
    pin(ConnectorPin::P1Pin22, Some(25), Some(25)),
    pin(ConnectorPin::P1Pin23, Some(11), Some(11)),
    pin(ConnectorPin::P1Pin24, Some(8), Some(8)),
    pin(ConnectorPin::P1Pin26, Some(7), Some(7)),
    // P5 header, revision 2 only
    pin(ConnectorPin::P5Pin03, None, Some(28)),
    pin(ConnectorPin::P5Pin04, None, Some(29)),
    pin(ConnectorPin::P5Pin05, None, Some(30)),
    pin(ConnectorPin::P5Pin06, None, Some(31)),
];

/// Bidirectional connector/processor translation for one board revision.
///
/// Built once per process through [`init_board`] and immutable afterwards.
#[derive(Debug)]
pub struct PinMapping {
    revision: Revision,
    to_processor: HashMap<ConnectorPin, ProcessorPin>,
    to_connector: HashMap<ProcessorPin, ConnectorPin>,
}

impl PinMapping {
    /// Builds the translation table for `revision`.
    pub fn for_revision(revision: Revision) -> Self {
        let mut to_processor = HashMap::new();
        let mut to_connector = HashMap::new();

        for def in PIN_DEFS.iter() {
            let line = match revision {
                Revision::V1 => def.rev1,
                Revision::V2 => def.rev2,
            };
            if let Some(line) = line {
                to_processor.insert(def.connector, ProcessorPin(line));
                let previous = to_connector.insert(ProcessorPin(line), def.connector);
                debug_assert!(previous.is_none(), "GPIO{} mapped twice", line);
            }
        }

        PinMapping {
            revision,
            to_processor,
            to_connector,
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Translates a connector position to its processor line.
    pub fn to_processor(&self, pin: ConnectorPin) -> Result<ProcessorPin> {
        self.to_processor
            .get(&pin)
            .copied()
            .ok_or_else(|| GpioError::MappingNotFound {
                pin: pin.to_string(),
                revision: self.revision,
            })
    }

    /// Translates a processor line back to the connector position that carries it.
    pub fn to_connector(&self, pin: ProcessorPin) -> Result<ConnectorPin> {
        self.to_connector
            .get(&pin)
            .copied()
            .ok_or_else(|| GpioError::MappingNotFound {
                pin: pin.to_string(),
                revision: self.revision,
            })
    }

    /// All mapped pairs, ordered by connector position.
    pub fn pins(&self) -> Vec<(ConnectorPin, ProcessorPin)> {
        let mut pins: Vec<_> = self
            .to_processor
            .iter()
            .map(|(connector, processor)| (*connector, *processor))
            .collect();
        pins.sort();
        pins
    }
}

static BOARD: OnceCell<PinMapping> = OnceCell::new();

/// Initialises the process-wide pin mapping for `revision`.
///
/// The first call fixes the revision. Later calls with the same revision
/// return the same table; a different revision is rejected.
pub fn init_board(revision: Revision) -> Result<&'static PinMapping> {
    let mapping = BOARD.get_or_init(|| {
        debug!("initialising pin mapping for board revision {}", revision);
        PinMapping::for_revision(revision)
    });

    if mapping.revision() != revision {
        return Err(GpioError::InvalidConfiguration(format!(
            "board already initialised as revision {}, cannot switch to {}",
            mapping.revision(),
            revision
        )));
    }

    Ok(mapping)
}

/// Returns the mapping set up by [`init_board`], if any.
pub fn board() -> Option<&'static PinMapping> {
    BOARD.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_mapped_pin() {
        for revision in [Revision::V1, Revision::V2] {
            let mapping = PinMapping::for_revision(revision);
            for (connector, processor) in mapping.pins() {
                assert_eq!(mapping.to_processor(connector).unwrap(), processor);
                assert_eq!(mapping.to_connector(processor).unwrap(), connector);
            }
        }
    }

    #[test]
    fn test_reverse_mapping_is_unique() {
        for revision in [Revision::V1, Revision::V2] {
            let mapping = PinMapping::for_revision(revision);
            let mut lines: Vec<_> = mapping.pins().into_iter().map(|(_, p)| p).collect();
            let count = lines.len();
            lines.sort();
            lines.dedup();
            assert_eq!(lines.len(), count);
        }
    }

    #[test]
    fn test_revision_differences() {
        let rev1 = PinMapping::for_revision(Revision::V1);
        let rev2 = PinMapping::for_revision(Revision::V2);

        assert_eq!(rev1.to_processor(ConnectorPin::P1Pin03).unwrap(), ProcessorPin(0));
        assert_eq!(rev2.to_processor(ConnectorPin::P1Pin03).unwrap(), ProcessorPin(2));
        assert_eq!(rev1.to_processor(ConnectorPin::P1Pin13).unwrap(), ProcessorPin(21));
        assert_eq!(rev2.to_processor(ConnectorPin::P1Pin13).unwrap(), ProcessorPin(27));
        assert_eq!(rev1.pins().len(), 17);
        assert_eq!(rev2.pins().len(), 21);
    }

    #[test]
    fn test_unmapped_pins_are_errors() {
        let rev1 = PinMapping::for_revision(Revision::V1);
        for connector in [
            ConnectorPin::P5Pin03,
            ConnectorPin::P5Pin04,
            ConnectorPin::P5Pin05,
            ConnectorPin::P5Pin06,
        ] {
            assert!(matches!(
                rev1.to_processor(connector),
                Err(GpioError::MappingNotFound { revision: Revision::V1, .. })
            ));
        }
        assert!(matches!(
            rev1.to_connector(ProcessorPin(27)),
            Err(GpioError::MappingNotFound { .. })
        ));

        let rev2 = PinMapping::for_revision(Revision::V2);
        for line in [0, 1, 5, 6, 12, 13, 16, 19, 20, 21, 26] {
            assert!(rev2.to_connector(ProcessorPin(line)).is_err());
        }
    }

    #[test]
    fn test_parse_connector_pin() {
        assert_eq!("P1-11".parse::<ConnectorPin>().unwrap(), ConnectorPin::P1Pin11);
        assert_eq!("p5-4".parse::<ConnectorPin>().unwrap(), ConnectorPin::P5Pin04);
        assert!("P1-4".parse::<ConnectorPin>().is_err());
        assert!("P1".parse::<ConnectorPin>().is_err());
        assert_eq!(ConnectorPin::P1Pin26.to_string(), "P1-26");
    }

    #[test]
    fn test_revision_from_str() {
        assert_eq!(Revision::from_str("1").unwrap(), Revision::V1);
        assert_eq!(Revision::try_from(2u8).unwrap(), Revision::V2);
        assert!(Revision::from_str("3").is_err());
    }

    #[test]
    fn test_init_board_is_fixed_after_first_call() {
        let mapping = init_board(Revision::V2).unwrap();
        assert_eq!(mapping.revision(), Revision::V2);
        assert!(std::ptr::eq(mapping, init_board(Revision::V2).unwrap()));
        assert!(std::ptr::eq(mapping, board().unwrap()));
        assert!(matches!(
            init_board(Revision::V1),
            Err(GpioError::InvalidConfiguration(_))
        ));
    }
}
