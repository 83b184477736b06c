use raspi_io::{
    BitOrder, ConnectorPin, Direction, GpioConnection, GpioError, InputMode, Level, Mcp3xxx,
    Mcp3xxxModel, PinMapping, ProcessorPin, Revision, SimulatedGpioDriver, SpiConnection, SpiPins,
    SpiSettings,
};
use std::{
    thread,
    time::{Duration, Instant},
};

const CLOCK: ProcessorPin = ProcessorPin(11);
const SELECT: ProcessorPin = ProcessorPin(8);
const MISO: ProcessorPin = ProcessorPin(9);
const MOSI: ProcessorPin = ProcessorPin(10);

fn levels(bits: &str) -> Vec<Level> {
    bits.chars().map(|c| Level::from(c == '1')).collect()
}

#[test]
fn test_adc_exchange_decodes_717() {
    let driver = SimulatedGpioDriver::new();
    let gpio = GpioConnection::new(driver.clone());
    let pins = SpiPins {
        clock: CLOCK,
        select: SELECT,
        miso: Some(MISO),
        mosi: Some(MOSI),
    };
    let mut spi = SpiConnection::open(&gpio, pins, SpiSettings::default()).unwrap();
    driver.script(MISO, levels("1011001101"));

    let value = spi
        .transaction(|bus| {
            bus.write_bit(true)?;
            bus.write_bit(true)?;
            bus.write_bits(0b010, 3)?;
            bus.synchronize_clock()?;
            bus.read_bits(10)
        })
        .unwrap();

    assert_eq!(value, 0b1011001101);
    assert_eq!(value, 717);
    assert!(!spi.is_selected());
    assert_eq!(driver.output_level(SELECT), Some(Level::HIGH));
}

#[test]
fn test_mcp3008_reads_relative_value() {
    let driver = SimulatedGpioDriver::new();
    let gpio = GpioConnection::new(driver.clone());
    let pins = SpiPins {
        clock: CLOCK,
        select: SELECT,
        miso: Some(MISO),
        mosi: Some(MOSI),
    };
    let spi = SpiConnection::open(&gpio, pins, SpiSettings::default()).unwrap();
    let mut adc = Mcp3xxx::new(spi, Mcp3xxxModel::Mcp3008).unwrap();
    driver.script(MISO, levels("1011001101"));

    let value = adc.read(2, InputMode::SingleEnded).unwrap();
    assert_eq!(value.value(), 717);
    assert_eq!(value.range(), 1023);
    assert!((value.relative() - 717.0 / 1023.0).abs() < f64::EPSILON);

    drop(adc);
    assert!(gpio.allocated_pins().is_empty());
}

#[test]
fn test_write_only_transport_cannot_read() {
    let gpio = GpioConnection::new(SimulatedGpioDriver::new());
    let pins = SpiPins {
        clock: CLOCK,
        select: SELECT,
        miso: None,
        mosi: Some(MOSI),
    };
    let mut spi = SpiConnection::open(&gpio, pins, SpiSettings::default()).unwrap();

    assert!(matches!(
        spi.read_bits(8),
        Err(GpioError::UnsupportedOperation(_))
    ));
    spi.write_bits(0xA5, 8).unwrap();
}

#[test]
fn test_bit_order_sequences() {
    for (order, expected) in [(BitOrder::MsbFirst, [1u8, 1, 0]), (BitOrder::LsbFirst, [0, 1, 1])] {
        let driver = SimulatedGpioDriver::new();
        let gpio = GpioConnection::new(driver.clone());
        let pins = SpiPins {
            clock: CLOCK,
            select: SELECT,
            miso: None,
            mosi: Some(MOSI),
        };
        let settings = SpiSettings {
            bit_order: order,
            ..SpiSettings::default()
        };
        let mut spi = SpiConnection::open(&gpio, pins, settings).unwrap();
        driver.clear_writes();
        spi.write_bits(0b110, 3).unwrap();

        let mut mosi = Level::LOW;
        let mut sent = Vec::new();
        for (pin, level) in driver.writes() {
            if pin == MOSI {
                mosi = level;
            } else if pin == CLOCK && level == Level::HIGH {
                sent.push(mosi as u8);
            }
        }
        assert_eq!(sent, expected, "{:?}", order);
    }
}

#[test]
fn test_failing_driver_code_leaves_select_deasserted() {
    let driver = SimulatedGpioDriver::new();
    let gpio = GpioConnection::new(driver.clone());
    let pins = SpiPins {
        clock: CLOCK,
        select: SELECT,
        miso: Some(MISO),
        mosi: Some(MOSI),
    };
    let mut spi = SpiConnection::open(&gpio, pins, SpiSettings::default()).unwrap();

    let result = (|| -> raspi_io::Result<u64> {
        let mut selection = spi.select_slave()?;
        selection.write_bits(0b11, 2)?;
        // checksum failure reported by the device driver
        Err(GpioError::InvalidConfiguration(String::from("bad checksum")))
    })();

    assert!(result.is_err());
    assert_eq!(driver.output_level(SELECT), Some(Level::HIGH));
}

#[test]
fn test_edge_wait_timeout_is_bounded() {
    let gpio = GpioConnection::new(SimulatedGpioDriver::new());
    let pin = ProcessorPin(17);
    gpio.allocate(pin, Direction::IN).unwrap();

    let start = Instant::now();
    let result = gpio.wait(pin, Level::HIGH, Duration::from_millis(10));
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(GpioError::Timeout { .. })));
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_millis(15), "took {:?}", elapsed);
}

#[test]
fn test_allocation_is_exclusive_across_clones() {
    let gpio = GpioConnection::new(SimulatedGpioDriver::new());
    let other = gpio.clone();

    let _led = gpio.output(ProcessorPin(4), Level::LOW).unwrap();
    assert!(matches!(
        other.input(ProcessorPin(4)),
        Err(GpioError::AllocationConflict(_))
    ));
    assert!(matches!(
        other.allocate(ProcessorPin(4), Direction::OUT),
        Err(GpioError::AllocationConflict(_))
    ));
}

#[test]
fn test_spi_lines_cannot_be_driven_through_the_connection() {
    let driver = SimulatedGpioDriver::new();
    let gpio = GpioConnection::new(driver.clone());
    let pins = SpiPins {
        clock: CLOCK,
        select: SELECT,
        miso: Some(MISO),
        mosi: Some(MOSI),
    };
    let mut spi = SpiConnection::open(&gpio, pins, SpiSettings::default()).unwrap();

    assert!(matches!(
        gpio.write(SELECT, Level::LOW),
        Err(GpioError::AllocationConflict(_))
    ));
    assert!(!spi.is_selected());
    assert_eq!(driver.output_level(SELECT), Some(Level::HIGH));

    // after cleanup the bus can no longer move the lines
    gpio.cleanup().unwrap();
    let _led = gpio.output(SELECT, Level::HIGH).unwrap();
    assert!(matches!(
        spi.write_bits(0b1, 1),
        Err(GpioError::NotAllocated(_))
    ));
    drop(spi);
    assert_eq!(gpio.direction(SELECT), Some(Direction::OUT));
    assert_eq!(driver.output_level(SELECT), Some(Level::HIGH));
}

#[test]
fn test_independent_buses_on_threads() {
    let driver = SimulatedGpioDriver::new();
    let gpio = GpioConnection::new(driver.clone());

    let buses = [
        (ProcessorPin(2), ProcessorPin(3), ProcessorPin(4)),
        (ProcessorPin(17), ProcessorPin(27), ProcessorPin(22)),
    ];
    let handles: Vec<_> = buses
        .into_iter()
        .map(|(clock, select, mosi)| {
            let gpio = gpio.clone();
            thread::spawn(move || {
                let pins = SpiPins {
                    clock,
                    select,
                    miso: None,
                    mosi: Some(mosi),
                };
                let mut spi = SpiConnection::open(&gpio, pins, SpiSettings::default()).unwrap();
                for value in 0..32u64 {
                    spi.transaction(|bus| bus.write_bits(value, 5)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(driver.levels_written(ProcessorPin(2)).len(), 1 + 32 * 5 * 2);
    assert_eq!(driver.levels_written(ProcessorPin(27)).len(), 1 + 32 * 2);
    assert!(gpio.allocated_pins().is_empty());
}

#[test]
fn test_mapping_round_trip_and_misses() {
    let rev1 = PinMapping::for_revision(Revision::V1);
    let rev2 = PinMapping::for_revision(Revision::V2);

    for mapping in [&rev1, &rev2] {
        for connector in ConnectorPin::ALL {
            match mapping.to_processor(connector) {
                Ok(processor) => assert_eq!(mapping.to_connector(processor).unwrap(), connector),
                Err(e) => assert!(matches!(e, GpioError::MappingNotFound { .. })),
            }
        }
    }
    assert!(rev1.to_processor(ConnectorPin::P5Pin05).is_err());
    assert_eq!(rev2.to_processor(ConnectorPin::P5Pin05).unwrap(), ProcessorPin(30));
}
