//! Console sample program for the `raspi_io` primitives.
//!
//! ```bash
//! # Show the header to processor mapping of a revision 2 board
//! raspi-io pins --revision 2
//!
//! # Blink an LED on P1-11 five times
//! raspi-io blink P1-11 --count 5 --period-ms 500
//!
//! # Measure the echo pulse of an HC-SR04 (trigger P1-16, echo P1-18)
//! raspi-io pulse P1-18 --trigger P1-16
//!
//! # Read channel 0 of an MCP3008 on the usual wiring
//! raspi-io adc --channel 0
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::{path::PathBuf, time::Duration};

use raspi_io::{
    ConnectorPin, GpioConnection, InputMode, Level, Mcp3xxx, Mcp3xxxModel, PinMapping, Revision,
    Settings, SpiConnection, SpiPins, SpiSettings,
};

/// Raspberry Pi GPIO tools
#[derive(Parser)]
#[command(name = "raspi-io")]
#[command(version = "0.1.0")]
#[command(about = "GPIO, pulse timing and bit-banged SPI on the Raspberry Pi")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the connector to processor pin mapping
    Pins {
        /// Board revision (1 or 2); defaults to the settings file
        #[arg(short, long)]
        revision: Option<u8>,
    },

    /// Toggle an output pin
    Blink {
        /// Connector pin (e.g., P1-11)
        pin: ConnectorPin,

        #[arg(short = 'n', long, default_value_t = 3)]
        count: u32,

        #[arg(short, long, default_value_t = 500)]
        period_ms: u64,
    },

    /// Read the level of an input pin
    Read {
        pin: ConnectorPin,
    },

    /// Measure a high pulse, optionally after a 10µs trigger pulse
    Pulse {
        pin: ConnectorPin,

        /// Output pin pulsed high before measuring
        #[arg(short, long)]
        trigger: Option<ConnectorPin>,

        #[arg(long, default_value_t = 100)]
        timeout_ms: u64,
    },

    /// Read an MCP3008/MCP3208 channel over bit-banged SPI
    Adc {
        #[arg(long, value_enum, default_value_t = Model::Mcp3008)]
        model: Model,

        #[arg(long, default_value_t = 0)]
        channel: u8,

        /// Use differential instead of single-ended input
        #[arg(long)]
        differential: bool,

        #[arg(long, default_value = "P1-12")]
        clock: ConnectorPin,

        #[arg(long, default_value = "P1-22")]
        select: ConnectorPin,

        #[arg(long, default_value = "P1-16")]
        miso: ConnectorPin,

        #[arg(long, default_value = "P1-18")]
        mosi: ConnectorPin,

        /// Reference voltage used to scale the reading
        #[arg(long, default_value_t = 3.3)]
        reference: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Model {
    Mcp3008,
    Mcp3208,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Pins { revision } => handle_pins(revision, &settings),
        Commands::Blink {
            pin,
            count,
            period_ms,
        } => handle_blink(&settings, pin, count, Duration::from_millis(period_ms)),
        Commands::Read { pin } => handle_read(&settings, pin),
        Commands::Pulse {
            pin,
            trigger,
            timeout_ms,
        } => handle_pulse(&settings, pin, trigger, Duration::from_millis(timeout_ms)),
        Commands::Adc {
            model,
            channel,
            differential,
            clock,
            select,
            miso,
            mosi,
            reference,
        } => {
            let gpio = connect(&settings)?;
            let pins = SpiPins {
                clock: gpio.to_processor(clock)?,
                select: gpio.to_processor(select)?,
                miso: Some(gpio.to_processor(miso)?),
                mosi: Some(gpio.to_processor(mosi)?),
            };
            let model = match model {
                Model::Mcp3008 => Mcp3xxxModel::Mcp3008,
                Model::Mcp3208 => Mcp3xxxModel::Mcp3208,
            };
            let mode = if differential {
                InputMode::Differential
            } else {
                InputMode::SingleEnded
            };

            let spi = SpiConnection::open(&gpio, pins, SpiSettings::default())?;
            let mut adc = Mcp3xxx::new(spi, model)?;
            let value = adc.read(channel, mode)?;
            println!(
                "channel {}: {} ({:.3} V)",
                channel,
                value,
                value.scaled(reference)
            );
            Ok(())
        }
    }
}

fn connect(settings: &Settings) -> Result<GpioConnection> {
    GpioConnection::from_settings(settings)
        .with_context(|| format!("Failed to open {:?} GPIO driver", settings.driver))
}

fn handle_pins(revision: Option<u8>, settings: &Settings) -> Result<()> {
    let revision = match revision {
        Some(revision) => Revision::try_from(revision)?,
        None => settings.revision,
    };
    let mapping = PinMapping::for_revision(revision);

    println!("Board revision {}", revision);
    println!("{:<10} {}", "Connector", "Processor");
    for (connector, processor) in mapping.pins() {
        println!("{:<10} {}", connector.to_string(), processor);
    }
    Ok(())
}

fn handle_blink(settings: &Settings, pin: ConnectorPin, count: u32, period: Duration) -> Result<()> {
    let gpio = connect(settings)?;
    let mut led = gpio.output(gpio.to_processor(pin)?, Level::LOW)?;

    for i in 0..count {
        info!("blink {}/{} on {}", i + 1, count, pin);
        led.blink(period / 2)?;
        raspi_io::timer::sleep(period / 2);
    }
    Ok(())
}

fn handle_read(settings: &Settings, pin: ConnectorPin) -> Result<()> {
    let gpio = connect(settings)?;
    let input = gpio.input(gpio.to_processor(pin)?)?;
    println!("{}: {}", pin, input.read()?);
    Ok(())
}

fn handle_pulse(
    settings: &Settings,
    pin: ConnectorPin,
    trigger: Option<ConnectorPin>,
    timeout: Duration,
) -> Result<()> {
    let gpio = connect(settings)?;
    let echo = gpio.input(gpio.to_processor(pin)?)?;

    if let Some(trigger) = trigger {
        let mut trigger = gpio.output(gpio.to_processor(trigger)?, Level::LOW)?;
        trigger.blink(Duration::from_micros(10))?;
    }

    let width = echo
        .measure_pulse(Level::HIGH, timeout)
        .with_context(|| format!("No pulse on {} within {:?}", pin, timeout))?;
    println!("{}: high for {:?}", pin, width);
    Ok(())
}
