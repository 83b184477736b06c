//! Settings file.
//!
//! ```toml
//! revision = 2
//! driver = "memory"
//! gpiomem_path = "/dev/gpiomem"
//! sysfs_root = "/sys/class/gpio"
//! export_timeout_ms = 1000
//! ```
//!
//! Every key is optional.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::gpio_pin_data::Revision;
use crate::memory::GPIOMEM_PATH;
use crate::sysfs::SYSFS_ROOT;

/// Which [`GpioDriver`](crate::GpioDriver) backs the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Memory,
    Sysfs,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub revision: Revision,
    pub driver: DriverKind,
    pub gpiomem_path: PathBuf,
    pub sysfs_root: PathBuf,
    pub export_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            revision: Revision::V2,
            driver: DriverKind::Memory,
            gpiomem_path: PathBuf::from(GPIOMEM_PATH),
            sysfs_root: PathBuf::from(SYSFS_ROOT),
            export_timeout_ms: 1000,
        }
    }
}

impl Settings {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse settings")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Settings::parse(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::GpioConnection;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_settings_are_defaults() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_parse_settings() {
        let content = r#"
revision = 1
driver = "sysfs"
sysfs_root = "/tmp/gpio"
export_timeout_ms = 250
"#;
        let settings = Settings::parse(content).unwrap();
        assert_eq!(settings.revision, Revision::V1);
        assert_eq!(settings.driver, DriverKind::Sysfs);
        assert_eq!(settings.sysfs_root, PathBuf::from("/tmp/gpio"));
        assert_eq!(settings.gpiomem_path, PathBuf::from("/dev/gpiomem"));
        assert_eq!(settings.export_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(Settings::parse("revision = 3").is_err());
        assert!(Settings::parse("driver = \"spidev\"").is_err());
        assert!(Settings::parse("speed = 1").is_err());
    }

    #[test]
    fn test_from_file_and_connect() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "driver = \"simulated\"").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        let gpio = GpioConnection::from_settings(&settings).unwrap();
        assert_eq!(
            gpio.to_processor(crate::ConnectorPin::P1Pin13).unwrap(),
            crate::ProcessorPin(27)
        );
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::from_file("/nonexistent/raspi-io.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/raspi-io.toml"));
    }
}
