//! Code for the configuration of the USB printing subsystem.

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::traits::MachineProfileProvider;

fn default_poll_interval() -> u64 {
    5
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_firmware_root() -> PathBuf {
    PathBuf::from("firmware")
}

fn default_extruders() -> usize {
    1
}

/// The configuration of the USB printing subsystem.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Seconds between discovery scans.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Baud rate used when opening newly discovered ports.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Directory holding firmware resources, by category.
    #[serde(default = "default_firmware_root")]
    pub firmware_root: PathBuf,

    /// The active machine profile.
    #[serde(default)]
    pub machine: MachineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            baud_rate: default_baud_rate(),
            firmware_root: default_firmware_root(),
            machine: MachineConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from a toml file.
    pub fn from_file(file: &PathBuf) -> Result<Self> {
        let config = std::fs::read_to_string(file)?;
        Self::from_str(&config)
    }

    /// Parse a configuration from a toml string.
    pub fn from_str(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }

    /// Time between discovery scans.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// The active machine profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    /// Machine definition id (e.g. "ultimaker_original").
    #[serde(default)]
    pub id: String,

    /// Whether the heated-bed option is enabled.
    #[serde(default)]
    pub heated_bed: bool,

    /// Number of extruders.
    #[serde(default = "default_extruders")]
    pub extruders: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            heated_bed: false,
            extruders: default_extruders(),
        }
    }
}

impl MachineProfileProvider for MachineConfig {
    fn machine_id(&self) -> String {
        self.id.clone()
    }

    fn heated_bed_enabled(&self) -> bool {
        self.heated_bed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    use super::*;

    #[test]
    fn test_config_from_str_defaults() -> TestResult {
        let config = Config::from_str("")?;
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.firmware_root, PathBuf::from("firmware"));
        assert_eq!(config.machine.extruders, 1);
        assert!(!config.machine.heated_bed);
        Ok(())
    }

    #[test]
    fn test_config_from_str_full() -> TestResult {
        let config = r#"
            poll_interval_secs = 1
            baud_rate = 250000
            firmware_root = "/usr/share/printer/resources"

            [machine]
            id = "ultimaker_original"
            heated_bed = true
            extruders = 2
        "#;
        let config = Config::from_str(config)?;
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.baud_rate, 250_000);
        assert_eq!(config.machine.id, "ultimaker_original");
        assert!(config.machine.heated_bed);
        assert_eq!(config.machine.extruders, 2);
        Ok(())
    }

    #[test]
    fn test_config_from_file() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("usb-printing.toml");
        std::fs::write(&path, "poll_interval_secs = 2\n")?;

        let config = Config::from_file(&path)?;
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn test_machine_config_is_a_profile_provider() {
        let machine = MachineConfig {
            id: "ultimaker2".to_string(),
            heated_bed: true,
            extruders: 1,
        };
        assert_eq!(machine.machine_id(), "ultimaker2");
        assert!(machine.heated_bed_enabled());
    }
}
