use crate::protocol::{MAX_SHUNT_CURRENT, MIN_SHUNT_CURRENT};
use crate::Error;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct BatteryConfig {
    pub name: String,
    /// Redundant with `cell_ids`, checked when present.
    #[serde(default)]
    pub cell_count: Option<usize>,
    pub cell_ids: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_serial_port")]
    pub serial_port: String,
    #[serde(default = "Config::default_period", with = "humantime_serde")]
    pub period: Duration,
    /// Cells below this voltage (mV) are never shunted.
    #[serde(default = "Config::default_soc_relevant_voltage")]
    pub soc_relevant_voltage: u16,
    /// Cells within this many mV of the battery minimum are not shunted.
    #[serde(default = "Config::default_balance_deadband")]
    pub balance_deadband: u16,
    /// Floor for any non-zero shunt target, in mA.
    #[serde(default = "Config::default_min_shunt_current")]
    pub min_shunt_current: u16,
    #[serde(default)]
    pub charger_relay: Option<PathBuf>,
    #[serde(default)]
    pub pack_current: Option<PathBuf>,
    pub batteries: Vec<BatteryConfig>,
}

impl Config {
    pub const DEFAULT_CONFIG_FILE: &'static str = "bms.yaml";

    fn default_serial_port() -> String {
        String::from("/dev/ttyS0")
    }

    fn default_period() -> Duration {
        Duration::from_secs(10)
    }

    fn default_soc_relevant_voltage() -> u16 {
        3000
    }

    fn default_balance_deadband() -> u16 {
        20
    }

    fn default_min_shunt_current() -> u16 {
        MIN_SHUNT_CURRENT
    }

    pub fn load(config_file_path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = config_file_path.as_ref();
        log::debug!("Loading config file from {path:?}");
        let config_file = std::fs::File::open(path)?;
        let config: Self = serde_yaml::from_reader(&config_file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.batteries.is_empty() {
            return Err(Error::Config("no batteries configured".into()));
        }
        if self.period.is_zero() {
            return Err(Error::Config("period must not be zero".into()));
        }
        if !(MIN_SHUNT_CURRENT..=MAX_SHUNT_CURRENT).contains(&self.min_shunt_current) {
            return Err(Error::Config(format!(
                "min_shunt_current {} mA is outside {MIN_SHUNT_CURRENT}..={MAX_SHUNT_CURRENT} mA",
                self.min_shunt_current
            )));
        }
        let mut seen = HashSet::new();
        for battery in &self.batteries {
            if battery.cell_ids.is_empty() {
                return Err(Error::Config(format!("battery '{}' has no cells", battery.name)));
            }
            if let Some(count) = battery.cell_count {
                if count != battery.cell_ids.len() {
                    return Err(Error::Config(format!(
                        "battery '{}' declares {count} cells but lists {}",
                        battery.name,
                        battery.cell_ids.len()
                    )));
                }
            }
            for id in &battery.cell_ids {
                if !seen.insert(*id) {
                    return Err(Error::Config(format!("cell id {id:#06X} used twice")));
                }
            }
        }
        Ok(())
    }
}
