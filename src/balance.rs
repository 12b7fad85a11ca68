//! Shunt setpoint policy.

use crate::config::Config;
use crate::protocol::{MAX_SHUNT_CURRENT, MIN_SHUNT_CURRENT};
use crate::topology::Battery;
use crate::Error;

/// No balancing while the pack discharges harder than this (mA).
pub const DISCHARGE_LIMIT: i32 = -3000;

/// A shunt current is either off or within what the slaves can regulate.
pub fn validate_shunt_current(current: u16) -> Result<u16, Error> {
    if current == 0 || (MIN_SHUNT_CURRENT..=MAX_SHUNT_CURRENT).contains(&current) {
        Ok(current)
    } else {
        Err(Error::ShuntCurrentRange(current))
    }
}

/// Shunt current ceiling for the hottest cell of a battery (0.01 °C units).
pub fn temperature_ceiling(max_temperature: Option<i16>) -> u16 {
    match max_temperature.unwrap_or(i16::MIN) {
        t if t < 3000 => 450,
        t if t < 4000 => 400,
        t if t < 5000 => 300,
        _ => 150,
    }
}

/// Balancing would hide real capacity differences under heavy discharge.
pub fn should_balance(pack_current: Option<i32>) -> bool {
    pack_current.map_or(true, |current| current >= DISCHARGE_LIMIT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSettings {
    pub soc_relevant_voltage: u16,
    pub deadband: u16,
    pub min_shunt_current: u16,
}

impl From<&Config> for BalanceSettings {
    fn from(config: &Config) -> Self {
        Self {
            soc_relevant_voltage: config.soc_relevant_voltage,
            deadband: config.balance_deadband,
            min_shunt_current: config.min_shunt_current,
        }
    }
}

impl BalanceSettings {
    /// Target for one cell given the battery's lowest voltage and ceiling.
    pub fn cell_target(&self, v_cell: u16, min_voltage: u16, ceiling: u16) -> u16 {
        if v_cell < self.soc_relevant_voltage
            || v_cell <= min_voltage.saturating_add(self.deadband)
        {
            return 0;
        }
        ceiling.max(self.min_shunt_current)
    }

    /// Targets for every cell of `battery`, in cell order. Cells not read
    /// this cycle, or never read with a trusted voltage, get 0.
    pub fn targets(&self, battery: &Battery) -> Vec<u16> {
        let ceiling = temperature_ceiling(battery.max_temperature());
        let Some(min_voltage) = battery.min_voltage() else {
            return vec![0; battery.cell_count()];
        };
        log::debug!(
            "Battery '{}': min={min_voltage} mV max={:?} mV ceiling={ceiling} mA",
            battery.name,
            battery.max_voltage()
        );
        battery
            .cells
            .iter()
            .map(|cell| {
                if cell.has_usable_voltage() {
                    self.cell_target(cell.v_cell, min_voltage, ceiling)
                } else {
                    0
                }
            })
            .collect()
    }
}
