//! The pack as wired: batteries in order, each with its cells in order.
//!
//! Built once from configuration and never reshaped. Cells refer back to
//! their battery by index only.

use crate::config::Config;
use crate::protocol::{Hardware, Identity, ProtocolVersion, Summary};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub battery_index: usize,
    pub cell_index: usize,
    /// Bus address.
    pub cell_id: u16,

    /// `None` until discovered, and again after a failed discovery.
    pub version: Option<ProtocolVersion>,
    pub hardware: Hardware,
    pub revision: u16,
    pub when_programmed: Option<DateTime<Utc>>,

    /// Last trusted cell voltage in mV.
    pub v_cell: u16,
    pub v_shunt: u16,
    /// Measured shunt current in mA, when the slave reports it.
    pub i_shunt: Option<u16>,
    /// Hundredths of a degree Celsius.
    pub temperature: i16,
    /// Last shunt current the slave confirmed, in mA.
    pub min_current: u16,
    /// Round trip of the last successful read, in µs.
    pub latency: u32,
    pub error_count: u16,
    pub is_data_current: bool,
    pub is_voltage_valid: bool,
    /// Set once `v_cell` holds a trusted reading.
    pub has_trusted_voltage: bool,

    pub target_shunt_current: u16,
    pub is_shunt_forced_on: bool,
}

impl Cell {
    pub fn new(battery_index: usize, cell_index: usize, cell_id: u16) -> Self {
        Self {
            battery_index,
            cell_index,
            cell_id,
            version: None,
            hardware: Hardware::default(),
            revision: 0,
            when_programmed: None,
            v_cell: 0,
            v_shunt: 0,
            i_shunt: None,
            temperature: 0,
            min_current: 0,
            latency: 0,
            error_count: 0,
            is_data_current: false,
            is_voltage_valid: false,
            has_trusted_voltage: false,
            target_shunt_current: 0,
            is_shunt_forced_on: false,
        }
    }

    pub fn apply_identity(&mut self, identity: &Identity) {
        self.hardware = identity.hardware;
        self.revision = identity.revision;
        self.when_programmed = identity.when_programmed;
    }

    /// Stores everything from a summary except the voltage.
    pub fn apply_summary(&mut self, summary: &Summary) {
        self.i_shunt = summary.i_shunt;
        self.min_current = summary.min_current;
        self.temperature = summary.temperature;
    }

    /// Read this cycle and `v_cell` was trusted at least once.
    pub fn has_usable_voltage(&self) -> bool {
        self.is_data_current && self.has_trusted_voltage
    }

    /// Shunt current on non-Kelvin boards distorts this board's voltage reading.
    pub fn is_non_kelvin_resistor_shunt(&self) -> bool {
        !self.hardware.has_kelvin_connection && self.hardware.is_resistor_shunt
    }

    pub fn is_non_kelvin_transistor_shunt(&self) -> bool {
        !self.hardware.has_kelvin_connection && !self.hardware.is_resistor_shunt
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "battery {} cell {} ({:#06X})",
            self.battery_index, self.cell_index, self.cell_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct Battery {
    pub index: usize,
    pub name: String,
    pub cells: Vec<Cell>,
}

impl Battery {
    pub fn new(index: usize, name: impl Into<String>, cell_ids: &[u16]) -> Self {
        Self {
            index,
            name: name.into(),
            cells: cell_ids
                .iter()
                .enumerate()
                .map(|(cell_index, &cell_id)| Cell::new(index, cell_index, cell_id))
                .collect(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// True if this cell or either physical neighbour has a shunt target.
    /// Neighbours share sense wiring on non-Kelvin boards.
    pub fn is_cell_shunting(&self, cell_index: usize) -> bool {
        let first = cell_index.saturating_sub(1);
        let last = (cell_index + 1).min(self.cells.len().saturating_sub(1));
        self.cells
            .get(first..=last)
            .is_some_and(|cells| cells.iter().any(|cell| cell.target_shunt_current != 0))
    }

    /// Lowest voltage among cells with a usable voltage.
    pub fn min_voltage(&self) -> Option<u16> {
        self.cells
            .iter()
            .filter(|cell| cell.has_usable_voltage())
            .map(|cell| cell.v_cell)
            .min()
    }

    pub fn max_voltage(&self) -> Option<u16> {
        self.cells
            .iter()
            .filter(|cell| cell.has_usable_voltage())
            .map(|cell| cell.v_cell)
            .max()
    }

    /// Highest temperature among cells that have a sensor and were read this cycle.
    pub fn max_temperature(&self) -> Option<i16> {
        self.cells
            .iter()
            .filter(|cell| cell.is_data_current && cell.hardware.has_temperature_sensor)
            .map(|cell| cell.temperature)
            .max()
    }
}

#[derive(Debug, Clone)]
pub struct Pack {
    pub batteries: Vec<Battery>,
}

impl Pack {
    pub fn new(batteries: Vec<Battery>) -> Self {
        Self { batteries }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .batteries
                .iter()
                .enumerate()
                .map(|(index, battery)| Battery::new(index, &battery.name, &battery.cell_ids))
                .collect(),
        )
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.batteries.iter().flat_map(|battery| battery.cells.iter())
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.batteries
            .iter_mut()
            .flat_map(|battery| battery.cells.iter_mut())
    }

    pub fn cell(&self, battery_index: usize, cell_index: usize) -> Option<&Cell> {
        self.batteries.get(battery_index)?.cells.get(cell_index)
    }

    pub fn cell_mut(&mut self, battery_index: usize, cell_index: usize) -> Option<&mut Cell> {
        self.batteries.get_mut(battery_index)?.cells.get_mut(cell_index)
    }

    pub fn cell_count(&self) -> usize {
        self.batteries.iter().map(Battery::cell_count).sum()
    }

    /// `(battery_index, cell_index)` of every cell in bus polling order.
    pub fn positions(&self) -> Vec<(usize, usize)> {
        self.cells()
            .map(|cell| (cell.battery_index, cell.cell_index))
            .collect()
    }
}
