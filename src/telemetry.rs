//! One-way publication of controller state.
//!
//! Sinks must never block or fail the control loop: a sink that cannot
//! deliver an event logs the problem and drops the event.

use crate::protocol::Hardware;
use crate::topology::Cell;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Control loop phase, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum MonitorState {
    Start = 0,
    Sleeping = 1,
    WakeSlaves = 2,
    TurnOffNonKelvinResistorShunts = 3,
    TurnOffNonKelvinTransistorShunts = 4,
    WaitForVoltageSettle = 5,
    ReadVoltage = 6,
    TurnOnShunts = 7,
    WaitForShuntSettle = 8,
    ReadCurrent = 9,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    CellVoltage {
        battery: usize,
        cell: usize,
        is_valid: bool,
        v_cell: u16,
    },
    ShuntCurrent {
        battery: usize,
        cell: usize,
        i_shunt: u16,
    },
    MinCurrent {
        battery: usize,
        cell: usize,
        min_current: u16,
        target: u16,
    },
    Temperature {
        battery: usize,
        cell: usize,
        temperature: i16,
    },
    Hardware {
        battery: usize,
        cell: usize,
        hardware: Hardware,
        revision: u16,
        when_programmed: Option<DateTime<Utc>>,
    },
    ErrorCount {
        battery: usize,
        cell: usize,
        error_count: u16,
    },
    Latency {
        battery: usize,
        cell: usize,
        latency: u32,
    },
    MonitorState {
        state: MonitorState,
        delay: u16,
        counter: u8,
    },
    ChargerShutdown {
        reason: String,
    },
}

impl TelemetryEvent {
    pub fn hardware(cell: &Cell) -> Self {
        TelemetryEvent::Hardware {
            battery: cell.battery_index,
            cell: cell.cell_index,
            hardware: cell.hardware,
            revision: cell.revision,
            when_programmed: cell.when_programmed,
        }
    }

    pub fn error_count(cell: &Cell) -> Self {
        TelemetryEvent::ErrorCount {
            battery: cell.battery_index,
            cell: cell.cell_index,
            error_count: cell.error_count,
        }
    }

    pub fn min_current(cell: &Cell) -> Self {
        TelemetryEvent::MinCurrent {
            battery: cell.battery_index,
            cell: cell.cell_index,
            min_current: cell.min_current,
            target: cell.target_shunt_current,
        }
    }

    /// `(battery, cell)` for per-cell events.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            TelemetryEvent::CellVoltage { battery, cell, .. }
            | TelemetryEvent::ShuntCurrent { battery, cell, .. }
            | TelemetryEvent::MinCurrent { battery, cell, .. }
            | TelemetryEvent::Temperature { battery, cell, .. }
            | TelemetryEvent::Hardware { battery, cell, .. }
            | TelemetryEvent::ErrorCount { battery, cell, .. }
            | TelemetryEvent::Latency { battery, cell, .. } => Some((*battery, *cell)),
            TelemetryEvent::MonitorState { .. } | TelemetryEvent::ChargerShutdown { .. } => None,
        }
    }
}

pub trait TelemetrySink {
    fn publish(&mut self, event: &TelemetryEvent);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    fn publish(&mut self, event: &TelemetryEvent) {
        (**self).publish(event)
    }
}

/// Writes every event to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::MonitorState { .. } | TelemetryEvent::Latency { .. } => {
                log::debug!("{event:?}")
            }
            TelemetryEvent::ChargerShutdown { reason } => {
                log::error!("Charger shut down: {reason}")
            }
            _ => log::info!("{event:?}"),
        }
    }
}
