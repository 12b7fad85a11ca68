//! Request/response exchanges with individual cells.
//!
//! One request is outstanding at a time. Failed exchanges are retried a
//! fixed number of times with a bus power cycle in between; what to do once
//! the attempts are used up is left to the caller.

use crate::balance::validate_shunt_current;
use crate::error::DecodeError;
use crate::frame;
use crate::protocol::{
    Command, Identity, ProtocolVersion, Reply, ReplyKind, Status, Summary, WAKE_BYTE,
};
use crate::topology::Cell;
use crate::transport::Transport;
use crate::Error;
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, Error>;

/// Attempts for a telemetry read or a shunt command exchange.
pub const READ_ATTEMPTS: usize = 2;
/// Attempts for version discovery.
pub const DISCOVERY_ATTEMPTS: usize = 3;
/// Step commands allowed before a shunt setpoint counts as unreachable.
pub const MAX_SHUNT_COMMANDS: usize = 10;

pub const DEFAULT_BUS_RESET_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct CellSession<T: Transport> {
    transport: T,
    bus_reset_delay: Duration,
}

impl<T: Transport> CellSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            bus_reset_delay: DEFAULT_BUS_RESET_DELAY,
        }
    }

    /// How long bus power stays off during a reset.
    pub fn set_bus_reset_delay(&mut self, delay: Duration) {
        self.bus_reset_delay = delay;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Writes a command packet addressed to `cell`.
    pub fn send(&mut self, cell: &Cell, command: Command) -> Result<()> {
        let request = command.request(cell.cell_id);
        log::trace!("{cell}: sending {command:?} {:02X?}", request);
        self.transport.write_all(&request)?;
        Ok(())
    }

    /// Nudges sleeping slaves awake.
    pub fn wake(&mut self) -> Result<()> {
        log::debug!("Waking slaves");
        self.transport.write_all(&[WAKE_BYTE])?;
        Ok(())
    }

    /// Power cycles the slave bus. Failures are logged, the next attempt
    /// will show whether the bus recovered.
    pub fn reset_bus(&mut self) {
        log::debug!("Resetting bus");
        if let Err(err) = self.transport.set_bus(false) {
            log::warn!("Cannot switch bus off: {err}");
        }
        if !self.bus_reset_delay.is_zero() {
            std::thread::sleep(self.bus_reset_delay);
        }
        if let Err(err) = self.transport.set_bus(true) {
            log::warn!("Cannot switch bus on: {err}");
        }
    }

    fn flush(&mut self) {
        match self.transport.discard_input() {
            Ok(0) => {}
            Ok(discarded) => log::debug!("Flushed {discarded} stale bytes"),
            Err(err) => log::warn!("Cannot flush receive buffer: {err}"),
        }
    }

    /// One exchange: send `command`, read and decode a `kind` reply, and
    /// check it came from the addressed cell. No retries.
    pub fn query(&mut self, cell: &mut Cell, command: Command, kind: ReplyKind) -> Result<Reply> {
        let started = Instant::now();
        self.send(cell, command)?;
        let result = frame::read_packet(&mut self.transport, kind.len())
            .and_then(|payload| Ok(Reply::decode(kind, &payload)?))
            .and_then(|reply| {
                if reply.cell_id() == cell.cell_id {
                    Ok(reply)
                } else {
                    Err(Error::AddressMismatch {
                        expected: cell.cell_id,
                        received: reply.cell_id(),
                    })
                }
            });
        match &result {
            Ok(_) => {
                cell.latency = u32::try_from(started.elapsed().as_micros()).unwrap_or(u32::MAX);
            }
            // out of step with the byte stream, drop the rest before the next request
            Err(Error::Decode(DecodeError::CrcMismatch { .. }))
            | Err(Error::AddressMismatch { .. }) => self.flush(),
            Err(_) => {}
        }
        result
    }

    /// Runs `op` up to `attempts` times, power cycling the bus after each
    /// transient failure but the last. Exhaustion counts one error on the cell.
    pub fn retry<R>(
        &mut self,
        cell: &mut Cell,
        command: Command,
        attempts: usize,
        mut op: impl FnMut(&mut Self, &mut Cell) -> Result<R>,
    ) -> Result<R> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(self, cell) {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() && attempt < attempts => {
                    log::warn!(
                        "{cell}: {command:?} failed try {attempt} of {attempts}, repeating ({err})"
                    );
                    self.reset_bus();
                }
                Err(err) => {
                    cell.error_count = cell.error_count.saturating_add(1);
                    log::warn!("{cell}: {command:?} failed after {attempt} tries ({err})");
                    return Err(Error::Exhausted {
                        cell_id: cell.cell_id,
                        command,
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    fn query_summary(
        &mut self,
        cell: &mut Cell,
        command: Command,
        version: ProtocolVersion,
    ) -> Result<Summary> {
        self.query(cell, command, version.summary_kind())?
            .into_summary()
    }

    /// Identifies the cell and caches version and hardware on it.
    pub fn get_cell_version(&mut self, cell: &mut Cell) -> Result<ProtocolVersion> {
        let result = self.retry(cell, Command::Identify, DISCOVERY_ATTEMPTS, |session, cell| {
            let identity: Identity = session
                .query(cell, Command::Identify, ReplyKind::Identify)?
                .into_identity()?;
            let version =
                ProtocolVersion::try_from(identity.version).map_err(Error::UnsupportedVersion)?;
            Ok((version, identity))
        });
        match result {
            Ok((version, identity)) => {
                log::info!(
                    "{cell}: protocol {version:?}, revision {}, {:?}",
                    identity.revision,
                    identity.hardware
                );
                cell.version = Some(version);
                cell.apply_identity(&identity);
                Ok(version)
            }
            Err(err) => {
                cell.version = None;
                Err(err)
            }
        }
    }

    /// Reads compact telemetry. Everything but the cell voltage is stored on
    /// the cell; whether that voltage can be trusted is the caller's call.
    pub fn read_cell(&mut self, cell: &mut Cell) -> Result<Summary> {
        let Some(version) = cell.version else {
            cell.is_data_current = false;
            return Err(Error::UnknownVersion(cell.cell_id));
        };
        let result = self.retry(cell, Command::Summary, READ_ATTEMPTS, |session, cell| {
            session.query_summary(cell, Command::Summary, version)
        });
        match result {
            Ok(summary) => {
                cell.apply_summary(&summary);
                cell.is_data_current = true;
                Ok(summary)
            }
            Err(err) => {
                cell.is_data_current = false;
                Err(err)
            }
        }
    }

    /// Reads the full binary status and stores all of it on the cell.
    pub fn read_status(&mut self, cell: &mut Cell) -> Result<Status> {
        let status = self.retry(cell, Command::Status, READ_ATTEMPTS, |session, cell| {
            session
                .query(cell, Command::Status, ReplyKind::Status)?
                .into_status()
        })?;
        cell.v_cell = status.v_cell;
        cell.v_shunt = status.v_shunt;
        cell.i_shunt = Some(status.i_shunt);
        cell.temperature = status.temperature;
        cell.min_current = status.min_current;
        cell.is_shunt_forced_on = status.is_shunt_forced_on;
        cell.is_data_current = true;
        Ok(status)
    }

    /// Sets a shunt on a cell with no cached reading: identifies it if
    /// needed and reads the setpoint the slave holds before stepping it.
    pub fn set_shunt_current(&mut self, cell: &mut Cell, target: u16) -> Result<()> {
        validate_shunt_current(target)?;
        if cell.version.is_none() {
            self.get_cell_version(cell)?;
        }
        self.read_cell(cell)?;
        self.set_min_current(cell, target)
    }

    /// Steps the cell's shunt until it confirms `target` mA. Starts from the
    /// setpoint cached by the last read.
    pub fn set_min_current(&mut self, cell: &mut Cell, target: u16) -> Result<()> {
        validate_shunt_current(target)?;
        let mut commands = 0;
        while cell.min_current != target {
            let version = cell.version.ok_or(Error::UnknownVersion(cell.cell_id))?;
            if commands == MAX_SHUNT_COMMANDS {
                return Err(Error::ShuntNotConfirmed {
                    cell_id: cell.cell_id,
                    target,
                    actual: cell.min_current,
                    commands,
                });
            }
            let command = if target == 0 {
                Command::ShuntOff
            } else if cell.min_current < target {
                Command::ShuntUp
            } else {
                Command::ShuntDown
            };
            let summary = self.retry(cell, command, READ_ATTEMPTS, |session, cell| {
                session.query_summary(cell, command, version)
            })?;
            cell.apply_summary(&summary);
            commands += 1;
            log::debug!("{cell}: {command:?} -> actual={} mA", summary.min_current);
        }
        Ok(())
    }
}
