//! The periodic measure-and-balance loop.
//!
//! Each cycle reads every cell, derives per cell shunt targets from the
//! battery statistics and commands them. Read failures only make a cell
//! stale; a shunt that cannot be commanded is fatal. `run` opens the
//! charger relay before returning such an error.

use crate::balance::{should_balance, validate_shunt_current, BalanceSettings};
use crate::charger::{ChargerRelay, NoPackCurrent, NoRelay, PackCurrent};
use crate::session::CellSession;
use crate::telemetry::{LogSink, MonitorState, TelemetryEvent, TelemetrySink};
use crate::topology::{Cell, Pack};
use crate::transport::Transport;
use crate::Error;
use std::convert::Infallible;
use std::time::{Duration, Instant};

/// Periods above this let the slaves fall asleep between cycles.
pub const WAKE_THRESHOLD: Duration = Duration::from_secs(30);
pub const WAKE_PAUSE: Duration = Duration::from_secs(1);
/// Settling time after shunts were switched off, before voltages are read.
pub const VOLTAGE_SETTLE: Duration = Duration::from_secs(2);
/// Settling time after new setpoints, before shunt currents are read back.
pub const SHUNT_SETTLE: Duration = Duration::from_secs(2);
/// Non-Kelvin transistor shunts are switched off every this many cycles.
pub const TRANSISTOR_SHUNT_INTERVAL: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("battery {battery} cell {cell}: shunt target {target} mA is outside the permitted range")]
    ShuntRange {
        battery: usize,
        cell: usize,
        target: u16,
    },
    #[error("battery {battery} cell {cell}: cannot set shunt current to {target} mA")]
    ShuntCommand {
        battery: usize,
        cell: usize,
        target: u16,
        #[source]
        source: Error,
    },
}

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct Controller<T: Transport, C: Clock = SystemClock> {
    session: CellSession<T>,
    sink: Box<dyn TelemetrySink>,
    charger: Box<dyn ChargerRelay>,
    pack_current: Box<dyn PackCurrent>,
    clock: C,
    settings: BalanceSettings,
    period: Duration,
    cycle: u32,
    last_start: Option<Instant>,
}

impl<T: Transport> Controller<T> {
    pub fn new(session: CellSession<T>, settings: BalanceSettings, period: Duration) -> Self {
        Self::with_clock(session, settings, period, SystemClock)
    }
}

impl<T: Transport, C: Clock> Controller<T, C> {
    pub fn with_clock(
        session: CellSession<T>,
        settings: BalanceSettings,
        period: Duration,
        clock: C,
    ) -> Self {
        Self {
            session,
            sink: Box::new(LogSink),
            charger: Box::new(NoRelay),
            pack_current: Box::new(NoPackCurrent),
            clock,
            settings,
            period,
            cycle: 0,
            last_start: None,
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.sink = sink;
    }

    pub fn set_charger(&mut self, charger: Box<dyn ChargerRelay>) {
        self.charger = charger;
    }

    pub fn set_pack_current(&mut self, pack_current: Box<dyn PackCurrent>) {
        self.pack_current = pack_current;
    }

    pub fn session(&self) -> &CellSession<T> {
        &self.session
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Cycles until a fatal error. The charger relay is open by the time
    /// the error is returned.
    pub fn run(&mut self, pack: &mut Pack) -> Result<Infallible, ControlError> {
        log::info!(
            "Monitoring {} cells in {} batteries every {:?}",
            pack.cell_count(),
            pack.batteries.len(),
            self.period
        );
        loop {
            if let Err(err) = self.run_cycle(pack) {
                self.shutdown_charger(&err);
                return Err(err);
            }
        }
    }

    fn shutdown_charger(&mut self, err: &ControlError) {
        log::error!("{err}, shutting down the charger");
        if let Err(io_err) = self.charger.shutdown() {
            log::error!("Cannot open the charger relay: {io_err}");
        }
        self.sink.publish(&TelemetryEvent::ChargerShutdown {
            reason: err.to_string(),
        });
    }

    pub fn run_cycle(&mut self, pack: &mut Pack) -> Result<(), ControlError> {
        self.report(MonitorState::Start, 0);
        self.sleep_until_next_period();

        if self.period > WAKE_THRESHOLD {
            self.report(MonitorState::WakeSlaves, seconds(WAKE_PAUSE));
            if let Err(err) = self.session.wake() {
                log::warn!("Cannot wake slaves: {err}");
            }
            self.clock.sleep(WAKE_PAUSE);
        }

        self.report(MonitorState::TurnOffNonKelvinResistorShunts, 0);
        let mut shunt_pause = self.turn_off_shunts(pack, Cell::is_non_kelvin_resistor_shunt)?;
        if self.cycle % TRANSISTOR_SHUNT_INTERVAL == 0 {
            self.report(MonitorState::TurnOffNonKelvinTransistorShunts, 0);
            shunt_pause |= self.turn_off_shunts(pack, Cell::is_non_kelvin_transistor_shunt)?;
        }
        if shunt_pause {
            self.report(MonitorState::WaitForVoltageSettle, seconds(VOLTAGE_SETTLE));
            self.clock.sleep(VOLTAGE_SETTLE);
        }

        self.report(MonitorState::ReadVoltage, 0);
        self.read_all(pack, !shunt_pause);

        self.report(MonitorState::TurnOnShunts, 0);
        if self.turn_on_shunts(pack)? {
            self.report(MonitorState::WaitForShuntSettle, seconds(SHUNT_SETTLE));
            self.clock.sleep(SHUNT_SETTLE);
            self.report(MonitorState::ReadCurrent, 0);
            self.read_all(pack, true);
        }

        self.cycle = self.cycle.wrapping_add(1);
        Ok(())
    }

    fn sleep_until_next_period(&mut self) {
        if let Some(last_start) = self.last_start {
            loop {
                let elapsed = self.clock.now().saturating_duration_since(last_start);
                let remaining = self.period.saturating_sub(elapsed);
                if remaining.is_zero() {
                    break;
                }
                self.report(MonitorState::Sleeping, seconds(remaining));
                self.clock.sleep(remaining.min(Duration::from_secs(1)));
            }
        }
        self.last_start = Some(self.clock.now());
    }

    fn report(&mut self, state: MonitorState, delay: u16) {
        let counter = (TRANSISTOR_SHUNT_INTERVAL - self.cycle % TRANSISTOR_SHUNT_INTERVAL)
            % TRANSISTOR_SHUNT_INTERVAL;
        self.sink.publish(&TelemetryEvent::MonitorState {
            state,
            delay,
            counter: counter as u8,
        });
    }

    /// Forces the shunts of matching cells off. True if any was on.
    fn turn_off_shunts(
        &mut self,
        pack: &mut Pack,
        selected: fn(&Cell) -> bool,
    ) -> Result<bool, ControlError> {
        let mut changed = false;
        for cell in pack.cells_mut() {
            if cell.version.is_none() || !selected(cell) {
                continue;
            }
            let was_on = cell.min_current != 0;
            cell.target_shunt_current = 0;
            self.command_shunt(cell, 0)?;
            if was_on {
                log::debug!("{cell}: shunt forced off");
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Recomputes and commands every setpoint. True if any shunt moved.
    fn turn_on_shunts(&mut self, pack: &mut Pack) -> Result<bool, ControlError> {
        let pack_current = self.pack_current.pack_current_ma();
        if !should_balance(pack_current) {
            log::info!("Pack discharging at {pack_current:?} mA, leaving shunts as they are");
            return Ok(false);
        }
        let mut changed = false;
        for battery in &mut pack.batteries {
            let targets = self.settings.targets(battery);
            for (cell, target) in battery.cells.iter_mut().zip(targets) {
                let before = cell.min_current;
                cell.target_shunt_current = target;
                self.command_shunt(cell, target)?;
                changed |= cell.min_current != before;
            }
        }
        Ok(changed)
    }

    fn command_shunt(&mut self, cell: &mut Cell, target: u16) -> Result<(), ControlError> {
        if validate_shunt_current(target).is_err() {
            return Err(ControlError::ShuntRange {
                battery: cell.battery_index,
                cell: cell.cell_index,
                target,
            });
        }
        let result = self.session.set_min_current(cell, target);
        self.sink.publish(&TelemetryEvent::min_current(cell));
        result.map_err(|source| {
            self.sink.publish(&TelemetryEvent::error_count(cell));
            ControlError::ShuntCommand {
                battery: cell.battery_index,
                cell: cell.cell_index,
                target,
                source,
            }
        })
    }

    fn read_all(&mut self, pack: &mut Pack, trust_shunt_current: bool) {
        for battery in &mut pack.batteries {
            for cell_index in 0..battery.cells.len() {
                let shunting = battery.is_cell_shunting(cell_index);
                self.read_one(&mut battery.cells[cell_index], shunting, trust_shunt_current);
            }
        }
    }

    fn read_one(&mut self, cell: &mut Cell, shunting: bool, trust_shunt_current: bool) {
        if cell.version.is_none() {
            match self.session.get_cell_version(cell) {
                Ok(_) => self.sink.publish(&TelemetryEvent::hardware(cell)),
                Err(err) => {
                    log::warn!("{cell}: not identified, skipped this cycle ({err})");
                    cell.is_data_current = false;
                    self.sink.publish(&TelemetryEvent::error_count(cell));
                    return;
                }
            }
        }

        let summary = match self.session.read_cell(cell) {
            Ok(summary) => summary,
            Err(err) => {
                log::warn!("{cell}: no reading this cycle ({err})");
                self.sink.publish(&TelemetryEvent::error_count(cell));
                return;
            }
        };

        let trusted = cell.hardware.has_kelvin_connection || !shunting;
        if trusted {
            cell.v_cell = summary.v_cell;
            cell.has_trusted_voltage = true;
        }
        cell.is_voltage_valid = trusted;

        let (battery, index) = (cell.battery_index, cell.cell_index);
        self.sink.publish(&TelemetryEvent::CellVoltage {
            battery,
            cell: index,
            is_valid: trusted,
            v_cell: summary.v_cell,
        });
        if let (true, Some(i_shunt)) = (trust_shunt_current, cell.i_shunt) {
            self.sink.publish(&TelemetryEvent::ShuntCurrent {
                battery,
                cell: index,
                i_shunt,
            });
        }
        self.sink.publish(&TelemetryEvent::min_current(cell));
        if cell.hardware.has_temperature_sensor {
            self.sink.publish(&TelemetryEvent::Temperature {
                battery,
                cell: index,
                temperature: cell.temperature,
            });
        }
        self.sink.publish(&TelemetryEvent::Latency {
            battery,
            cell: index,
            latency: cell.latency,
        });
    }
}

/// Whole seconds, rounded up.
fn seconds(duration: Duration) -> u16 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    u16::try_from(secs).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, ProtocolVersion};
    use crate::telemetry::recording::RecordingSink;
    use crate::topology::Battery;
    use crate::transport::mock::{SimBus, SimCell};
    use std::cell::RefCell;
    use std::rc::Rc;

    const SETTINGS: BalanceSettings = BalanceSettings {
        soc_relevant_voltage: 3000,
        deadband: 20,
        min_shunt_current: 150,
    };
    const PERIOD: Duration = Duration::from_secs(10);

    #[derive(Debug)]
    struct FakeClock {
        now: Instant,
        slept: Vec<Duration>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                now: Instant::now(),
                slept: Vec::new(),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.now
        }

        fn sleep(&mut self, duration: Duration) {
            self.now += duration;
            self.slept.push(duration);
        }
    }

    #[derive(Debug, Default, Clone)]
    struct CountingRelay {
        shutdowns: Rc<RefCell<usize>>,
    }

    impl ChargerRelay for CountingRelay {
        fn shutdown(&mut self) -> std::io::Result<()> {
            *self.shutdowns.borrow_mut() += 1;
            Ok(())
        }
    }

    struct FixedPackCurrent(Option<i32>);

    impl PackCurrent for FixedPackCurrent {
        fn pack_current_ma(&mut self) -> Option<i32> {
            self.0
        }
    }

    fn three_cell_bus(voltages: [u16; 3]) -> SimBus {
        voltages
            .iter()
            .enumerate()
            .fold(SimBus::new(), |bus, (id, &v)| {
                bus.with_cell(id as u16, SimCell::new(ProtocolVersion::V4, v))
            })
    }

    fn controller(
        bus: SimBus,
        settings: BalanceSettings,
        period: Duration,
    ) -> (Controller<SimBus, FakeClock>, RecordingSink) {
        let mut session = CellSession::new(bus);
        session.set_bus_reset_delay(Duration::ZERO);
        let mut controller = Controller::with_clock(session, settings, period, FakeClock::new());
        let sink = RecordingSink::default();
        controller.set_sink(Box::new(sink.clone()));
        (controller, sink)
    }

    fn pack(ids: &[u16]) -> Pack {
        Pack::new(vec![Battery::new(0, "test", ids)])
    }

    fn states(events: &[TelemetryEvent]) -> Vec<MonitorState> {
        events
            .iter()
            .filter_map(|event| match event {
                TelemetryEvent::MonitorState { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_cycle_balances_the_high_cell() {
        let (mut controller, sink) =
            controller(three_cell_bus([3600, 3620, 3700]), SETTINGS, PERIOD);
        let mut pack = pack(&[0, 1, 2]);

        controller.run_cycle(&mut pack).unwrap();

        let targets: Vec<u16> = pack.cells().map(|c| c.target_shunt_current).collect();
        assert_eq!(targets, vec![0, 0, 450]);
        assert_eq!(pack.batteries[0].cells[2].min_current, 450);
        assert!(pack.cells().all(|c| c.version == Some(ProtocolVersion::V4)));
        let bus = controller.session().transport();
        assert_eq!(
            bus.commands_to(2)
                .iter()
                .filter(|c| **c == Command::ShuntUp)
                .count(),
            7
        );
        assert!(bus.commands_to(0).iter().all(|c| *c != Command::ShuntUp));
        assert_eq!(controller.clock().slept, vec![SHUNT_SETTLE]);

        let events = sink.take();
        assert_eq!(
            states(&events),
            vec![
                MonitorState::Start,
                MonitorState::TurnOffNonKelvinResistorShunts,
                MonitorState::TurnOffNonKelvinTransistorShunts,
                MonitorState::ReadVoltage,
                MonitorState::TurnOnShunts,
                MonitorState::WaitForShuntSettle,
                MonitorState::ReadCurrent,
            ]
        );
        assert!(events.contains(&TelemetryEvent::CellVoltage {
            battery: 0,
            cell: 1,
            is_valid: true,
            v_cell: 3620
        }));
        assert!(events.contains(&TelemetryEvent::MinCurrent {
            battery: 0,
            cell: 2,
            min_current: 450,
            target: 450
        }));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TelemetryEvent::Hardware { .. }))
                .count(),
            3
        );
    }

    #[test]
    fn voltages_next_to_a_shunt_are_not_trusted() {
        let (mut controller, sink) =
            controller(three_cell_bus([3600, 3620, 3700]), SETTINGS, PERIOD);
        let mut pack = pack(&[0, 1, 2]);
        controller.run_cycle(&mut pack).unwrap();
        sink.take();

        controller
            .session
            .transport_mut()
            .cells
            .values_mut()
            .for_each(|sim| sim.v_cell -= 100);
        // keep the setpoints so the readings below are the ones that count
        controller.set_pack_current(Box::new(FixedPackCurrent(Some(-5000))));
        controller.run_cycle(&mut pack).unwrap();

        let cells = &pack.batteries[0].cells;
        assert_eq!(cells[0].v_cell, 3500);
        assert!(cells[0].is_voltage_valid);
        // cell 1 sits next to the shunting cell 2
        assert_eq!(cells[1].v_cell, 3620);
        assert!(!cells[1].is_voltage_valid);
        assert_eq!(cells[2].v_cell, 3700);
        assert!(!cells[2].is_voltage_valid);

        let events = sink.take();
        assert!(events.contains(&TelemetryEvent::CellVoltage {
            battery: 0,
            cell: 1,
            is_valid: false,
            v_cell: 3520
        }));
    }

    #[test]
    fn sleeps_out_the_period_in_whole_seconds() {
        let (mut controller, sink) =
            controller(three_cell_bus([3600, 3600, 3600]), SETTINGS, PERIOD);
        let mut pack = pack(&[0, 1, 2]);
        controller.run_cycle(&mut pack).unwrap();
        assert!(controller.clock().slept.is_empty());
        sink.take();

        controller.clock.now += Duration::from_millis(2500);
        controller.run_cycle(&mut pack).unwrap();

        let delays: Vec<u16> = sink
            .take()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::MonitorState {
                    state: MonitorState::Sleeping,
                    delay,
                    ..
                } => Some(delay),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![8, 7, 6, 5, 4, 3, 2, 1]);
        let slept: Duration = controller.clock().slept.iter().sum();
        assert_eq!(slept, Duration::from_millis(7500));
    }

    #[test]
    fn long_periods_wake_the_slaves() {
        let (mut controller, sink) = controller(
            three_cell_bus([3600, 3600, 3600]),
            SETTINGS,
            Duration::from_secs(60),
        );
        let mut pack = pack(&[0, 1, 2]);
        controller.run_cycle(&mut pack).unwrap();

        assert_eq!(controller.session().transport().wakes, 1);
        assert_eq!(controller.clock().slept, vec![WAKE_PAUSE]);
        assert!(states(&sink.take()).contains(&MonitorState::WakeSlaves));
    }

    #[test]
    fn resistor_shunts_are_forced_off_before_reading() {
        let mut bus = three_cell_bus([3600, 3620, 3700]);
        for sim in bus.cells.values_mut() {
            sim.version = 3;
            sim.hardware.is_resistor_shunt = true;
        }
        let (mut controller, sink) = controller(bus, SETTINGS, PERIOD);
        let mut pack = pack(&[0, 1, 2]);
        controller.run_cycle(&mut pack).unwrap();
        assert_eq!(pack.batteries[0].cells[2].min_current, 450);
        sink.take();

        controller.clock.now += PERIOD;
        controller.run_cycle(&mut pack).unwrap();

        let events = sink.take();
        let states = states(&events);
        assert!(states.contains(&MonitorState::WaitForVoltageSettle));
        // cycle 1 leaves transistor shunts alone
        assert!(!states.contains(&MonitorState::TurnOffNonKelvinTransistorShunts));
        let first_read = events
            .iter()
            .position(|e| matches!(e, TelemetryEvent::MonitorState { state: MonitorState::ReadVoltage, .. }))
            .unwrap();
        let turn_on = events
            .iter()
            .position(|e| matches!(e, TelemetryEvent::MonitorState { state: MonitorState::TurnOnShunts, .. }))
            .unwrap();
        let voltage_read = &events[first_read..turn_on];
        // every voltage trusted again after the forced off
        assert!(voltage_read.iter().all(|e| match e {
            TelemetryEvent::CellVoltage { is_valid, .. } => *is_valid,
            _ => true,
        }));
        // shunt current is not published from the paused voltage read
        assert!(!voltage_read
            .iter()
            .any(|e| matches!(e, TelemetryEvent::ShuntCurrent { .. })));
        assert!(events[turn_on..]
            .iter()
            .any(|e| matches!(e, TelemetryEvent::ShuntCurrent { cell: 2, i_shunt: 450, .. })));
        // and back on for the high cell
        assert_eq!(pack.batteries[0].cells[2].min_current, 450);
    }

    #[test]
    fn heavy_discharge_skips_setpoints() {
        let (mut controller, _sink) =
            controller(three_cell_bus([3600, 3620, 3700]), SETTINGS, PERIOD);
        controller.set_pack_current(Box::new(FixedPackCurrent(Some(-5000))));
        let mut pack = pack(&[0, 1, 2]);
        controller.run_cycle(&mut pack).unwrap();

        assert!(pack.cells().all(|c| c.target_shunt_current == 0));
        let bus = controller.session().transport();
        assert!(bus
            .requests
            .iter()
            .all(|(_, c)| matches!(c, Command::Identify | Command::Summary)));
    }

    #[test]
    fn missing_cell_goes_stale_and_the_loop_continues() {
        let bus = SimBus::new()
            .with_cell(0, SimCell::new(ProtocolVersion::V4, 3600))
            .with_cell(2, SimCell::new(ProtocolVersion::V4, 3700));
        let (mut controller, sink) = controller(bus, SETTINGS, PERIOD);
        let mut pack = pack(&[0, 1, 2]);
        controller.run_cycle(&mut pack).unwrap();

        let missing = &pack.batteries[0].cells[1];
        assert!(!missing.is_data_current);
        assert_eq!(missing.version, None);
        // one error per read pass, the setpoint change triggered a second pass
        assert_eq!(missing.error_count, 2);
        assert!(sink.take().contains(&TelemetryEvent::ErrorCount {
            battery: 0,
            cell: 1,
            error_count: 1
        }));
        let targets: Vec<u16> = pack.cells().map(|c| c.target_shunt_current).collect();
        assert_eq!(targets, vec![0, 0, 450]);
    }

    #[test]
    fn cell_joining_next_to_a_shunt_does_not_lower_the_minimum() {
        let bus = SimBus::new()
            .with_cell(0, SimCell::new(ProtocolVersion::V4, 3600))
            .with_cell(2, SimCell::new(ProtocolVersion::V4, 3700));
        let (mut controller, _sink) = controller(bus, SETTINGS, PERIOD);
        let mut pack = pack(&[0, 1, 2]);
        controller.run_cycle(&mut pack).unwrap();
        assert_eq!(pack.batteries[0].cells[2].target_shunt_current, 450);

        controller
            .session
            .transport_mut()
            .cells
            .insert(1, SimCell::new(ProtocolVersion::V4, 3620));
        controller.clock.now += PERIOD;
        controller.run_cycle(&mut pack).unwrap();

        let cells = &pack.batteries[0].cells;
        // identified while its neighbour shunts, so no trusted voltage yet
        assert_eq!(cells[1].version, Some(ProtocolVersion::V4));
        assert!(cells[1].is_data_current);
        assert!(!cells[1].has_trusted_voltage);
        assert_eq!(cells[1].v_cell, 0);

        let targets: Vec<u16> = cells.iter().map(|c| c.target_shunt_current).collect();
        assert_eq!(targets, vec![0, 0, 450]);
        assert_eq!(cells[0].min_current, 0);
        assert!(!controller
            .session()
            .transport()
            .commands_to(0)
            .contains(&Command::ShuntUp));
    }

    #[test]
    fn stuck_shunt_opens_the_charger_relay() {
        let mut bus = three_cell_bus([3600, 3620, 3700]);
        bus.cells.get_mut(&2).unwrap().stuck = true;
        let (mut controller, sink) = controller(bus, SETTINGS, PERIOD);
        let relay = CountingRelay::default();
        controller.set_charger(Box::new(relay.clone()));
        let mut pack = pack(&[0, 1, 2]);

        let err = controller.run(&mut pack).unwrap_err();
        assert!(
            matches!(
                err,
                ControlError::ShuntCommand {
                    cell: 2,
                    target: 450,
                    source: Error::ShuntNotConfirmed { .. },
                    ..
                }
            ),
            "{err}"
        );
        assert_eq!(*relay.shutdowns.borrow(), 1);
        assert!(sink
            .take()
            .iter()
            .any(|e| matches!(e, TelemetryEvent::ChargerShutdown { .. })));
    }

    #[test]
    fn out_of_range_setpoint_is_fatal() {
        let settings = BalanceSettings {
            min_shunt_current: 500,
            ..SETTINGS
        };
        let (mut controller, _sink) =
            controller(three_cell_bus([3600, 3620, 3700]), settings, PERIOD);
        let relay = CountingRelay::default();
        controller.set_charger(Box::new(relay.clone()));
        let mut pack = pack(&[0, 1, 2]);

        let err = controller.run(&mut pack).unwrap_err();
        assert!(matches!(
            err,
            ControlError::ShuntRange {
                cell: 2,
                target: 500,
                ..
            }
        ));
        assert_eq!(*relay.shutdowns.borrow(), 1);
        // nothing was sent to the cell for the bad target
        let bus = controller.session().transport();
        assert!(!bus.commands_to(2).contains(&Command::ShuntUp));
    }

    #[test]
    fn seconds_round_up() {
        assert_eq!(seconds(Duration::ZERO), 0);
        assert_eq!(seconds(Duration::from_millis(1)), 1);
        assert_eq!(seconds(Duration::from_millis(2500)), 3);
        assert_eq!(seconds(Duration::from_secs(2)), 2);
    }
}
