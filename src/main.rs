mod commandline;
mod daemon;
mod mqtt;

use anyhow::{bail, Context, Result};
use clap::Parser;
use commandline::{CliArgs, CliCommands};
use evd5bms_lib::balance::validate_shunt_current;
use evd5bms_lib::config::Config;
use evd5bms_lib::serialport::SerialTransport;
use evd5bms_lib::session::CellSession;
use evd5bms_lib::topology::Pack;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn scan(session: &mut CellSession<SerialTransport>, pack: &mut Pack) {
    for cell in pack.cells_mut() {
        match session.get_cell_version(cell) {
            Ok(version) => println!(
                "{cell}: {version:?} revision {} programmed {:?} {:?}",
                cell.revision, cell.when_programmed, cell.hardware
            ),
            Err(err) => println!("{cell}: no answer ({err})"),
        }
    }
}

fn status(session: &mut CellSession<SerialTransport>, pack: &mut Pack) {
    for cell in pack.cells_mut() {
        match session.read_status(cell) {
            Ok(status) => println!("{cell}: {status:?}"),
            Err(err) => println!("{cell}: no answer ({err})"),
        }
    }
}

fn shunt(
    session: &mut CellSession<SerialTransport>,
    pack: &mut Pack,
    battery: usize,
    cell: usize,
    current: u16,
) -> Result<()> {
    validate_shunt_current(current)?;
    let Some(cell) = pack.cell_mut(battery, cell) else {
        bail!("No cell {cell} in battery {battery}");
    };
    cell.target_shunt_current = current;
    session
        .set_shunt_current(cell, current)
        .with_context(|| format!("Cannot set shunt current of {cell}"))?;
    println!("{cell}: shunt current {} mA", cell.min_current);
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Cannot load configuration from '{}'", args.config))?;
    if let Some(device) = &args.device {
        config.serial_port = device.clone();
    }

    let mut transport = SerialTransport::new(&config.serial_port)
        .with_context(|| format!("Cannot open serial port '{}'", config.serial_port))?;
    transport.set_timeout(args.timeout)?;
    let mut session = CellSession::new(transport);
    let mut pack = Pack::from_config(&config);

    match args.command {
        CliCommands::Scan => scan(&mut session, &mut pack),
        CliCommands::Status => status(&mut session, &mut pack),
        CliCommands::Shunt {
            battery,
            cell,
            current,
        } => shunt(&mut session, &mut pack, battery, cell, current)?,
        CliCommands::Run { output } => daemon::run(session, pack, &config, output)?,
    }

    Ok(())
}
