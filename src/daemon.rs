use anyhow::{Context, Result};
use evd5bms_lib::balance::BalanceSettings;
use evd5bms_lib::charger::{FilePackCurrent, FileRelay};
use evd5bms_lib::config::Config;
use evd5bms_lib::controller::Controller;
use evd5bms_lib::session::CellSession;
use evd5bms_lib::telemetry::LogSink;
use evd5bms_lib::topology::Pack;
use evd5bms_lib::transport::Transport;
use log::info;

use crate::{commandline, mqtt};

/// Runs the controller until it fails. Only returns with an error; the
/// charger has been shut down by then.
pub fn run<T: Transport>(
    session: CellSession<T>,
    mut pack: Pack,
    config: &Config,
    output: commandline::DaemonOutput,
) -> Result<()> {
    info!("Starting controller: output={output:?}, period={:?}", config.period);
    let mut controller = Controller::new(session, BalanceSettings::from(config), config.period);

    match &output {
        commandline::DaemonOutput::Console => controller.set_sink(Box::new(LogSink)),
        commandline::DaemonOutput::Mqtt {
            config_file,
            format,
        } => {
            let mqtt_config = mqtt::MqttConfig::load(config_file)
                .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
            info!("Successfully loaded MQTT config from {config_file}: {mqtt_config:?}");
            let sink = mqtt::MqttSink::new(mqtt_config, *format)
                .with_context(|| "Failed to create MQTT publisher")?;
            controller.set_sink(Box::new(sink));
        }
    }
    if let Some(path) = &config.charger_relay {
        info!("Charger relay at {path:?}");
        controller.set_charger(Box::new(FileRelay::new(path)));
    }
    if let Some(path) = &config.pack_current {
        info!("Pack current from {path:?}");
        controller.set_pack_current(Box::new(FilePackCurrent::new(path)));
    }

    let err = match controller.run(&mut pack) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    Err(err).with_context(|| "Balancing controller stopped")
}
