use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use evd5bms_lib::config::Config;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Identify every configured cell and show its protocol version and hardware
    Scan,
    /// Read and show the full status of every configured cell
    Status,
    /// Set the shunt current of a single cell
    Shunt {
        /// Battery index as ordered in the configuration file
        #[arg(long, short)]
        battery: usize,
        /// Cell index within the battery
        #[arg(long, short)]
        cell: usize,
        /// Shunt current in mA: 0 (off) or 150 to 450
        #[arg(long)]
        current: u16,
    },
    /// Run the balancing controller until a fatal error
    Run {
        /// Output destination for telemetry
        #[command(subcommand)]
        output: DaemonOutput,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Write telemetry to the log.
    Console,
    /// Publish telemetry to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "EVD5 BMS master controller"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Pack configuration file
    #[arg(long, default_value_t = Config::DEFAULT_CONFIG_FILE.to_string())]
    pub config: String,

    /// Serial port device path, overrides the configuration file
    #[arg(short, long)]
    pub device: Option<String>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for a single serial read (e.g., "100ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub timeout: Duration,
}
