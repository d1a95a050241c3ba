use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show the full telemetry snapshot and the derived metrics
    Telemetry,
    /// Show battery voltage, current and State of Charge (SOC)
    Soc,
    /// Show the pack temperature
    Temperature,
    /// Show rated capacity and cycle count
    Capacity,
    /// Show individual cell voltages
    CellVoltages,
    /// Show derived metrics: power and cell voltage statistics
    Derived,
    /// Run in daemon mode, periodically polling and outputting telemetry
    Daemon {
        /// Output destination for telemetry
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between polling cycles (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously poll telemetry and print it to the standard output (console).
    Console,
    /// Continuously poll telemetry and publish it to an MQTT broker.
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
    "sok bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Advertised BLE name of the battery (e.g., "SOK-AA12345")
    #[arg(short, long)]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for BLE characteristic operations (e.g., "500ms", "5s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "5s")]
    pub timeout: Duration,

    // BLE links to these packs drop intermittently, so a connection is
    // attempted a few times per cycle before the cycle is reported failed
    /// Number of connection attempts per polling cycle
    #[arg(long, default_value = "3")]
    pub attempts: u32,

    /// Fixed delay between connection attempts (e.g., "500ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "500ms")]
    pub retry_delay: Duration,
}
