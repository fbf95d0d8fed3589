use crate::mqtt::MqttConfig;
use bl0940_lib::{calibration::CurrentSensor, config::Config, serial};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::{path::PathBuf, time::Duration};

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1") // Common default for Windows, though may vary.
    } else {
        String::from("/dev/ttyUSB0") // Common default for USB-to-serial adapters on Linux.
    }
}

fn parse_header(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid header byte format: {e}"))
}

fn parse_current_sensor(s: &str) -> Result<CurrentSensor, String> {
    s.parse::<CurrentSensor>()
}

fn parse_temperature_diff(s: &str) -> Result<f64, String> {
    let value = s
        .parse::<f64>()
        .map_err(|e| format!("Invalid temperature difference format: {e}"))?;
    if value < 0.0 {
        Err(format!("Temperature difference must not be negative: {value}"))
    } else {
        Ok(value)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read the meter and print the values to the standard output (console).
    Console,
    /// Continuously read the meter and publish the values to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: request a packet every poll interval and publish every
    /// valid packet as soon as it arrives.
    /// Output can be directed to stdout or an MQTT broker.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval between two read requests (e.g., "10s", "1m").
        /// Defaults to `update_interval` of the configuration file (60s).
        #[arg(value_parser = humantime::parse_duration, short, long, verbatim_doc_comment)]
        poll_interval: Option<Duration>,

        /// Specifies the output.
        #[command(subcommand)]
        output: DaemonOutput,
    },

    /// Request one packet and print all values.
    Read {
        /// How long to wait for the answer.
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        wait: Duration,
    },

    /// Reset the chip and write the register setup (50Hz, 800ms RMS update,
    /// automatic temperature measurement).
    #[clap(verbatim_doc_comment)]
    Init,
}

const fn about_text() -> &'static str {
    "BL0940 energy meter CLI - Read voltage, current, power, energy and temperatures over UART."
}

#[derive(Parser, Debug)]
#[command(name="powermon", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warn.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Serial port device name.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    #[arg(global = true, short, long, default_value_t = default_device_name(), verbatim_doc_comment)]
    pub device: String,

    /// Baud rate for serial communication. The BL0940 only supports 4800.
    #[arg(global = true, long, default_value_t = serial::BAUD_RATE)]
    pub baud_rate: u32,

    /// Serial I/O timeout for a single read or write.
    /// Examples: "100ms", "1s".
    #[arg(global = true, long, default_value = "100ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// YAML file with calibration and frame settings.
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    /// Current sensing circuit: CT or SHUNT. Overrides the configuration file.
    #[arg(global = true, long, value_parser = parse_current_sensor)]
    pub current_sensor: Option<CurrentSensor>,

    /// Accepted frame header byte, can be repeated.
    /// Can be specified in decimal or hexadecimal (e.g., "0x55").
    /// Overrides the configuration file.
    #[arg(global = true, long = "header", value_parser = parse_header, verbatim_doc_comment)]
    pub headers: Vec<u8>,

    /// Accept any frame header byte, only the checksum guards a packet.
    #[arg(global = true, long, conflicts_with = "headers")]
    pub any_header: bool,

    /// Minimum temperature change in °C before a new temperature is published.
    /// Overrides the configuration file.
    #[arg(global = true, long, value_parser = parse_temperature_diff, verbatim_doc_comment)]
    pub max_temperature_diff: Option<f64>,

    #[command(subcommand)]
    pub command: CliCommands,
}

impl CliArgs {
    /// Applies the command line overrides on top of `config`.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(current_sensor) = self.current_sensor {
            config.current_sensor = current_sensor;
        }
        if self.any_header {
            config.accepted_headers = Some(Vec::new());
        } else if !self.headers.is_empty() {
            config.accepted_headers = Some(self.headers.clone());
        }
        if let Some(max_temperature_diff) = self.max_temperature_diff {
            config.max_temperature_diff = max_temperature_diff;
        }
    }
}
