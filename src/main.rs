//! BL0940 Energy Meter CLI
//!
//! A command-line interface (CLI) application for reading a BL0940 energy
//! metering chip connected to a serial port.
//!
//! This tool allows users to:
//! - Read voltage, current, active power, energy and the two temperatures once.
//! - Run in a continuous daemon mode that requests a packet every poll interval
//!   and either prints the values to the console or publishes them to an MQTT broker.
//! - Write the chip's register setup after a reset.
//!
//! Calibration (CT or shunt circuit, divider and resistor values) and frame
//! settings are read from an optional YAML file and can be overridden on the
//! command line. The CLI leverages the `bl0940_lib` crate for everything
//! except the output.

use anyhow::{bail, Context, Result};
use bl0940_lib::{bl0940::Bl0940, config::Config, sensor::Quantity, serial, transport::Transport};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{
    panic,
    time::{Duration, Instant},
};

mod commandline;
mod mqtt;

/// Pause between two drain phases of the scheduler loop.
const LOOP_INTERVAL: Duration = Duration::from_millis(20);

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0)); // Provide defaults

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic", // Optional target for filtering
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Decimal places used when printing a quantity.
fn accuracy_decimals(quantity: Quantity) -> usize {
    match quantity {
        Quantity::Voltage => 2,
        Quantity::Current => 5,
        Quantity::Power | Quantity::Energy => 3,
        Quantity::InternalTemperature | Quantity::ExternalTemperature => 1,
    }
}

fn format_value(quantity: Quantity, value: f64) -> String {
    format!(
        "{}: {:.*} {}",
        quantity,
        accuracy_decimals(quantity),
        value,
        quantity.unit()
    )
}

fn attach_console_sinks<T: Transport>(meter: &mut Bl0940<T>) {
    for quantity in Quantity::ALL {
        meter.set_sensor(quantity, move |value: f64| {
            println!("{}", format_value(quantity, value))
        });
    }
}

/// Drives the two phases of `meter`: a read request every `poll_interval` and
/// a drain of the received bytes on every loop iteration. Never returns on success.
pub(crate) fn run_scheduler<T: Transport>(
    meter: &mut Bl0940<T>,
    poll_interval: Duration,
) -> Result<()> {
    let mut next_poll = Instant::now();
    loop {
        let now = Instant::now();
        if now >= next_poll {
            debug!("Requesting packet, statistics: {:?}", meter.stats());
            meter.update().with_context(|| "Cannot send read request")?;
            next_poll += poll_interval;
            if next_poll < now {
                // We fell behind, do not send a burst of requests.
                next_poll = now + poll_interval;
            }
        }
        meter
            .drain()
            .with_context(|| "Cannot read from serial port")?;
        std::thread::sleep(LOOP_INTERVAL);
    }
}

/// Sends one read request and waits up to `wait` for a valid packet.
fn handle_read<T: Transport>(meter: &mut Bl0940<T>, wait: Duration) -> Result<()> {
    info!("Executing: Read");
    attach_console_sinks(meter);
    meter.update().with_context(|| "Cannot send read request")?;
    let deadline = Instant::now() + wait;
    loop {
        if meter
            .drain()
            .with_context(|| "Cannot read from serial port")?
            > 0
        {
            return Ok(());
        }
        if Instant::now() >= deadline {
            let stats = meter.stats();
            bail!(
                "No valid packet received within {wait:?} ({} dropped: {} header, {} checksum errors, {} bytes skipped)",
                stats.dropped(),
                stats.header_errors,
                stats.checksum_errors,
                stats.skipped_bytes
            );
        }
        std::thread::sleep(LOOP_INTERVAL);
    }
}

/// Handles the init command.
///
/// This function prompts the user for confirmation and then writes the
/// register setup.
fn handle_init<T: Transport>(meter: &mut Bl0940<T>) -> Result<()> {
    info!("Executing: Init");
    println!(
        "WARNING: This will soft reset the BL0940 and overwrite its mode, temperature\n\
         control and fast RMS registers."
    );
    if !Confirm::new()
        .with_prompt("Are you sure you want to proceed?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")?
    {
        info!("Init aborted by user.");
        return Ok(());
    }
    meter
        .initialize()
        .with_context(|| "Cannot write register setup")?;
    println!("Register setup written successfully.");
    Ok(())
}

fn load_config(args: &commandline::CliArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("Cannot load configuration file {path:?}"))?,
        None => Config::default(),
    };
    args.apply_overrides(&mut config);
    Ok(config)
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "BL0940 CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Build the meter from configuration file and command line
    let config = load_config(&args)?;
    debug!("Configuration: {config:?}");
    if args.baud_rate != serial::BAUD_RATE {
        warn!(
            "The BL0940 only talks {} baud, using {} as requested",
            serial::BAUD_RATE,
            args.baud_rate
        );
    }
    info!(
        "Opening serial port {} at {} baud...",
        args.device, args.baud_rate
    );
    let port = serial::open(&args.device, args.baud_rate, args.timeout)
        .with_context(|| format!("Cannot open serial port {}", args.device))?;
    let mut meter = config.build(port);

    // 3. Execute the command
    match &args.command {
        commandline::CliCommands::Daemon {
            poll_interval,
            output,
        } => {
            let poll_interval = poll_interval.unwrap_or(config.update_interval);
            info!("Starting daemon mode: output={output:?}, interval={poll_interval:?}");
            match output {
                commandline::DaemonOutput::Console => {
                    attach_console_sinks(&mut meter);
                    run_scheduler(&mut meter, poll_interval)?;
                }
                commandline::DaemonOutput::Mqtt { config_file } => {
                    mqtt::run_daemon(&mut meter, poll_interval, config_file)?;
                }
            }
        }
        commandline::CliCommands::Read { wait } => {
            handle_read(&mut meter, *wait)?;
        }
        commandline::CliCommands::Init => {
            handle_init(&mut meter)?;
        }
    }

    Ok(())
}
