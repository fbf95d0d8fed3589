//! A library for reading the BL0940 energy metering chip over its UART.
//!
//! The chip answers a read request with a 35 byte packet holding the raw
//! RMS voltage and current, active power, an energy pulse counter and two
//! temperatures. This crate validates these packets, converts the registers
//! into volts, amps, watts, watt-hours and degrees Celsius for either a
//! current transformer (CT) or a shunt resistor circuit, and publishes the
//! results to user supplied sinks.
//!
//! ## Features
//!
//! - **Protocol Implementation**: Packet layout, checksum and command frames, see [`protocol`].
//! - **Calibration**: Voltage divider, CT and shunt constants with defaults, see [`calibration`].
//! - **Non-blocking Driver**: Separate request and drain entry points for a cooperative
//!   scheduler, see [`bl0940::Bl0940`].
//! - **Serial Transport**: Any `tokio-serial` port can be used directly (feature `serial`).
//! - **YAML Configuration**: Device settings from a file (feature `serde`).
//!
//! ## Quick Start
//!
//! ```no_run
//! use bl0940_lib::{bl0940::Bl0940, calibration::Calibration, sensor::Quantity, serial};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = serial::open("/dev/ttyUSB0", serial::BAUD_RATE, Duration::from_millis(100))?;
//!     let mut meter = Bl0940::new(port, Calibration::default());
//!     meter.set_sensor(Quantity::Voltage, |volts: f64| println!("{volts:.2} V"));
//!
//!     meter.update()?;
//!     std::thread::sleep(Duration::from_millis(200));
//!     meter.drain()?;
//!
//!     Ok(())
//! }
//! ```

pub mod bl0940;
pub mod calibration;
pub mod error;
pub mod frame_reader;
pub mod protocol;
pub mod sensor;
pub mod transport;

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub mod serial;

#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
#[cfg(feature = "serde")]
pub mod config;

pub use error::{Error, Result};
