//! Polling driver for a BL0940 on a byte transport.
//!
//! The driver is split into two entry points that a cooperative scheduler
//! calls independently:
//!
//! * [`Bl0940::update`] on every poll tick sends the read request.
//! * [`Bl0940::drain`] on every loop iteration consumes whatever bytes have
//!   arrived and publishes the readings of each complete, valid packet.
//!
//! Neither call blocks waiting for the chip.
//!
//! ```no_run
//! use bl0940_lib::{
//!     bl0940::Bl0940,
//!     calibration::{Calibration, CalibrationOverrides, CurrentSensor},
//!     sensor::Quantity,
//! };
//! use std::time::{Duration, Instant};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = bl0940_lib::serial::open("/dev/ttyUSB0", 4800, Duration::from_millis(100))?;
//!     let calibration = Calibration::new(CurrentSensor::Shunt, CalibrationOverrides::default());
//!     let mut meter = Bl0940::new(port, calibration);
//!     meter.set_sensor(Quantity::Power, |watts: f64| println!("{watts:.1} W"));
//!
//!     let mut next_poll = Instant::now();
//!     loop {
//!         if Instant::now() >= next_poll {
//!             meter.update()?;
//!             next_poll += Duration::from_secs(5);
//!         }
//!         meter.drain()?;
//!         std::thread::sleep(Duration::from_millis(20));
//!     }
//! }
//! ```

use crate::{
    calibration::{self, Calibration, EnergyAccumulator, TemperatureFilter},
    error::{Error, Result},
    frame_reader::FrameReader,
    protocol::{self as proto, DataPacket, FrameFormat},
    sensor::{Quantity, Sensors, Sink},
    transport::Transport,
};

/// Counters of the packets seen by [`Bl0940::drain`] and [`Bl0940::process_packet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Packets that passed validation and were published.
    pub accepted: u64,
    /// Packets dropped because of their header byte.
    pub header_errors: u64,
    /// Packets dropped because of their checksum.
    pub checksum_errors: u64,
    /// Bytes received outside of a packet, e.g. line noise.
    pub skipped_bytes: u64,
}

impl FrameStats {
    pub fn dropped(&self) -> u64 {
        self.header_errors + self.checksum_errors
    }
}

/// A BL0940 energy meter attached to `T`.
#[derive(Debug)]
pub struct Bl0940<T: Transport> {
    transport: T,
    reader: FrameReader,
    format: FrameFormat,
    calibration: Calibration,
    sensors: Sensors,
    internal_temperature: TemperatureFilter,
    external_temperature: TemperatureFilter,
    energy: EnergyAccumulator,
    stats: FrameStats,
}

impl<T: Transport> Bl0940<T> {
    /// Creates a driver with the default frame format and no sensors.
    ///
    /// The calibration, and with it the current sensing topology, is fixed
    /// for the lifetime of the driver.
    pub fn new(transport: T, calibration: Calibration) -> Self {
        Self {
            transport,
            reader: FrameReader::new(),
            format: FrameFormat::default(),
            calibration,
            sensors: Sensors::default(),
            internal_temperature: TemperatureFilter::default(),
            external_temperature: TemperatureFilter::default(),
            energy: EnergyAccumulator::new(),
            stats: FrameStats::default(),
        }
    }

    /// Replaces the frame format. A partially received packet is dropped.
    pub fn set_frame_format(&mut self, format: FrameFormat) {
        self.format = format;
        self.reader.reset();
    }

    /// Minimum temperature change in °C before a new temperature is published.
    /// Zero publishes every reading.
    pub fn set_max_temperature_diff(&mut self, max_difference: f64) {
        self.internal_temperature = TemperatureFilter::new(max_difference);
        self.external_temperature = TemperatureFilter::new(max_difference);
    }

    /// Attaches `sink` to `quantity`, replacing any previous sink.
    pub fn set_sensor<S: Sink + 'static>(&mut self, quantity: Quantity, sink: S) {
        self.sensors.set(quantity, Box::new(sink));
    }

    pub fn sensors_mut(&mut self) -> &mut Sensors {
        &mut self.sensors
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn frame_format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            skipped_bytes: self.reader.skipped(),
            ..self.stats
        }
    }

    /// Energy accumulated since the first packet, in Wh.
    pub fn energy_wh(&self) -> f64 {
        self.energy.energy_wh()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Writes the register setup of [`proto::INIT_SEQUENCE`] to the chip.
    pub fn initialize(&mut self) -> Result<()> {
        for (register, value) in proto::INIT_SEQUENCE {
            let command = proto::write_register_command(proto::WRITE_COMMAND, register, value);
            log::trace!("Writing register 0x{register:02X}: {command:02X?}");
            self.transport.write_bytes(&command)?;
        }
        Ok(())
    }

    /// Request phase: asks the chip for a fresh packet without waiting for it.
    ///
    /// The chip only sends in reply to a request, so whatever is left of an
    /// earlier packet is dropped here.
    pub fn update(&mut self) -> Result<()> {
        self.reader.reset();
        let command = proto::read_command(self.format.read_command);
        log::trace!("Requesting packet {command:02X?}");
        self.transport.write_bytes(&command)?;
        Ok(())
    }

    /// Drain phase: consumes the available bytes and publishes every valid packet.
    ///
    /// Invalid packets are logged, counted and dropped. Returns the number of
    /// packets published by this call.
    pub fn drain(&mut self) -> Result<usize> {
        let mut accepted = 0;
        while let Some(raw) = self.reader.read_from(&mut self.transport, &self.format.header)? {
            match self.process_packet(&raw) {
                Ok(()) => accepted += 1,
                Err(Error::Protocol(err)) => log::warn!("Invalid data. {err} buffer={raw:02X?}"),
                Err(err) => return Err(err),
            }
        }
        Ok(accepted)
    }

    /// Validates one complete packet and publishes its readings.
    ///
    /// [`Bl0940::drain`] hands every assembled packet to this method; it can
    /// also replay packets captured elsewhere. Header and checksum failures
    /// are counted in [`FrameStats`] and returned as [`Error::Protocol`].
    pub fn process_packet(&mut self, raw: &[u8]) -> Result<()> {
        let data = match DataPacket::validate_slice(raw, &self.format) {
            Ok(data) => data,
            Err(err) => {
                match err {
                    proto::Error::UnexpectedHeader(_) => self.stats.header_errors += 1,
                    proto::Error::ChecksumMismatch { .. } => self.stats.checksum_errors += 1,
                    proto::Error::FrameSize { .. } => {}
                }
                return Err(err.into());
            }
        };
        self.stats.accepted += 1;

        if self.sensors.is_configured(Quantity::Voltage) {
            let voltage = self.calibration.voltage(data.v_rms);
            self.sensors.publish(Quantity::Voltage, voltage);
        }
        if self.sensors.is_configured(Quantity::Current) {
            let current = self.calibration.current(data.i_rms);
            self.sensors.publish(Quantity::Current, current);
        }
        if self.sensors.is_configured(Quantity::Power) {
            let power = self.calibration.power(data.watt);
            self.sensors.publish(Quantity::Power, power);
        }
        if self.sensors.is_configured(Quantity::Energy) {
            let energy = self.energy.update(data.cf_cnt);
            self.sensors.publish(Quantity::Energy, energy);
        }
        Self::update_temperature(
            &mut self.sensors,
            &mut self.internal_temperature,
            Quantity::InternalTemperature,
            data.tps1,
        );
        Self::update_temperature(
            &mut self.sensors,
            &mut self.external_temperature,
            Quantity::ExternalTemperature,
            data.tps2,
        );
        Ok(())
    }

    fn update_temperature(
        sensors: &mut Sensors,
        filter: &mut TemperatureFilter,
        quantity: Quantity,
        raw: u16,
    ) {
        if !sensors.is_configured(quantity) {
            return;
        }
        let Some(temperature) = calibration::temperature(raw) else {
            log::debug!("No {quantity} sensor present");
            return;
        };
        if let Some(temperature) = filter.accept(temperature) {
            sensors.publish(quantity, temperature);
        }
    }
}
