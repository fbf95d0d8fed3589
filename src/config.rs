//! YAML device configuration.
//!
//! ```yaml
//! current_sensor: SHUNT
//! shunt_resistor: 1.0
//! max_temperature_diff: 0.5
//! update_interval: 10s
//! accepted_headers: [0x55]
//! ```
//!
//! Every key is optional; missing keys fall back to the chip defaults.
use crate::{
    bl0940::Bl0940,
    calibration::{Calibration, CalibrationOverrides, CurrentSensor},
    error::Result,
    protocol::{FrameFormat, HeaderPolicy, READ_COMMAND},
    transport::Transport,
};
use serde::Deserialize;
use std::{fs::File, path::Path, time::Duration};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub current_sensor: CurrentSensor,
    #[serde(flatten)]
    pub calibration: CalibrationOverrides,
    /// °C, zero publishes every temperature.
    pub max_temperature_diff: f64,
    /// How often the scheduler should request a packet.
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,
    /// Accepted frame headers. Missing selects the default set, empty accepts any.
    pub accepted_headers: Option<Vec<u8>>,
    pub checksum_seed: u8,
    pub read_command: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            current_sensor: CurrentSensor::default(),
            calibration: CalibrationOverrides::default(),
            max_temperature_diff: 0.0,
            update_interval: Duration::from_secs(60),
            accepted_headers: None,
            checksum_seed: 0,
            read_command: READ_COMMAND,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading config file from {path:?}");
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn calibration(&self) -> Calibration {
        Calibration::new(self.current_sensor, self.calibration)
    }

    pub fn header_policy(&self) -> HeaderPolicy {
        match &self.accepted_headers {
            None => HeaderPolicy::default(),
            Some(headers) if headers.is_empty() => HeaderPolicy::Any,
            Some(headers) => HeaderPolicy::OneOf(headers.clone()),
        }
    }

    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat {
            header: self.header_policy(),
            checksum_seed: self.checksum_seed,
            read_command: self.read_command,
        }
    }

    /// Creates a driver for `transport` configured from `self`. Sinks are
    /// attached by the caller.
    pub fn build<T: Transport>(&self, transport: T) -> Bl0940<T> {
        let mut meter = Bl0940::new(transport, self.calibration());
        meter.set_frame_format(self.frame_format());
        meter.set_max_temperature_diff(self.max_temperature_diff);
        meter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Constant;
    use crate::error::Error;
    use crate::protocol::{FRAME_HEADER, FRAME_HEADER_DOCUMENTED};
    use crate::transport::tests::MockTransport;
    use assert_matches::assert_matches;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.calibration(), Calibration::default());
        assert_eq!(config.frame_format(), FrameFormat::default());
        assert_eq!(config.update_interval, Duration::from_secs(60));
    }

    #[test]
    fn full_config() {
        let config = Config::from_yaml_str(
            r#"
current_sensor: SHUNT
voltage_divider_r1: 1
shunt_resistance_mohm: 0.5
ct_turns_ratio: 1000.0
max_temperature_diff: 0.5
update_interval: 10s
accepted_headers: [0x58]
checksum_seed: 0x50
read_command: 0x58
"#,
        )
        .unwrap();
        assert_eq!(config.current_sensor, CurrentSensor::Shunt);
        assert_eq!(config.calibration.voltage_divider_r1, Some(1.0));
        assert_eq!(config.calibration.voltage_divider_r2, None);
        assert_eq!(config.calibration.shunt_resistor, Some(0.5));
        assert_eq!(config.update_interval, Duration::from_secs(10));
        assert_eq!(
            config.frame_format(),
            FrameFormat {
                header: HeaderPolicy::OneOf(vec![FRAME_HEADER_DOCUMENTED]),
                checksum_seed: 0x50,
                read_command: 0x58,
            }
        );

        let calibration = config.calibration();
        assert_eq!(calibration.current_sensor(), CurrentSensor::Shunt);
        assert!(calibration.is_overridden(Constant::CtTurnsRatio));
        assert!(!calibration.is_overridden(Constant::CtLoadResistor));
    }

    #[test]
    fn header_policies() {
        let any = Config::from_yaml_str("accepted_headers: []").unwrap();
        assert_eq!(any.header_policy(), HeaderPolicy::Any);
        let default = Config::default();
        assert_eq!(
            default.header_policy(),
            HeaderPolicy::OneOf(vec![FRAME_HEADER, FRAME_HEADER_DOCUMENTED])
        );
    }

    #[test]
    fn lowercase_current_sensor() {
        let config = Config::from_yaml_str("current_sensor: shunt").unwrap();
        assert_eq!(config.current_sensor, CurrentSensor::Shunt);
    }

    #[test]
    fn invalid_config() {
        assert_matches!(
            Config::from_yaml_str("current_sensor: HALL"),
            Err(Error::Config(_))
        );
        assert_matches!(
            Config::from_yaml_file("/nonexistent/bl0940.yaml"),
            Err(Error::Io(_))
        );
    }

    #[test]
    fn build_applies_settings() {
        let config = Config::from_yaml_str("read_command: 0x58\ncurrent_sensor: SHUNT").unwrap();
        let mut meter = config.build(MockTransport::default());
        assert_eq!(meter.calibration().current_sensor(), CurrentSensor::Shunt);
        meter.update().unwrap();
        assert_eq!(meter.transport_mut().tx, vec![0x58, 0xAA]);
    }
}
