//! Conversion of raw register values into physical units.
//!
//! The conversion depends on the external circuit: a resistor divider on the
//! voltage input and either a current transformer (CT) or a shunt resistor on
//! the current input. [`Calibration`] holds the resolved constants and
//! performs the conversion, [`TemperatureFilter`] and [`EnergyAccumulator`]
//! carry the little state kept between two packets.
//!
//! Calibration constants are used as divisors. Zero or negative values are a
//! configuration error and are not checked here.

#[cfg(feature = "serde")]
use serde::Deserialize;

/// Internal reference voltage of the chip in volts.
pub const VREF: f64 = 1.218;

/// Voltage divider R1 in kOhm.
pub const VOLTAGE_DIVIDER_R1: f64 = 0.51;
/// Voltage divider R2 in kOhm (5 x 390 kOhm).
pub const VOLTAGE_DIVIDER_R2: f64 = 1950.0;
/// Shunt resistor in mOhm.
pub const SHUNT_RESISTOR_MOHM: f64 = 1.0;
/// CT load resistor in Ohm.
pub const CT_LOAD_RESISTOR: f64 = 3.0;
pub const CT_TURNS_RATIO: f64 = 2000.0;

/// Energy of one CF pulse in watt-hours (297 J per pulse).
pub const ENERGY_WH_PER_PULSE: f64 = 297.0 / 3600.0;

/// Raw temperature register value reported when no sensor is present.
pub const TEMPERATURE_ABSENT: u16 = 0xFFFF;

const CF_CNT_MODULUS: u32 = 1 << 24;

/// Current sensing circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum CurrentSensor {
    /// Current transformer with a load resistor.
    #[default]
    #[cfg_attr(feature = "serde", serde(alias = "ct"))]
    Ct,
    /// Shunt resistor.
    #[cfg_attr(feature = "serde", serde(alias = "shunt"))]
    Shunt,
}

impl std::fmt::Display for CurrentSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurrentSensor::Ct => write!(f, "CT"),
            CurrentSensor::Shunt => write!(f, "SHUNT"),
        }
    }
}

impl std::str::FromStr for CurrentSensor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CT" => Ok(CurrentSensor::Ct),
            "SHUNT" => Ok(CurrentSensor::Shunt),
            _ => Err(format!("Unknown current sensor '{s}', expected CT or SHUNT")),
        }
    }
}

/// User supplied calibration constants. `None` selects the default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CalibrationOverrides {
    /// kOhm
    pub voltage_divider_r1: Option<f64>,
    /// kOhm
    pub voltage_divider_r2: Option<f64>,
    /// mOhm
    #[cfg_attr(feature = "serde", serde(alias = "shunt_resistance_mohm"))]
    pub shunt_resistor: Option<f64>,
    /// Ohm
    pub ct_load_resistor: Option<f64>,
    pub ct_turns_ratio: Option<f64>,
}

/// Calibration constant names, see [`Calibration::is_overridden`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    VoltageDividerR1,
    VoltageDividerR2,
    ShuntResistor,
    CtLoadResistor,
    CtTurnsRatio,
}

/// Current path with the constants it needs.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CurrentPath {
    Ct {
        load_resistor: f64,
        turns_ratio: f64,
    },
    Shunt {
        resistor_mohm: f64,
    },
}

/// Resolved calibration, fixed for the lifetime of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    overrides: CalibrationOverrides,
    voltage_divider_r1: f64,
    voltage_divider_r2: f64,
    current_path: CurrentPath,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(CurrentSensor::default(), CalibrationOverrides::default())
    }
}

impl Calibration {
    pub fn new(sensor: CurrentSensor, overrides: CalibrationOverrides) -> Self {
        let current_path = match sensor {
            CurrentSensor::Ct => CurrentPath::Ct {
                load_resistor: overrides.ct_load_resistor.unwrap_or(CT_LOAD_RESISTOR),
                turns_ratio: overrides.ct_turns_ratio.unwrap_or(CT_TURNS_RATIO),
            },
            CurrentSensor::Shunt => CurrentPath::Shunt {
                resistor_mohm: overrides.shunt_resistor.unwrap_or(SHUNT_RESISTOR_MOHM),
            },
        };
        Self {
            overrides,
            voltage_divider_r1: overrides.voltage_divider_r1.unwrap_or(VOLTAGE_DIVIDER_R1),
            voltage_divider_r2: overrides.voltage_divider_r2.unwrap_or(VOLTAGE_DIVIDER_R2),
            current_path,
        }
    }

    pub fn current_sensor(&self) -> CurrentSensor {
        match self.current_path {
            CurrentPath::Ct { .. } => CurrentSensor::Ct,
            CurrentPath::Shunt { .. } => CurrentSensor::Shunt,
        }
    }

    pub fn overrides(&self) -> &CalibrationOverrides {
        &self.overrides
    }

    /// Whether `constant` was set by the user instead of using the default.
    pub fn is_overridden(&self, constant: Constant) -> bool {
        match constant {
            Constant::VoltageDividerR1 => self.overrides.voltage_divider_r1.is_some(),
            Constant::VoltageDividerR2 => self.overrides.voltage_divider_r2.is_some(),
            Constant::ShuntResistor => self.overrides.shunt_resistor.is_some(),
            Constant::CtLoadResistor => self.overrides.ct_load_resistor.is_some(),
            Constant::CtTurnsRatio => self.overrides.ct_turns_ratio.is_some(),
        }
    }

    /// RMS voltage in V.
    pub fn voltage(&self, v_rms: u32) -> f64 {
        v_rms as f64 * VREF / 256.0 / 1000.0
            * (self.voltage_divider_r1 + self.voltage_divider_r2)
            / self.voltage_divider_r1
    }

    /// RMS current in A.
    pub fn current(&self, i_rms: u32) -> f64 {
        let scaled = i_rms as f64 * VREF / 256.0;
        match self.current_path {
            CurrentPath::Ct {
                load_resistor,
                turns_ratio,
            } => scaled / (1000.0 * load_resistor) * turns_ratio,
            CurrentPath::Shunt { resistor_mohm } => scaled / (1000.0 * resistor_mohm),
        }
    }

    /// Active power in W. Negative when power flows back.
    pub fn power(&self, watt: i32) -> f64 {
        let factor = match self.current_path {
            CurrentPath::Ct {
                load_resistor,
                turns_ratio,
            } => turns_ratio / load_resistor,
            CurrentPath::Shunt { resistor_mohm } => 1.0 / resistor_mohm,
        };
        watt as f64 * VREF * VREF / 256.0 / 1000.0 * factor
    }
}

/// Temperature in °C, `None` for the "sensor absent" value.
pub fn temperature(raw: u16) -> Option<f64> {
    if raw == TEMPERATURE_ABSENT {
        None
    } else {
        Some((raw as f64 - 64.0) * 170.0 / 448.0 - 40.0)
    }
}

/// Suppresses temperature changes below a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureFilter {
    max_difference: f64,
    last: Option<f64>,
}

impl TemperatureFilter {
    /// A `max_difference` of zero lets every reading through.
    pub fn new(max_difference: f64) -> Self {
        Self {
            max_difference,
            last: None,
        }
    }

    pub fn max_difference(&self) -> f64 {
        self.max_difference
    }

    /// Last accepted temperature.
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Returns the reading if it is to be published and remembers it.
    pub fn accept(&mut self, temperature: f64) -> Option<f64> {
        match self.last {
            Some(last)
                if self.max_difference != 0.0
                    && (temperature - last).abs() < self.max_difference =>
            {
                log::debug!(
                    "Temperature change below threshold - last={last} new={temperature} threshold={}",
                    self.max_difference
                );
                None
            }
            _ => {
                self.last = Some(temperature);
                Some(temperature)
            }
        }
    }
}

/// Running energy total built from the CF pulse counter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyAccumulator {
    last_count: Option<u32>,
    pulses: u64,
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of pulses accumulated so far.
    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    /// Accumulated energy in Wh.
    pub fn energy_wh(&self) -> f64 {
        self.pulses as f64 * ENERGY_WH_PER_PULSE
    }

    /// Adds the counter progress since the last call and returns the total in Wh.
    ///
    /// The first count seeds the total. The counter wraps at 2^24; a backwards
    /// jump of more than half the range is taken as a chip reset and the new
    /// count is added as is.
    pub fn update(&mut self, cf_cnt: u32) -> f64 {
        let cf_cnt = cf_cnt % CF_CNT_MODULUS;
        let delta = match self.last_count {
            None => cf_cnt,
            Some(last) => {
                let delta = cf_cnt.wrapping_sub(last) % CF_CNT_MODULUS;
                if delta > CF_CNT_MODULUS / 2 {
                    log::debug!("Energy counter reset - last={last} new={cf_cnt}");
                    cf_cnt
                } else {
                    delta
                }
            }
        };
        self.last_count = Some(cf_cnt);
        self.pulses += delta as u64;
        self.energy_wh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn voltage_fixture() {
        let calibration = Calibration::default();
        let voltage = calibration.voltage(0x0C0000);
        let expected = 786432.0 * 1.218 / 256.0 / 1000.0 * (0.51 + 1950.0) / 0.51;
        assert!(approx(voltage, expected));
        assert!((voltage - 14310.2264).abs() < 1e-3);
    }

    #[test]
    fn voltage_is_linear() {
        let calibration = Calibration::default();
        for raw in [1u32, 1000, 123_456, 4_000_000] {
            assert!(approx(calibration.voltage(2 * raw), 2.0 * calibration.voltage(raw)));
        }
        assert_eq!(calibration.voltage(0), 0.0);
    }

    #[test]
    fn current_by_topology() {
        let ct = Calibration::new(CurrentSensor::Ct, CalibrationOverrides::default());
        let shunt = Calibration::new(CurrentSensor::Shunt, CalibrationOverrides::default());
        assert!(approx(ct.current(100_000), 317.1875));
        assert!(approx(shunt.current(100_000), 0.47578125));
        assert_eq!(ct.current_sensor(), CurrentSensor::Ct);
        assert_eq!(shunt.current_sensor(), CurrentSensor::Shunt);
    }

    #[test]
    fn power_by_topology() {
        let ct = Calibration::new(CurrentSensor::Ct, CalibrationOverrides::default());
        let shunt = Calibration::new(CurrentSensor::Shunt, CalibrationOverrides::default());
        assert!(approx(ct.power(1000), 1000.0 * VREF * VREF / 256.0 / 1000.0 * 2000.0 / 3.0));
        assert!(approx(shunt.power(1000), 1000.0 * VREF * VREF / 256.0 / 1000.0));
        assert!(approx(ct.power(-1000), -ct.power(1000)));
        assert!(shunt.power(-5) < 0.0);
    }

    #[test]
    fn overrides_replace_defaults() {
        let overrides = CalibrationOverrides {
            voltage_divider_r1: Some(1.0),
            shunt_resistor: Some(2.0),
            ct_turns_ratio: Some(1000.0),
            ..Default::default()
        };
        let shunt = Calibration::new(CurrentSensor::Shunt, overrides);
        assert!(approx(shunt.voltage(256_000), 1.218 * 1951.0));
        assert!(approx(shunt.current(100_000), 0.47578125 / 2.0));
        assert!(shunt.is_overridden(Constant::VoltageDividerR1));
        assert!(shunt.is_overridden(Constant::ShuntResistor));
        assert!(shunt.is_overridden(Constant::CtTurnsRatio));
        assert!(!shunt.is_overridden(Constant::VoltageDividerR2));
        assert!(!shunt.is_overridden(Constant::CtLoadResistor));

        let ct = Calibration::new(CurrentSensor::Ct, overrides);
        assert!(approx(ct.current(100_000), 317.1875 / 2.0));
    }

    #[test]
    fn current_sensor_from_str() {
        assert_eq!("ct".parse::<CurrentSensor>(), Ok(CurrentSensor::Ct));
        assert_eq!("SHUNT".parse::<CurrentSensor>(), Ok(CurrentSensor::Shunt));
        assert!("hall".parse::<CurrentSensor>().is_err());
        assert_eq!(CurrentSensor::Shunt.to_string(), "SHUNT");
    }

    #[test]
    fn temperature_transfer() {
        assert_eq!(temperature(64), Some(-40.0));
        assert_eq!(temperature(176), Some(2.5));
        assert_eq!(temperature(288), Some(45.0));
        assert_eq!(temperature(TEMPERATURE_ABSENT), None);
    }

    #[test]
    fn temperature_filter_suppresses_small_changes() {
        let mut filter = TemperatureFilter::new(2.0);
        let published: Vec<f64> = [20.0, 21.0, 23.5]
            .into_iter()
            .filter_map(|t| filter.accept(t))
            .collect();
        assert_eq!(published, vec![20.0, 23.5]);
        assert_eq!(filter.last(), Some(23.5));

        // Drift is measured against the last accepted value.
        assert_eq!(filter.accept(22.0), None);
        assert_eq!(filter.accept(21.5), Some(21.5));
    }

    #[test]
    fn temperature_filter_disabled() {
        let mut filter = TemperatureFilter::new(0.0);
        assert_eq!(filter.accept(20.0), Some(20.0));
        assert_eq!(filter.accept(20.0), Some(20.0));
        assert_eq!(filter.accept(20.1), Some(20.1));
    }

    #[test]
    fn energy_accumulates_monotonic() {
        let mut energy = EnergyAccumulator::new();
        let mut previous = 0.0;
        for count in [10u32, 10, 11, 50, 1000, 1_000_000] {
            let total = energy.update(count);
            assert!(total >= previous);
            previous = total;
        }
        assert_eq!(energy.pulses(), 1_000_000);
        assert!(approx(energy.energy_wh(), 1_000_000.0 * 0.0825));
    }

    #[test]
    fn energy_counter_wraps() {
        let mut energy = EnergyAccumulator::new();
        energy.update(0xFF_FFF0);
        energy.update(0x00_0010);
        assert_eq!(energy.pulses(), 0xFF_FFF0 + 0x20);
    }

    #[test]
    fn energy_counter_reset() {
        let mut energy = EnergyAccumulator::new();
        energy.update(100_000);
        energy.update(5);
        assert_eq!(energy.pulses(), 100_005);
    }
}
