//! Destinations for the converted readings.
use std::fmt;

/// Receives the values of one physical quantity.
pub trait Sink {
    fn publish(&mut self, value: f64);
}

impl<F: FnMut(f64)> Sink for F {
    fn publish(&mut self, value: f64) {
        self(value)
    }
}

/// The quantities a BL0940 reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Voltage,
    Current,
    Power,
    Energy,
    InternalTemperature,
    ExternalTemperature,
}

impl Quantity {
    pub const ALL: [Quantity; 6] = [
        Quantity::Voltage,
        Quantity::Current,
        Quantity::Power,
        Quantity::Energy,
        Quantity::InternalTemperature,
        Quantity::ExternalTemperature,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
            Quantity::Power => "power",
            Quantity::Energy => "energy",
            Quantity::InternalTemperature => "internal_temperature",
            Quantity::ExternalTemperature => "external_temperature",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::Voltage => "V",
            Quantity::Current => "A",
            Quantity::Power => "W",
            Quantity::Energy => "Wh",
            Quantity::InternalTemperature | Quantity::ExternalTemperature => "°C",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One optional sink per quantity. Quantities without a sink are neither
/// computed nor published.
#[derive(Default)]
pub struct Sensors {
    slots: [Option<Box<dyn Sink>>; 6],
}

impl fmt::Debug for Sensors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Quantity::ALL.iter().filter(|q| self.is_configured(**q)))
            .finish()
    }
}

impl Sensors {
    fn index(quantity: Quantity) -> usize {
        quantity as usize
    }

    pub fn set(&mut self, quantity: Quantity, sink: Box<dyn Sink>) {
        self.slots[Self::index(quantity)] = Some(sink);
    }

    pub fn clear(&mut self, quantity: Quantity) {
        self.slots[Self::index(quantity)] = None;
    }

    pub fn is_configured(&self, quantity: Quantity) -> bool {
        self.slots[Self::index(quantity)].is_some()
    }

    /// Hands `value` to the sink of `quantity`, if there is one.
    pub fn publish(&mut self, quantity: Quantity, value: f64) {
        if let Some(sink) = self.slots[Self::index(quantity)].as_mut() {
            log::debug!("Publishing {quantity}={value} {}", quantity.unit());
            sink.publish(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn publishes_to_configured_slot_only() {
        let received = Rc::new(RefCell::new(Vec::new()));
        let log = received.clone();
        let mut sensors = Sensors::default();
        sensors.set(
            Quantity::Power,
            Box::new(move |value: f64| log.borrow_mut().push(value)),
        );
        assert!(sensors.is_configured(Quantity::Power));
        assert!(!sensors.is_configured(Quantity::Voltage));

        sensors.publish(Quantity::Voltage, 230.0);
        sensors.publish(Quantity::Power, -12.5);
        assert_eq!(*received.borrow(), vec![-12.5]);

        sensors.clear(Quantity::Power);
        sensors.publish(Quantity::Power, 1.0);
        assert_eq!(received.borrow().len(), 1);
    }

    #[test]
    fn quantity_names() {
        assert_eq!(Quantity::InternalTemperature.to_string(), "internal_temperature");
        assert_eq!(Quantity::Energy.unit(), "Wh");
        assert_eq!(Quantity::ALL.len(), 6);
    }
}
