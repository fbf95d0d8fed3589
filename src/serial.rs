//! Serial port settings of the BL0940 UART.
use std::time::Duration;

/// The chip talks 4800 baud only.
pub const BAUD_RATE: u32 = 4800;
/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Creates a `tokio_serial::SerialPortBuilder` with the chip's line settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate, normally [`BAUD_RATE`].
/// * `timeout` - Upper bound for a single read or write.
pub fn serial_port_builder(
    device: &str,
    baud_rate: u32,
    timeout: Duration,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, baud_rate)
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
}

/// Opens `device` ready to be used as a [`crate::transport::Transport`].
pub fn open(
    device: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn tokio_serial::SerialPort>, tokio_serial::Error> {
    serial_port_builder(device, baud_rate, timeout).open()
}
