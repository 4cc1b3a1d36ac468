//! Port abstraction for serial communication.
//!
//! Separates I/O from protocol logic: the session layer talks to a `Port`
//! trait object and never to `serialport` directly, so protocol code can be
//! tested against scripted in-memory ports.
//!
//! ```text
//! +--------------------+
//! |   Session Layer    |
//! | (flasher, monitor) |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     Port Trait     |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |    NativePort      |
//! |   (serialport)     |
//! +--------------------+
//! ```

pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default baud rate of the bootROM serial console.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial port configuration.
///
/// The bootROM only ever speaks 8N1 with no flow control, so only the
/// knobs that actually vary are exposed.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Obtain an independent read handle over the same device.
    ///
    /// Used to hand the receive side to the background link reader while
    /// the session keeps writing through `self`. The clone inherits the
    /// current timeout.
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// Separated from `Port` because it's a static operation that doesn't
/// require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

/// Pick the serial port to use when none was named explicitly.
///
/// Succeeds only when exactly one candidate exists; zero or several is a
/// configuration error so a flash never goes to a guessed device.
pub fn auto_detect_port<E: PortEnumerator>() -> Result<PortInfo> {
    let mut ports = E::list_ports()?;
    match ports.len() {
        0 => Err(Error::Config(
            "no serial ports found; connect the board or pass --port".into(),
        )),
        1 => Ok(ports.remove(0)),
        n => Err(Error::Config(format!(
            "{n} serial ports found ({}); pass --port to pick one",
            ports
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPorts<const N: usize>;

    impl<const N: usize> PortEnumerator for FixedPorts<N> {
        fn list_ports() -> Result<Vec<PortInfo>> {
            Ok((0..N)
                .map(|i| PortInfo {
                    name: format!("/dev/ttyUSB{i}"),
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial_number: None,
                })
                .collect())
        }
    }

    #[test]
    fn test_auto_detect_exactly_one() {
        let info = auto_detect_port::<FixedPorts<1>>().expect("single candidate wins");
        assert_eq!(info.name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_auto_detect_none_is_config_error() {
        assert!(matches!(
            auto_detect_port::<FixedPorts<0>>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_auto_detect_ambiguous_is_config_error() {
        let err = auto_detect_port::<FixedPorts<3>>().unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("/dev/ttyUSB2")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD);
        assert_eq!(config.timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 921_600).with_timeout(Duration::from_secs(5));
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 921_600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
