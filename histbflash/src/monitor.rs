//! Serial terminal primitives.
//!
//! After a flash the freshly written bootloader starts talking on the same
//! line; the monitor hands the operator an interactive terminal, either on
//! a fresh port or on the port recovered from a finished flashing session.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{NativePort, Port, SerialConfig};

/// An interactive terminal session over a serial port.
pub struct MonitorSession {
    port: Box<dyn Port>,
}

impl MonitorSession {
    /// Open a monitor session on the specified port and baud rate.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig::new(port_name, baud_rate)
            .with_timeout(Duration::from_millis(50));
        Ok(Self {
            port: Box::new(NativePort::open(&config)?),
        })
    }

    /// Reuse an already open port, e.g. one handed back by a finished
    /// flashing session.
    pub fn from_port(mut port: impl Port + 'static) -> Result<Self> {
        port.set_timeout(Duration::from_millis(50))?;
        Ok(Self {
            port: Box::new(port),
        })
    }

    /// Create a cloned reader handle for a background read loop.
    pub fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        self.port
            .try_clone_reader()
    }

    /// Write raw bytes to the serial connection.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)?;
        Ok(())
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.port
            .name()
    }
}

/// Drain buffered bytes into displayable UTF-8 text.
///
/// Invalid sequences become the replacement character; an incomplete
/// multi-byte suffix stays in `buffer` for the next read so characters
/// split across reads render correctly.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();
    loop {
        match std::str::from_utf8(buffer) {
            Ok(text) => {
                output.push_str(text);
                buffer.clear();
                return output;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                output.push_str(&String::from_utf8_lossy(&buffer[..valid]));
                match err.error_len() {
                    Some(bad) => {
                        output.push('\u{FFFD}');
                        buffer.drain(..valid + bad);
                    }
                    None => {
                        // Incomplete suffix: hold it back.
                        buffer.drain(..valid);
                        return output;
                    }
                }
            }
        }
    }
}

/// Prepare device text for a raw-mode terminal.
///
/// Line endings are normalized to CRLF (raw mode does not translate `\n`),
/// bare carriage returns count as line breaks, and control characters
/// other than tab are dropped.
pub fn format_terminal_output(text: &str, at_line_start: &mut bool) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text
        .chars()
        .peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
                *at_line_start = true;
            }
            '\n' => {
                out.push_str("\r\n");
                *at_line_start = true;
            }
            '\t' => {
                out.push(ch);
                *at_line_start = false;
            }
            _ if ch.is_control() => {}
            _ => {
                out.push(ch);
                *at_line_start = false;
            }
        }
    }
    out
}
