//! # histbflash
//!
//! A library for flashing HiSilicon set-top-box boards over the bootROM
//! serial protocol.
//!
//! This crate provides the core functionality for unbricking and flashing
//! Hi3798/Hi3716 family boards via serial port, including:
//!
//! - Fastboot image parsing and extraction
//! - The bootROM frame protocol with CRC16-XMODEM checksums
//! - Chunked serial file transfer with per-frame retries
//! - Boot register table ("regbin") parsing
//! - A serial terminal for talking to the freshly booted system
//!
//! ## Supported Devices
//!
//! - Hi3798 family (type query + board information)
//! - Hi3716 family (chip-id query + auxiliary code decrypt)
//!
//! ## Example
//!
//! ```rust,no_run
//! use histbflash::{DeviceVariant, FastbootImage, Flasher, NativePort, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FastbootImage::from_file("fastboot.bin")?;
//!
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115_200))?;
//!     let mut flasher = Flasher::new(
//!         port,
//!         DeviceVariant::Hi3798,
//!         Box::new(std::io::stdout()),
//!     );
//!
//!     // Power-cycle the board when prompted; the session takes it from
//!     // the bootROM banner to a fully flashed bootloader.
//!     flasher.run(&image, |stage, sent, total| {
//!         println!("{}: {sent}/{total}", stage.name());
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chip;
pub mod error;
pub mod flasher;
pub mod image;
pub mod monitor;
pub mod port;
pub mod protocol;
pub mod regbin;

// Re-exports for convenience
pub use {
    chip::{BoardFrameResult, ChipIdResult, DeviceVariant, TypeFrameResult},
    error::{Error, Result},
    flasher::{DeviceInfo, Flasher, FlashStage},
    image::{FastbootImage, MAX_IMAGE_SIZE, MIN_IMAGE_SIZE},
    monitor::{drain_utf8_lossy, format_terminal_output, MonitorSession},
    port::{
        auto_detect_port, NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo,
        SerialConfig, DEFAULT_BAUD,
    },
    protocol::{Frame, FrameType, Transport, BLOCK_SIZE},
    regbin::{RegBin, RegBlock, RegRegion, RegRequest},
};
