//! bootROM serial protocol implementation.
//!
//! Layered bottom-up:
//!
//! - [`crc`]: CRC-16/XMODEM frame checksum
//! - [`frame`]: frame codec (code, sequence transform, payload, CRC)
//! - [`link`]: chunk splitting, mailbox, background link reader
//! - [`transport`]: stop-and-wait exchanges with retry policies
//! - [`transfer`]: chunked file transfer (head / data / tail)

pub mod crc;
pub mod frame;
pub mod link;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use crc::crc16_xmodem;
pub use frame::{Frame, FrameType};
pub use link::{Chunk, LinkReader, Mailbox};
pub use transfer::{send_file, BLOCK_SIZE};
pub use transport::{Expect, RetryPolicy, Transport, ACK_POLICY, BULK_DATA_POLICY, RESULT_POLICY};
