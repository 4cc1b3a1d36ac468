//! Boot register table ("regbin") parser.
//!
//! A regbin file describes the register writes the boot code performs
//! before RAM is usable. The layout is nested and big-endian:
//!
//! - [`RegBin`]: three NUL-terminated header strings, then regions
//! - [`RegRegion`]: u16 tag, u16 payload length, then blocks
//! - [`RegBlock`]: u32 base address, u8 payload length, then requests
//! - [`RegRequest`]: 3 fixed bytes with packed bit fields, then a
//!   variable-length value and delay
//!
//! Request encoding: byte 0 is the register offset; byte 1 packs the value
//! length (top 3 bits) and start bit (low 5 bits); byte 2 packs the delay
//! length (top 3 bits) and the bit count minus one (low 5 bits).

use std::fmt;

use crate::error::{Error, Result};

/// A single register write request.
///
/// Writes `value` into a bit range of one register: `write_bits_cnt + 1`
/// bits starting at `start_bit`, then waits `delay` units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegRequest {
    /// Register offset from the block base address.
    pub offset: u8,
    /// Value to write (big-endian on the wire, up to 7 bytes).
    pub value: u64,
    /// Encoded size of the value in bytes.
    pub value_len: u8,
    /// Post-write delay (big-endian on the wire, up to 7 bytes).
    pub delay: u64,
    /// Encoded size of the delay in bytes.
    pub delay_len: u8,
    /// First bit of the write, 31 at maximum.
    pub start_bit: u8,
    /// Number of bits written, minus one.
    pub write_bits_cnt: u8,
}

impl RegRequest {
    /// Size of this request in its encoded form.
    pub fn encoded_len(&self) -> usize {
        3 + self.value_len as usize + self.delay_len as usize
    }

    /// Parse one request from the start of `s`; trailing bytes belong to
    /// the next request and are ignored.
    pub fn from_bytes(s: &[u8]) -> Result<Self> {
        if s.len() < 3 {
            return Err(Error::InvalidRegbin(format!(
                "register request truncated: {} bytes",
                s.len()
            )));
        }
        let offset = s[0];
        let start_bit = s[1] & 0x1F;
        let value_len = (s[1] >> 5) & 0x07;
        let write_bits_cnt = s[2] & 0x1F;
        let delay_len = (s[2] >> 5) & 0x07;

        let dyn_len = value_len as usize + delay_len as usize;
        let dyn_part = s
            .get(3..3 + dyn_len)
            .ok_or_else(|| {
                Error::InvalidRegbin(format!(
                    "register request needs {dyn_len} dynamic bytes, {} available",
                    s.len() - 3
                ))
            })?;
        let (value_bytes, delay_bytes) = dyn_part.split_at(value_len as usize);

        Ok(Self {
            offset,
            value: be_uint(value_bytes),
            value_len,
            delay: be_uint(delay_bytes),
            delay_len,
            start_bit,
            write_bits_cnt,
        })
    }
}

/// A block of requests sharing one base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegBlock {
    /// Base address all contained requests offset from.
    pub addr_base: u32,
    /// Encoded size of the request list in bytes.
    pub payload_len: u8,
    /// The requests, in order.
    pub requests: Vec<RegRequest>,
}

impl RegBlock {
    /// Size of this block in its encoded form.
    pub fn encoded_len(&self) -> usize {
        self.payload_len as usize + 5
    }

    /// Parse one block from the start of `s`.
    pub fn from_bytes(s: &[u8]) -> Result<Self> {
        if s.len() < 5 {
            return Err(Error::InvalidRegbin(format!(
                "register block truncated: {} bytes",
                s.len()
            )));
        }
        let addr_base = u32::from_be_bytes([s[0], s[1], s[2], s[3]]);
        let payload_len = s[4];
        let payload = s
            .get(5..5 + payload_len as usize)
            .ok_or_else(|| {
                Error::InvalidRegbin(format!(
                    "register block payload of {payload_len} bytes exceeds input"
                ))
            })?;

        let mut requests = Vec::new();
        let mut pos = 0;
        while pos < payload.len() {
            let request = RegRequest::from_bytes(&payload[pos..])?;
            pos += request.encoded_len();
            requests.push(request);
        }

        Ok(Self {
            addr_base,
            payload_len,
            requests,
        })
    }
}

/// A region: a tagged collection of blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegRegion {
    /// Region tag. Meaning unknown; observed values 0x0E and 0x0F.
    pub tag: u16,
    /// Encoded size of the block list in bytes.
    pub payload_len: u16,
    /// The blocks, in order.
    pub blocks: Vec<RegBlock>,
}

impl RegRegion {
    /// Size of this region in its encoded form.
    pub fn encoded_len(&self) -> usize {
        self.payload_len as usize + 4
    }

    /// Parse one region from the start of `s`.
    pub fn from_bytes(s: &[u8]) -> Result<Self> {
        if s.len() < 4 {
            return Err(Error::InvalidRegbin(format!(
                "region truncated: {} bytes",
                s.len()
            )));
        }
        let tag = u16::from_be_bytes([s[0], s[1]]);
        let payload_len = u16::from_be_bytes([s[2], s[3]]);
        let payload = s
            .get(4..4 + payload_len as usize)
            .ok_or_else(|| {
                Error::InvalidRegbin(format!(
                    "region payload of {payload_len} bytes exceeds input"
                ))
            })?;

        let mut blocks = Vec::new();
        let mut pos = 0;
        while pos < payload.len() {
            let block = RegBlock::from_bytes(&payload[pos..])?;
            pos += block.encoded_len();
            blocks.push(block);
        }

        Ok(Self {
            tag,
            payload_len,
            blocks,
        })
    }
}

/// A parsed regbin file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegBin {
    /// Version string from the header.
    pub version: String,
    /// Build timestamp string from the header.
    pub build_time: String,
    /// Board type string from the header.
    pub board_type: String,
    /// The regions, in order.
    pub regions: Vec<RegRegion>,
}

impl RegBin {
    /// Parse a whole regbin file.
    pub fn from_bytes(s: &[u8]) -> Result<Self> {
        let (version, s) = take_cstr(s)?;
        let (build_time, s) = take_cstr(s)?;
        let (board_type, s) = take_cstr(s)?;
        // One padding NUL follows the header strings.
        let s = s
            .get(1..)
            .ok_or_else(|| Error::InvalidRegbin("missing header padding".into()))?;

        let mut regions = Vec::new();
        let mut pos = 0;
        // A zero in the tag's low byte marks the end of the region list.
        while s
            .get(pos + 1)
            .is_some_and(|&b| b != 0)
        {
            let region = RegRegion::from_bytes(&s[pos..])?;
            pos += region.encoded_len();
            regions.push(region);
        }

        Ok(Self {
            version,
            build_time,
            board_type,
            regions,
        })
    }
}

impl fmt::Display for RegBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version: {}", self.version)?;
        writeln!(f, "build time: {}", self.build_time)?;
        writeln!(f, "board type: {}", self.board_type)?;
        for region in &self.regions {
            writeln!(
                f,
                "region tag {:#06x} ({} blocks):",
                region.tag,
                region
                    .blocks
                    .len()
            )?;
            for block in &region.blocks {
                writeln!(
                    f,
                    "  block base {:#010x} ({} requests):",
                    block.addr_base,
                    block
                        .requests
                        .len()
                )?;
                for request in &block.requests {
                    writeln!(
                        f,
                        "    +{:#04x} <- {:#x} (bits {}..={}, delay {})",
                        request.offset,
                        request.value,
                        request.start_bit,
                        request.start_bit + request.write_bits_cnt,
                        request.delay
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn take_cstr(s: &[u8]) -> Result<(String, &[u8])> {
    let nul = s
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::InvalidRegbin("unterminated header string".into()))?;
    let text = String::from_utf8_lossy(&s[..nul]).into_owned();
    Ok((text, &s[nul + 1..]))
}
