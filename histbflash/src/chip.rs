//! Device variants and their discovery exchanges.
//!
//! Two bootROM families are supported. They share the frame codec and the
//! transfer protocol but differ in how the host identifies the device and
//! in what must happen after the auxiliary code is loaded:
//!
//! - **Hi3798**: answers a type/capability query and a board information
//!   query.
//! - **Hi3716**: answers a chip-id query and requires an explicit decrypt
//!   request for the auxiliary code.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::protocol::frame::{Frame, FrameType};

/// Payload of the type/capability query.
const TYPE_QUERY_PAYLOAD: [u8; 9] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];

/// Payload of the board information query. The repeated magic word is
/// checked by the device.
const BOARD_QUERY_PAYLOAD: [u8; 9] = [0x01, 0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78];

/// Payload of the chip-id query (Hi3716 family).
const CHIP_ID_QUERY_PAYLOAD: [u8; 8] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Payload of the auxiliary-code decrypt request (Hi3716 family). The
/// device treats the body as opaque; only the function code matters.
const DECRYPT_REQUEST_PAYLOAD: [u8; 1] = [0x01];

/// Wire size of the type query response (excluding terminator).
pub const TYPE_RESULT_WIRE_LEN: usize = 14;
/// Wire size of the board information response.
pub const BOARD_RESULT_WIRE_LEN: usize = 10;
/// Wire size of the chip-id response.
pub const CHIP_ID_RESULT_WIRE_LEN: usize = 13;
/// Wire size of the decrypt response.
pub const DECRYPT_RESULT_WIRE_LEN: usize = 8;

/// Supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceVariant {
    /// Hi3798 family (type query + board information).
    Hi3798,
    /// Hi3716 family (chip-id query + auxiliary code decrypt).
    Hi3716,
}

impl DeviceVariant {
    /// Canonical name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hi3798 => "hi3798",
            Self::Hi3716 => "hi3716",
        }
    }

    /// All supported variants.
    pub fn all() -> &'static [DeviceVariant] {
        &[Self::Hi3798, Self::Hi3716]
    }

    /// Whether this variant answers the board information query.
    pub fn supports_board_info(&self) -> bool {
        matches!(self, Self::Hi3798)
    }

    /// Whether the auxiliary code must be decrypted after loading.
    pub fn needs_decrypt(&self) -> bool {
        matches!(self, Self::Hi3716)
    }

    /// The handshake query frame for this variant, encoded.
    pub fn handshake_query(&self) -> Vec<u8> {
        match self {
            Self::Hi3798 => Frame::new(FrameType::TypeFrame, 0, TYPE_QUERY_PAYLOAD).encode(),
            Self::Hi3716 => Frame::new(FrameType::TypeFrame, 0, CHIP_ID_QUERY_PAYLOAD).encode(),
        }
    }

    /// Expected wire size of the handshake response.
    pub fn handshake_result_len(&self) -> usize {
        match self {
            Self::Hi3798 => TYPE_RESULT_WIRE_LEN,
            Self::Hi3716 => CHIP_ID_RESULT_WIRE_LEN,
        }
    }
}

impl fmt::Display for DeviceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "hi3798" | "hi3798mv200" | "hi3798cv200" => Ok(Self::Hi3798),
            "hi3716" | "hi3716mv410" | "hi3716mv420" => Ok(Self::Hi3716),
            other => Err(Error::Config(format!(
                "unknown device variant '{other}' (supported: hi3798, hi3716)"
            ))),
        }
    }
}

/// Encoded board information query frame.
pub fn board_info_query() -> Vec<u8> {
    Frame::new(FrameType::BoardFrame, 0, BOARD_QUERY_PAYLOAD).encode()
}

/// Encoded auxiliary-code decrypt request frame.
pub fn decrypt_request() -> Vec<u8> {
    Frame::new(FrameType::DecryptFrame, 0, DECRYPT_REQUEST_PAYLOAD).encode()
}

/// Parsed type/capability response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFrameResult {
    /// Secure-boot (CA) part.
    pub ca: bool,
    /// TEE support.
    pub tee: bool,
    /// Multi-form factor part.
    pub multiform: bool,
    /// bootROM version word.
    pub boot_version: u32,
    /// System / chip identification word.
    pub system_id: u32,
}

impl TypeFrameResult {
    /// Parse the payload of a type response frame.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload;
        if payload.len() != 9 {
            return Err(Error::Protocol(format!(
                "type result payload is {} bytes, expected 9",
                payload.len()
            )));
        }
        let flags = payload[0];
        Ok(Self {
            ca: flags & 0x01 != 0,
            tee: flags & 0x02 != 0,
            multiform: flags & 0x04 != 0,
            boot_version: u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]),
            system_id: u32::from_be_bytes([payload[5], payload[6], payload[7], payload[8]]),
        })
    }
}

impl fmt::Display for TypeFrameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "boot {:#010x}, system {:#010x}, ca={} tee={} multiform={}",
            self.boot_version, self.system_id, self.ca, self.tee, self.multiform
        )
    }
}

/// Parsed board information response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardFrameResult {
    /// Board status word.
    pub status: u32,
}

impl BoardFrameResult {
    /// Parse the payload of a board information response frame.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload;
        if payload.len() != 5 {
            return Err(Error::Protocol(format!(
                "board result payload is {} bytes, expected 5",
                payload.len()
            )));
        }
        Ok(Self {
            status: u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]),
        })
    }
}

/// Parsed chip-id response (Hi3716 family).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipIdResult {
    /// Raw 64-bit chip identifier.
    pub chip_id: u64,
}

impl ChipIdResult {
    /// Parse the payload of a chip-id response frame.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload;
        if payload.len() != 8 {
            return Err(Error::Protocol(format!(
                "chip-id result payload is {} bytes, expected 8",
                payload.len()
            )));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(payload);
        Ok(Self {
            chip_id: u64::from_be_bytes(bytes),
        })
    }
}

/// Whether a decrypt response frame reports success.
pub fn decrypt_succeeded(frame: &Frame) -> bool {
    frame
        .payload
        .first()
        .is_some_and(|&b| b == 0x01)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_query_known_bytes() {
        // Captured from a live Hi3798 exchange.
        assert_eq!(
            DeviceVariant::Hi3798.handshake_query(),
            vec![
                0xBD, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x70, 0x5E
            ]
        );
    }

    #[test]
    fn test_board_query_known_bytes() {
        assert_eq!(
            board_info_query(),
            vec![
                0xCE, 0x00, 0xFF, 0x01, 0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78, 0x9D, 0xFB
            ]
        );
    }

    #[test]
    fn test_handshake_result_lengths() {
        assert_eq!(DeviceVariant::Hi3798.handshake_result_len(), 14);
        assert_eq!(DeviceVariant::Hi3716.handshake_result_len(), 13);
        // Queries themselves are well-formed frames.
        assert_eq!(
            DeviceVariant::Hi3716
                .handshake_query()
                .len(),
            13
        );
        assert_eq!(decrypt_request().len(), 6);
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!(
            "hi3798"
                .parse::<DeviceVariant>()
                .unwrap(),
            DeviceVariant::Hi3798
        );
        assert_eq!(
            "HI3716MV410"
                .parse::<DeviceVariant>()
                .unwrap(),
            DeviceVariant::Hi3716
        );
        assert!("hi9999"
            .parse::<DeviceVariant>()
            .is_err());
    }

    #[test]
    fn test_variant_capabilities() {
        assert!(DeviceVariant::Hi3798.supports_board_info());
        assert!(!DeviceVariant::Hi3798.needs_decrypt());
        assert!(!DeviceVariant::Hi3716.supports_board_info());
        assert!(DeviceVariant::Hi3716.needs_decrypt());
    }

    #[test]
    fn test_type_result_parse() {
        let frame = Frame::new(
            FrameType::TypeFrame,
            0,
            vec![0x03, 0x00, 0x01, 0x00, 0x02, 0x37, 0x98, 0x01, 0x00],
        );
        let result = TypeFrameResult::parse(&frame).expect("valid payload");
        assert!(result.ca);
        assert!(result.tee);
        assert!(!result.multiform);
        assert_eq!(result.boot_version, 0x0001_0002);
        assert_eq!(result.system_id, 0x3798_0100);
    }

    #[test]
    fn test_board_result_parse() {
        let frame = Frame::new(FrameType::BoardFrame, 0, vec![0x01, 0x00, 0x00, 0x00, 0x2A]);
        let result = BoardFrameResult::parse(&frame).expect("valid payload");
        assert_eq!(result.status, 42);
    }

    #[test]
    fn test_chip_id_result_parse() {
        let frame = Frame::new(
            FrameType::TypeFrame,
            0,
            vec![0x37, 0x16, 0x00, 0x00, 0x00, 0x00, 0x04, 0x10],
        );
        let result = ChipIdResult::parse(&frame).expect("valid payload");
        assert_eq!(result.chip_id, 0x3716_0000_0000_0410);
    }

    #[test]
    fn test_wrong_payload_length_rejected() {
        let frame = Frame::new(FrameType::TypeFrame, 0, vec![0x00; 4]);
        assert!(TypeFrameResult::parse(&frame).is_err());
        assert!(BoardFrameResult::parse(&frame).is_err());
        assert!(ChipIdResult::parse(&frame).is_err());
    }

    #[test]
    fn test_decrypt_success_marker() {
        let ok = Frame::new(FrameType::DecryptFrame, 0, vec![0x01, 0x00, 0x00]);
        let bad = Frame::new(FrameType::DecryptFrame, 0, vec![0x00, 0x00, 0x00]);
        let empty = Frame::new(FrameType::DecryptFrame, 0, vec![]);
        assert!(decrypt_succeeded(&ok));
        assert!(!decrypt_succeeded(&bad));
        assert!(!decrypt_succeeded(&empty));
    }
}
