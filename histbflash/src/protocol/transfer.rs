//! Chunked file transfer to the bootROM.
//!
//! A transfer is begin / data / end: a head frame announcing length and
//! device load offset, one data frame per 1 KiB block, and a tail frame.
//! The head frame carries sequence number 0; each data frame and the tail
//! increment it modulo 256. Data is zero-padded to a whole number of
//! blocks before transmission.

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info};

use crate::error::Result;
use crate::port::Port;
use crate::protocol::frame::{Frame, FrameType};
use crate::protocol::transport::{Expect, Transport, ACK_POLICY, BULK_DATA_POLICY};

/// Transfer block size in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Zero-pad `data` to a whole number of blocks.
pub fn pad_to_block(data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    let rem = padded.len() % BLOCK_SIZE;
    if rem != 0 {
        padded.resize(padded.len() + BLOCK_SIZE - rem, 0);
    }
    padded
}

/// Build the head frame payload: marker, total length, device offset.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
fn head_payload(total_len: u32, offset: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(9);
    payload.push(0x01);
    payload
        .write_u32::<BigEndian>(total_len)
        .unwrap();
    payload
        .write_u32::<BigEndian>(offset)
        .unwrap();
    payload
}

/// Send `data` to the device, to be loaded at `offset`.
///
/// `progress` is called after every acknowledged block with
/// `(bytes_sent, bytes_total)` over the padded length. Stop-and-wait:
/// each frame must be acknowledged before the next is sent.
pub fn send_file<P: Port>(
    transport: &mut Transport<P>,
    data: &[u8],
    offset: u32,
    mut progress: impl FnMut(usize, usize),
) -> Result<()> {
    let padded = pad_to_block(data);
    let total = padded.len();
    info!(
        "sending {} bytes ({} blocks) to {offset:#x}",
        total,
        total / BLOCK_SIZE
    );

    let head = Frame::new(FrameType::HeadFrame, 0, head_payload(total as u32, offset));
    transport.send_and_await(&head.encode(), Expect::Ack, ACK_POLICY)?;

    for (index, block) in padded
        .chunks(BLOCK_SIZE)
        .enumerate()
    {
        let seq = ((index + 1) % 256) as u8;
        let frame = Frame::new(FrameType::DataFrame, seq, block);
        transport.send_and_await(&frame.encode(), Expect::Ack, BULK_DATA_POLICY)?;
        progress((index + 1) * BLOCK_SIZE, total);
    }

    let tail_seq = ((total / BLOCK_SIZE + 1) % 256) as u8;
    let tail = Frame::new(FrameType::TailFrame, tail_seq, vec![]);
    transport.send_and_await(&tail.encode(), Expect::Ack, ACK_POLICY)?;
    debug!("transfer to {offset:#x} complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::link::TERM_ACK;
    use crate::protocol::testing::MockPort;

    #[test]
    fn test_pad_to_block() {
        assert_eq!(
            pad_to_block(&[0xAB; 1025]).len(),
            2048
        );
        assert_eq!(pad_to_block(&[0xAB; 1024]).len(), 1024);
        assert_eq!(pad_to_block(&[]).len(), 0);
        let padded = pad_to_block(&[0xAB; 3]);
        assert_eq!(padded.len(), 1024);
        assert_eq!(&padded[..3], &[0xAB; 3]);
        assert!(padded[3..]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_head_payload_layout() {
        let payload = head_payload(0x0001_0000, 0x8000);
        assert_eq!(
            payload,
            vec![0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00]
        );
    }

    #[test]
    fn test_send_file_frame_sequence() {
        let port = MockPort::new(|_| vec![TERM_ACK]);
        let writes = port.write_log();
        let mut transport = Transport::new(port, Box::new(std::io::sink()));

        let mut reported = Vec::new();
        send_file(&mut transport, &[0x5A; 1500], 0x6000, |sent, total| {
            reported.push((sent, total));
        })
        .expect("transfer succeeds");

        let log = writes
            .lock()
            .unwrap();
        // head + 2 data blocks + tail
        assert_eq!(log.len(), 4);
        assert_eq!(log[0][0], 0xFE);
        assert_eq!(log[1][0], 0xDA);
        assert_eq!(log[2][0], 0xDA);
        assert_eq!(log[3][0], 0xED);

        // head: marker, padded length 2048, offset 0x6000
        assert_eq!(
            &log[0][3..12],
            &[0x01, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x60, 0x00]
        );

        // sequence transform: head seq 0, data seq 1 and 2, tail seq 3
        assert_eq!(&log[0][1..3], &[0x00, 0xFF]);
        assert_eq!(&log[1][1..3], &[0x01, 0xFE]);
        assert_eq!(&log[2][1..3], &[0x02, 0xFD]);
        assert_eq!(&log[3][1..3], &[0x03, 0xFC]);

        // data payloads are exactly one block, second one padded
        assert_eq!(log[1].len(), 1024 + 5);
        assert_eq!(log[2].len(), 1024 + 5);
        assert!(log[2][3 + (1500 - 1024)..3 + 1024]
            .iter()
            .all(|&b| b == 0));

        assert_eq!(reported, vec![(1024, 2048), (2048, 2048)]);
    }

    #[test]
    fn test_data_seq_wraps_mod_256() {
        // 300 blocks exercises the wraparound.
        let port = MockPort::new(|_| vec![TERM_ACK]);
        let writes = port.write_log();
        let mut transport = Transport::new(port, Box::new(std::io::sink()));
        send_file(&mut transport, &vec![0u8; 300 * 1024], 0, |_, _| {})
            .expect("transfer succeeds");
        let log = writes
            .lock()
            .unwrap();
        // block 255 carries logical seq (255 + 1) % 256 == 0
        let frame_255 = &log[1 + 255];
        assert_eq!(&frame_255[1..3], &[0x00, 0xFF]);
        // tail seq is (300 + 1) % 256 == 45
        let tail = log
            .last()
            .unwrap();
        assert_eq!(tail[0], 0xED);
        assert_eq!(u16::from_be_bytes([tail[1], tail[2]]), 46 * 255);
    }
}
