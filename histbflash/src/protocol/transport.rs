//! Request/response transport with retries.
//!
//! Every exchange with the bootROM is stop-and-wait: send one frame, wait
//! for the matching response chunk, resend on silence. The transport runs
//! in one of two modes:
//!
//! - **Synchronous**: the caller's thread reads the port directly. Used
//!   for the power-on banner and any exchange before the reader starts.
//! - **Background**: a [`LinkReader`] thread owns the receive side and
//!   feeds the mailbox. Switched to exactly once, after the banner and
//!   before the handshake; the session logic above never branches on mode.
//!
//! In both modes a structurally wrong response (wrong leading marker,
//! wrong wire length) aborts the run; silence is what gets retried.

use std::collections::VecDeque;
use std::io::Write;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::Frame;
use crate::protocol::link::{Chunk, ChunkAssembler, LinkReader};

/// How often to resend and how many times, for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait this long for a response before resending.
    pub interval: Duration,
    /// Total attempts before the exchange times out.
    pub max_attempts: u32,
}

/// Exchanges that answer with a result frame (handshake, board info).
pub const RESULT_POLICY: RetryPolicy = RetryPolicy {
    interval: Duration::from_millis(200),
    max_attempts: 10,
};

/// Exchanges that answer with a bare ACK (transfer begin/end).
pub const ACK_POLICY: RetryPolicy = RetryPolicy {
    interval: Duration::from_millis(100),
    max_attempts: 10,
};

/// Bulk data blocks: one long-patience attempt, no resend.
///
/// The device stalls while committing a block; resending into the stall
/// desynchronizes the sequence numbers, so data blocks get a single
/// attempt with a generous window.
pub const BULK_DATA_POLICY: RetryPolicy = RetryPolicy {
    interval: Duration::from_millis(500),
    max_attempts: 1,
};

/// What the current exchange expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A chunk with an empty binary region.
    Ack,
    /// A result frame with this leading code and exact wire size.
    Result {
        /// Expected function code of the response frame.
        code: u8,
        /// Expected total frame size on the wire (excluding terminator).
        wire_len: usize,
    },
}

/// The serial transport: one port, one outstanding exchange at a time.
pub struct Transport<P: Port> {
    port: P,
    reader: Option<LinkReader>,
    console: Option<Box<dyn Write + Send>>,
    assembler: ChunkAssembler,
    pending: VecDeque<Chunk>,
}

impl<P: Port> Transport<P> {
    /// Wrap an open port. Diagnostic text from the device is copied to
    /// `console`.
    pub fn new(port: P, console: Box<dyn Write + Send>) -> Self {
        Self {
            port,
            reader: None,
            console: Some(console),
            assembler: ChunkAssembler::new(),
            pending: VecDeque::new(),
        }
    }

    /// Whether the background link reader has been started.
    pub fn is_background(&self) -> bool {
        self.reader
            .is_some()
    }

    /// Block until the device powers on and prints its boot banner.
    ///
    /// The bootROM announces itself with plain newline-terminated text the
    /// moment power is applied; until then the line is silent. The wait
    /// completes on the first non-empty line. Chunk terminators play no
    /// role here: the device only sends them in response to host frames.
    /// Power-on is operator-driven, so this waits without an overall
    /// deadline.
    pub fn wait_power_on(&mut self) -> Result<()> {
        debug!("waiting for power-on banner on {}", self.port.name());
        self.port
            .set_timeout(Duration::from_millis(100))?;
        let mut line: Vec<u8> = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match self
                .port
                .read(&mut buf)
            {
                Ok(0) => {}
                Ok(n) => {
                    let mut seen_banner = false;
                    for &byte in &buf[..n] {
                        if byte == b'\n' {
                            let text = std::mem::take(&mut line);
                            seen_banner |= text
                                .iter()
                                .any(|b| !b.is_ascii_whitespace());
                            self.emit_text(&text);
                            self.emit_text(b"\n");
                        } else {
                            line.push(byte);
                        }
                    }
                    if seen_banner {
                        self.emit_text(&line);
                        debug!("boot banner received");
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Hand the receive side to a background link reader.
    ///
    /// Called once, between the banner and the handshake. From here on all
    /// responses arrive through the mailbox.
    pub fn start_reader(&mut self) -> Result<()> {
        if self
            .reader
            .is_some()
        {
            return Ok(());
        }
        self.port
            .set_timeout(Duration::from_millis(100))?;
        let rx = self
            .port
            .try_clone_reader()?;
        let console = self
            .console
            .take()
            .unwrap_or_else(|| Box::new(std::io::sink()));
        self.reader = Some(LinkReader::spawn(rx, console));
        trace!("background link reader started");
        Ok(())
    }

    /// One full exchange: send `bytes`, await a response matching `expect`,
    /// resending per `policy`.
    ///
    /// Returns the result frame for [`Expect::Result`], `None` for a bare
    /// ACK. Exhausting the policy yields [`Error::Timeout`]; a structurally
    /// wrong response yields [`Error::Protocol`] and must abort the
    /// session.
    pub fn send_and_await(
        &mut self,
        bytes: &[u8],
        expect: Expect,
        policy: RetryPolicy,
    ) -> Result<Option<Frame>> {
        let mut stale_skipped = false;
        for attempt in 1..=policy.max_attempts {
            if let Some(reader) = &self.reader {
                reader
                    .mailbox()
                    .clear();
            }
            self.port
                .write_all_bytes(bytes)?;
            trace!(
                "sent {} bytes (attempt {attempt}/{})",
                bytes.len(),
                policy.max_attempts
            );

            let outcome = if self
                .reader
                .is_some()
            {
                self.await_background(expect, policy.interval, &mut stale_skipped)?
            } else {
                self.await_sync(expect, policy.interval)?
            };
            match outcome {
                Some(result) => return Ok(result),
                None => {
                    if attempt < policy.max_attempts {
                        debug!("no response, resending (attempt {attempt})");
                    }
                }
            }
        }
        Err(Error::Timeout(format!(
            "no response after {} attempts",
            policy.max_attempts
        )))
    }

    /// Stop the reader (if running) and hand back the port.
    pub fn finish(mut self) -> P {
        if let Some(reader) = self
            .reader
            .take()
        {
            reader.stop();
        }
        self.port
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.port
            .name()
    }

    // Outer Option: did a qualifying response arrive within the window.
    // A structurally wrong frame is fatal; the one allowance is a single
    // straggler from the immediately preceding exchange, tracked in
    // `stale_skipped` across the whole exchange.
    fn await_background(
        &mut self,
        expect: Expect,
        window: Duration,
        stale_skipped: &mut bool,
    ) -> Result<Option<Option<Frame>>> {
        let mailbox = match &self.reader {
            Some(reader) => reader
                .mailbox()
                .clone(),
            None => return Ok(None),
        };
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match mailbox.recv_timeout(remaining)? {
                None => return Ok(None),
                Some(delivery) => match (expect, delivery) {
                    (Expect::Ack, None) => return Ok(Some(None)),
                    (Expect::Result { code, wire_len }, Some(frame))
                        if frame.code == code && frame.wire_len() == wire_len =>
                    {
                        return Ok(Some(Some(frame)));
                    }
                    (Expect::Result { .. }, None) => {
                        // Bare ACK where a result was expected: let the
                        // retry engine ask again.
                        return Ok(None);
                    }
                    (_, Some(frame)) => {
                        if *stale_skipped {
                            return Err(Error::Protocol(format!(
                                "unexpected result frame (code {:#04x}, {} bytes)",
                                frame.code,
                                frame.wire_len()
                            )));
                        }
                        *stale_skipped = true;
                        warn!(
                            "skipping stale response frame (code {:#04x})",
                            frame.code
                        );
                    }
                },
            }
        }
    }

    fn await_sync(&mut self, expect: Expect, window: Duration) -> Result<Option<Option<Frame>>> {
        let chunk = match self.read_chunk_sync(window)? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        self.emit_text(&chunk.text);
        match expect {
            Expect::Ack => {
                if chunk
                    .binary
                    .is_empty()
                {
                    Ok(Some(None))
                } else {
                    Err(Error::Protocol(format!(
                        "expected bare acknowledgement, got {} result bytes",
                        chunk
                            .binary
                            .len()
                    )))
                }
            }
            Expect::Result { code, wire_len } => {
                let binary = &chunk.binary;
                if binary.is_empty() {
                    // Bare ACK where a result was expected: let the retry
                    // engine ask again.
                    return Ok(None);
                }
                if binary[0] != code {
                    return Err(Error::Protocol(format!(
                        "unexpected result code {:#04x}, expected {code:#04x}",
                        binary[0]
                    )));
                }
                if binary.len() != wire_len {
                    return Err(Error::Protocol(format!(
                        "result frame is {} bytes, expected {wire_len}",
                        binary.len()
                    )));
                }
                match Frame::decode(binary) {
                    Ok(Some(frame)) => Ok(Some(Some(frame))),
                    Ok(None) => unreachable!("non-empty binary region"),
                    // Early exchanges run before any retry-tolerant state
                    // exists; a corrupt result here means the link itself
                    // is unreliable.
                    Err(err) => Err(Error::Protocol(format!("corrupt result frame: {err}"))),
                }
            }
        }
    }

    fn read_chunk_sync(&mut self, window: Duration) -> Result<Option<Chunk>> {
        if let Some(chunk) = self
            .pending
            .pop_front()
        {
            return Ok(Some(chunk));
        }
        let deadline = Instant::now() + window;
        let mut buf = [0u8; 256];
        loop {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self
                .port
                .read(&mut buf)
            {
                Ok(0) => {}
                Ok(n) => {
                    // One read may complete several chunks; everything
                    // after the first is queued for the next call.
                    let mut first = None;
                    for &byte in &buf[..n] {
                        if let Some(chunk) = self
                            .assembler
                            .push(byte)
                        {
                            if first.is_none() {
                                first = Some(chunk);
                            } else {
                                self.pending
                                    .push_back(chunk);
                            }
                        }
                    }
                    if let Some(chunk) = first {
                        return Ok(Some(chunk));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn emit_text(&mut self, text: &[u8]) {
        if text.is_empty() {
            return;
        }
        if let Some(console) = &mut self.console {
            let _ = console.write_all(text);
            let _ = console.flush();
        }
    }
}
