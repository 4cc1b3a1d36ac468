//! Link-level framing: chunk assembly, the single-slot mailbox, and the
//! background link reader.
//!
//! The bootROM interleaves human-readable diagnostic text with binary
//! result frames on the same serial stream. Each chunk ends with a
//! terminator byte; within a chunk, everything before the first byte
//! `>= 0x80` is diagnostic text and everything from that byte up to the
//! terminator is the binary result region. The switch from text to binary
//! is one-way per chunk.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::frame::Frame;

/// End-of-chunk terminator (device-side ACK).
pub const TERM_ACK: u8 = 0xAA;

/// Terminator the device reserves for "CRC failure observed".
///
/// Not treated as a terminator here: the device-side semantics are
/// unconfirmed, so it is left as an unsupported NAK signal rather than
/// guessed at. A chunk carrying it will simply fail validation and be
/// resent by the retry engine.
pub const TERM_NAK: u8 = 0x55;

/// First byte value that opens the binary result region of a chunk.
pub const BINARY_START: u8 = 0x80;

/// One terminator-delimited chunk, split into its two regions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Diagnostic text bytes (values below 0x80, before the binary region).
    pub text: Vec<u8>,
    /// Binary result region, possibly empty (a bare ACK).
    pub binary: Vec<u8>,
}

/// Stateful byte-at-a-time splitter for the serial stream.
///
/// Bytes may arrive in arbitrary read sizes; the assembler carries the
/// text/binary mode across reads and emits a [`Chunk`] whenever the
/// terminator is seen.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    chunk: Chunk,
    in_binary: bool,
}

impl ChunkAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a completed chunk on the terminator.
    pub fn push(&mut self, byte: u8) -> Option<Chunk> {
        if byte == TERM_ACK {
            self.in_binary = false;
            return Some(std::mem::take(&mut self.chunk));
        }
        if self.in_binary || byte >= BINARY_START {
            self.in_binary = true;
            self.chunk.binary.push(byte);
        } else {
            self.chunk.text.push(byte);
        }
        None
    }

    /// Take whatever text has accumulated in the unterminated chunk.
    pub fn take_pending_text(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.chunk.text)
    }
}

/// One delivery from the link reader: a decoded result frame, or `None`
/// for a chunk whose binary region was empty (a bare ACK).
pub type Delivery = Option<Frame>;

#[derive(Debug, Default)]
struct MailboxState {
    slot: Option<Delivery>,
    violated: bool,
    closed: bool,
}

/// Single-slot handoff between the link reader and the command issuer.
///
/// The protocol allows at most one outstanding expected response, so the
/// mailbox holds at most one delivery. A deposit while the slot is still
/// occupied is a protocol-ordering violation, not a queueing opportunity;
/// it poisons the mailbox and surfaces as [`Error::Protocol`] on the next
/// receive.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    inner: Arc<(Mutex<MailboxState>, Condvar)>,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit a delivery and raise the availability signal.
    pub fn deposit(&self, delivery: Delivery) {
        let (state, ready) = &*self.inner;
        let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.slot.is_some() {
            warn!("frame arrived while previous result is unconsumed");
            guard.violated = true;
        } else {
            guard.slot = Some(delivery);
        }
        ready.notify_all();
    }

    /// Block up to `timeout` for a delivery.
    ///
    /// Returns `Ok(None)` on timeout, `Ok(Some(delivery))` when one is
    /// available, and an error once the ordering invariant has been broken
    /// or the reader has stopped.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>> {
        let (state, ready) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if guard.violated {
                return Err(Error::Protocol(
                    "out-of-turn frame: previous result not yet consumed".into(),
                ));
            }
            if let Some(delivery) = guard.slot.take() {
                return Ok(Some(delivery));
            }
            if guard.closed {
                return Err(Error::Protocol("link reader stopped".into()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (next, timed_out) = ready
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard = next;
            if timed_out.timed_out() && guard.slot.is_none() && !guard.violated {
                return Ok(None);
            }
        }
    }

    /// Drop a stale unconsumed delivery, if any (clear-before-waiting).
    pub fn clear(&self) {
        let (state, _) = &*self.inner;
        let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.slot.take().is_some() {
            trace!("discarded stale delivery before new exchange");
        }
    }

    fn close(&self) {
        let (state, ready) = &*self.inner;
        let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.closed = true;
        ready.notify_all();
    }
}

/// Process one completed chunk: surface its diagnostic text, decode the
/// binary region, and hand a delivery to `sink`.
///
/// Codec failures are logged and dropped; from the retry engine's point of
/// view a corrupt response is no qualifying response, and the request is
/// resent.
fn dispatch_chunk(chunk: Chunk, console: &mut dyn Write, sink: impl FnOnce(Delivery)) {
    if !chunk.text.is_empty() {
        let _ = console.write_all(&chunk.text);
        let _ = console.flush();
    }
    match Frame::decode(&chunk.binary) {
        Ok(delivery) => sink(delivery),
        Err(err) => warn!("dropping corrupt result frame: {err}"),
    }
}

/// Background link reader.
///
/// A dedicated thread continuously drains the serial stream, splits it
/// into chunks, surfaces diagnostic text, and deposits decoded results
/// into the mailbox. Used once bulk transfer-style exchanges begin; the
/// command-issuing side only writes and waits on the mailbox.
pub struct LinkReader {
    mailbox: Mailbox,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LinkReader {
    /// Spawn the reader over an independent read handle of the port.
    ///
    /// The read handle must use a short timeout so the thread can observe
    /// the stop flag.
    pub fn spawn(mut rx: Box<dyn Read + Send>, mut console: Box<dyn Write + Send>) -> Self {
        let mailbox = Mailbox::new();
        let running = Arc::new(AtomicBool::new(true));
        let thread_mailbox = mailbox.clone();
        let thread_running = Arc::clone(&running);

        let handle = std::thread::spawn(move || {
            let mut assembler = ChunkAssembler::new();
            let mut buf = [0u8; 256];
            while thread_running.load(Ordering::Relaxed) {
                match rx.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        for &byte in &buf[..n] {
                            if let Some(chunk) = assembler.push(byte) {
                                dispatch_chunk(chunk, console.as_mut(), |d| {
                                    thread_mailbox.deposit(d);
                                });
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        debug!("link reader read error, stopping: {e}");
                        break;
                    }
                }
            }
            // Trailing unterminated text still reaches the operator.
            let pending = assembler.take_pending_text();
            if !pending.is_empty() {
                let _ = console.write_all(&pending);
                let _ = console.flush();
            }
            thread_mailbox.close();
        });

        Self {
            mailbox,
            running,
            handle: Some(handle),
        }
    }

    /// The mailbox fed by this reader.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Stop the reader thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LinkReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
