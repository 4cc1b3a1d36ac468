//! Scripted in-memory port for protocol unit tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;
type IdleScript = Box<dyn FnMut() -> Vec<u8> + Send>;

struct State {
    rx: VecDeque<u8>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    responder: Responder,
    idle: Option<IdleScript>,
}

/// A fake serial port driven by closures.
///
/// Each write is logged and passed to the responder, whose output is
/// queued as the device's reply. An optional idle script injects bytes
/// when a read finds the queue empty (device talking unprompted, e.g.
/// the power-on banner).
pub(crate) struct MockPort {
    state: Arc<Mutex<State>>,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new(responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                rx: VecDeque::new(),
                writes: Arc::new(Mutex::new(Vec::new())),
                responder: Box::new(responder),
                idle: None,
            })),
            timeout: Duration::from_millis(100),
        }
    }

    pub(crate) fn with_idle_script(
        responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
        idle: impl FnMut() -> Vec<u8> + Send + 'static,
    ) -> Self {
        let port = Self::new(responder);
        port.state
            .lock()
            .unwrap()
            .idle = Some(Box::new(idle));
        port
    }

    /// Handle to the log of every write made through the port.
    pub(crate) fn write_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.state
            .lock()
            .unwrap()
            .writes
            .clone()
    }
}

fn read_shared(state: &Arc<Mutex<State>>, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut guard = state
        .lock()
        .unwrap();
    if guard
        .rx
        .is_empty()
    {
        if let Some(idle) = &mut guard.idle {
            let bytes = idle();
            guard
                .rx
                .extend(bytes);
        }
    }
    if guard
        .rx
        .is_empty()
    {
        drop(guard);
        // Keep polling loops honest without burning CPU.
        std::thread::sleep(Duration::from_millis(2));
        return Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "no data",
        ));
    }
    let n = buf
        .len()
        .min(
            guard
                .rx
                .len(),
        );
    for slot in &mut buf[..n] {
        *slot = guard
            .rx
            .pop_front()
            .unwrap();
    }
    Ok(n)
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        read_shared(&self.state, buf)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self
            .state
            .lock()
            .unwrap();
        guard
            .writes
            .lock()
            .unwrap()
            .push(buf.to_vec());
        let reply = (guard.responder)(buf);
        guard
            .rx
            .extend(reply);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct MockReader {
    state: Arc<Mutex<State>>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        read_shared(&self.state, buf)
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .rx
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(MockReader {
            state: self
                .state
                .clone(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
