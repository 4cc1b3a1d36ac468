//! Serial terminal command implementation.
//!
//! Reader thread: serial → stdout. Main thread: keyboard (crossterm raw
//! mode) → serial. Ctrl+] exits; everything else, including Ctrl+C, is
//! forwarded to the device.

use anyhow::{Context, Result};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use histbflash::{drain_utf8_lossy, format_terminal_output, MonitorSession};
use std::io::{self, Read as _, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Open a terminal session on a fresh port.
pub(crate) fn cmd_monitor(port_name: &str, baud: u32) -> Result<()> {
    eprintln!(
        "{} Opening terminal on {} at {baud} baud",
        style("•").cyan(),
        style(port_name).green()
    );
    let session = MonitorSession::open(port_name, baud)
        .with_context(|| format!("failed to open port {port_name}"))?;
    run_terminal(session)
}

// Restores cooked mode even when the terminal loop errors out.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Run the interactive terminal over an open session.
pub(crate) fn run_terminal(mut session: MonitorSession) -> Result<()> {
    eprintln!("{}", style("Press Ctrl+] to exit").dim());

    let mut reader = session
        .try_clone_reader()
        .context("failed to clone serial reader")?;

    let running = Arc::new(AtomicBool::new(true));
    let reader_running = Arc::clone(&running);

    let reader_thread = std::thread::spawn(move || {
        let mut raw = [0u8; 1024];
        let mut pending = Vec::new();
        let mut at_line_start = true;
        while reader_running.load(Ordering::Relaxed) {
            match reader.read(&mut raw) {
                Ok(0) => {}
                Ok(n) => {
                    pending.extend_from_slice(&raw[..n]);
                    let text = drain_utf8_lossy(&mut pending);
                    if !text.is_empty() {
                        let out = format_terminal_output(&text, &mut at_line_start);
                        let mut stdout = io::stdout().lock();
                        let _ = stdout.write_all(out.as_bytes());
                        let _ = stdout.flush();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(_) => break,
            }
        }
    });

    let _raw_mode = RawModeGuard::enable()?;

    loop {
        if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
            continue;
        }
        let Ok(Event::Key(key)) = event::read() else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        match encode_key(&key) {
            KeyAction::Exit => break,
            KeyAction::Send(bytes) => {
                if session
                    .write_bytes(&bytes)
                    .is_err()
                {
                    break;
                }
            }
            KeyAction::Ignore => {}
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = reader_thread.join();
    eprintln!();
    Ok(())
}

enum KeyAction {
    Exit,
    Send(Vec<u8>),
    Ignore,
}

fn encode_key(key: &KeyEvent) -> KeyAction {
    let ctrl = key
        .modifiers
        .contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char(']') if ctrl => KeyAction::Exit,
        KeyCode::Char(c) if ctrl => {
            // Ctrl+A..Ctrl+Z map to 0x01..0x1A
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_lowercase() {
                KeyAction::Send(vec![lower as u8 - b'a' + 1])
            } else {
                KeyAction::Ignore
            }
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            KeyAction::Send(
                c.encode_utf8(&mut buf)
                    .as_bytes()
                    .to_vec(),
            )
        }
        KeyCode::Enter => KeyAction::Send(vec![b'\r']),
        KeyCode::Backspace => KeyAction::Send(vec![0x7F]),
        KeyCode::Tab => KeyAction::Send(vec![b'\t']),
        KeyCode::Esc => KeyAction::Send(vec![0x1B]),
        KeyCode::Up => KeyAction::Send(b"\x1b[A".to_vec()),
        KeyCode::Down => KeyAction::Send(b"\x1b[B".to_vec()),
        KeyCode::Right => KeyAction::Send(b"\x1b[C".to_vec()),
        KeyCode::Left => KeyAction::Send(b"\x1b[D".to_vec()),
        _ => KeyAction::Ignore,
    }
}
