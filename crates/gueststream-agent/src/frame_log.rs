//! Optional per-frame log file (`-l`).
//!
//! Text mode writes `"<µs>: <text>"` lines, plus a hex dump of every frame
//! when the `frames` category is enabled. Binary mode writes only the raw
//! encoded frames, back to back.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use gueststream_core::{AgentError, ErrorKind};
use tracing::warn;

const HEXDUMP_WIDTH: usize = 16;

pub struct FrameLog {
    out:        Option<Box<dyn Write + Send>>,
    log_binary: bool,
    log_frames: bool,
    origin:     Instant,
}

impl FrameLog {
    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self { out: None, log_binary: false, log_frames: false, origin: Instant::now() }
    }

    pub fn open(path: &Path, log_binary: bool, log_frames: bool) -> Result<Self, AgentError> {
        let file = File::create(path).map_err(|e| {
            AgentError::new(ErrorKind::Io, format!("Failed to open log file '{}': {e}", path.display()))
        })?;
        Ok(Self::from_writer(BufWriter::new(file), log_binary, log_frames))
    }

    pub fn from_writer(out: impl Write + Send + 'static, log_binary: bool, log_frames: bool) -> Self {
        Self { out: Some(Box::new(out)), log_binary, log_frames, origin: Instant::now() }
    }

    /// Microseconds since the log was created.
    pub fn time_us(&self) -> u128 {
        self.origin.elapsed().as_micros()
    }

    /// Write a timestamped text line. Ignored in binary mode.
    pub fn log_stat(&mut self, args: fmt::Arguments<'_>) {
        if self.log_binary {
            return;
        }
        let now = self.time_us();
        if let Some(out) = self.out.as_mut() {
            let result = writeln!(out, "{now}: {args}").and_then(|_| out.flush());
            report(result);
        }
    }

    pub fn log_frame(&mut self, frame: &[u8]) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let result = if self.log_binary {
            out.write_all(frame).and_then(|_| out.flush())
        } else if self.log_frames {
            hexdump(out, frame).and_then(|_| out.flush())
        } else {
            Ok(())
        };
        report(result);
    }
}

fn report(result: io::Result<()>) {
    if let Err(e) = result {
        warn!("frame log write failed: {}", e);
    }
}

fn hexdump(out: &mut dyn Write, data: &[u8]) -> io::Result<()> {
    for (n, row) in data.chunks(HEXDUMP_WIDTH).enumerate() {
        write!(out, "{:04x}:", n * HEXDUMP_WIDTH)?;
        for byte in row {
            write!(out, " {byte:02x}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}
