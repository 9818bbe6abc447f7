use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use kmon_core::Kevent;

pub const STDIN: &str = "-";

/// Stream of decoded kernel events of one tracing session, one JSON
/// document per line.
///
/// The stop flag is checked between events: once it's set no more events
/// are handed out.
pub struct KeventSource {
    name: String,
    reader: Box<dyn BufRead + Send>,
    stop: Arc<AtomicBool>,
    line: Vec<u8>,
    lineno: usize,
}

impl KeventSource {
    /// Opens the source at `path`, `-` meaning stdin.
    pub fn open(path: &str, stop: Arc<AtomicBool>) -> Result<Self> {
        let reader: Box<dyn BufRead + Send> = if path == STDIN {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let file = File::open(path).with_context(|| format!("Error opening source {path}"))?;
            Box::new(BufReader::new(file))
        };
        Ok(Self::from_reader(path, reader, stop))
    }

    pub fn from_reader(
        name: impl Into<String>,
        reader: Box<dyn BufRead + Send>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.into(),
            reader,
            stop,
            line: Vec::new(),
            lineno: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the next event, `None` at the end of the stream or when
    /// stopped. Malformed lines are logged and skipped.
    pub fn next_kevent(&mut self) -> Result<Option<Kevent>> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                log::debug!("{}: stopped at line {}", self.name, self.lineno);
                return Ok(None);
            }
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .with_context(|| format!("Error reading source {}", self.name))?;
            if read == 0 {
                return Ok(None);
            }
            self.lineno += 1;
            let line = self.line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Kevent>(line) {
                Ok(kevt) => return Ok(Some(kevt)),
                Err(err) => log::warn!(
                    "{}:{}: skipping malformed kernel event: {err}",
                    self.name,
                    self.lineno
                ),
            }
        }
    }
}
