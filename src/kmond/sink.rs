use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};
use kmon_core::{Kevent, config::OutputFormat};

/// Destination of the events that made it through the chain.
pub trait Sink: Send + Sync {
    fn deliver(&self, kevt: &Kevent) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Prints events on stdout.
pub struct ConsoleSink {
    format: OutputFormat,
    colors: bool,
}

impl ConsoleSink {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colors: false,
        }
    }

    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }
}

impl Sink for ConsoleSink {
    fn deliver(&self, kevt: &Kevent) -> Result<()> {
        let mut out = io::stdout().lock();
        match self.format {
            OutputFormat::Text if self.colors => writeln!(out, "{kevt:#}")?,
            OutputFormat::Text => writeln!(out, "{kevt}")?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut out, kevt)?;
                writeln!(out)?;
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        io::stdout().flush()?;
        Ok(())
    }
}

/// Records events in a capture file, one JSON document per line, so a later
/// replay can rebuild the snapshotters from the rundown events.
pub struct CaptureWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl CaptureWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Error creating capture file {}", path.display()))?;
        log::info!("capturing kernel events to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Sink for CaptureWriter {
    fn deliver(&self, kevt: &Kevent) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, kevt)
            .with_context(|| format!("Error writing to {}", self.path.display()))?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .with_context(|| format!("Error flushing {}", self.path.display()))
    }
}
