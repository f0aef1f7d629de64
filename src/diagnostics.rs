//! Diagnostic Trace - One Run, One File
//!
//! The trace is opened (truncated) at the start of a run and handed to the
//! components that record into it. A disabled log swallows everything.

use chrono::Local;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_LOG_FILE: &str = "texsvg.log";

const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Clone, Default)]
pub struct DiagnosticLog {
    sink: Option<Sink>,
}

impl DiagnosticLog {
    pub const fn disabled() -> Self {
        Self { sink: None }
    }

    /// Open `path` for this run, discarding whatever a previous run left.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::to_writer(file))
    }

    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    /// `~/texsvg.log`, or the bare file name when no home directory is known.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_LOG_FILE))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn record(&self, message: impl AsRef<str>) {
        let Some(sink) = &self.sink else {
            return;
        };
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        // A poisoned or failing trace must never abort a run.
        if let Ok(mut writer) = sink.lock() {
            let _ = writeln!(writer, "{}: {}", stamp, message.as_ref());
            let _ = writer.flush();
        }
    }
}

impl fmt::Debug for DiagnosticLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// In-memory sink shared between a log and the test reading it.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
