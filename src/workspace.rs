//! Scratch Workspace - Scoped Intermediate Files
//!
//! A workspace is removed exactly once: by `close`, or by `Drop` when a
//! stage bails out early.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::diagnostics::DiagnosticLog;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static CLEANUP_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_cleanup_call_count() -> u32 {
    CLEANUP_CALL_COUNT.load(Ordering::SeqCst)
}

/// Everything the typesetter and converters may leave behind.
pub const INTERMEDIATE_EXTENSIONS: [&str; 8] = ["tex", "aux", "log", "dvi", "out", "err", "ps", "svg"];

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    base_name: String,
    log: DiagnosticLog,
}

impl Workspace {
    pub fn create(prefix: &str, base_name: &str, log: DiagnosticLog) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let path = dir.path().to_path_buf();
        log.record(path.display().to_string());
        Ok(Self {
            dir: Some(dir),
            path,
            base_name: base_name.to_string(),
            log,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.path
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// `<dir>/<base>.<ext>`
    pub fn file(&self, extension: &str) -> PathBuf {
        self.path.join(format!("{}.{}", self.base_name, extension))
    }

    pub fn tex_file(&self) -> PathBuf {
        self.file("tex")
    }

    pub fn dvi_file(&self) -> PathBuf {
        self.file("dvi")
    }

    pub fn ps_file(&self) -> PathBuf {
        self.file("ps")
    }

    pub fn close(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        #[cfg(feature = "test-hooks")]
        CLEANUP_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        for ext in INTERMEDIATE_EXTENSIONS {
            let file = format!("{}.{}", self.base_name, ext);
            match fs::remove_file(self.path.join(&file)) {
                Ok(()) => self.log.record(format!("{} file deleted", file)),
                Err(_) => self.log.record(format!("{} file not deleted", file)),
            }
        }

        // Whatever the tools wrote under other names goes with the directory.
        match dir.close() {
            Ok(()) => self.log.record(format!("{} is removed", self.path.display())),
            Err(e) => {
                log::warn!("cannot remove {}: {}", self.path.display(), e);
                self.log.record(format!("{} cannot be removed", self.path.display()));
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}
