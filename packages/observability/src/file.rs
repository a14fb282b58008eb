//! Append-only JSONL log file.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to a log file opened in append mode.
///
/// Writes are line buffered, so each complete JSON line reaches the file
/// before the next one starts.
#[derive(Clone)]
pub struct LogFile {
    path: PathBuf,
    inner: Arc<Mutex<LineWriter<File>>>,
}

impl LogFile {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(Mutex::new(LineWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
