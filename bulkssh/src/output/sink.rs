//! Concrete sinks.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::Sink;

/// Process stdout, shared by every running session.
///
/// Each chunk is written under the stdout lock and flushed, so partial lines
/// such as prompts show up immediately. Chunks from different devices
/// interleave freely.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(data)?;
        out.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

/// Output file opened in append mode.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Open (or create) `path` for appending.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// In-memory sink whose clones all share one buffer.
#[derive(Debug, Default, Clone)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    /// Contents as a string (lossy UTF-8 conversion).
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Sink for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("shared buffer lock poisoned"))?
            .extend_from_slice(data);
        Ok(())
    }
}
