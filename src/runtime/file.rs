//! File-backed sinks and sources.
//!
//! A [`FileSink`] persists a transport's byte stream to a file that must not
//! exist yet. A [`FileSource`] streams a file back out as a lazy sequence of
//! byte windows.

use crate::error::SinkError;
use crate::runtime::ByteWindow;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Destination file written sequentially in arrival order.
///
/// The handle is released when the sink is closed or dropped.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl FileSink {
    /// Create `path` exclusively. Fails with [`SinkError::AlreadyExists`]
    /// without touching an existing file.
    pub fn create_new(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => SinkError::AlreadyExists(path.clone()),
                _ => SinkError::Io(e),
            })?;

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write the readable part of `window` (drain mode) and consume it.
    pub fn drain(&mut self, window: &mut ByteWindow) -> Result<usize, SinkError> {
        let writer = self.writer.as_mut().ok_or_else(closed)?;
        let n = window.remaining();
        writer.write_all(window.readable())?;
        window
            .advance(n)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.written += n as u64;
        Ok(n)
    }

    /// Flush and release the file handle. Further calls do nothing.
    pub fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

fn closed() -> SinkError {
    SinkError::Io(io::Error::new(io::ErrorKind::NotConnected, "sink is closed"))
}

/// Readable file produced as a finite, non-restartable sequence of windows.
///
/// Each item is a window in drain mode holding the next chunk; the last
/// chunk may be shorter than the window capacity.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    window_size: usize,
    done: bool,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>, window_size: usize) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            window_size: window_size.max(1),
            done: false,
        })
    }

    /// Fill `window` (fill mode) from the file. Returns `Ok(0)` at EOF.
    pub fn read_into(&mut self, window: &mut ByteWindow) -> io::Result<usize> {
        if self.done || !window.has_remaining() {
            return Ok(0);
        }
        loop {
            match self.file.read(window.writable_mut()) {
                Ok(0) => {
                    self.done = true;
                    return Ok(0);
                }
                Ok(n) => {
                    window
                        .advance(n)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    return Ok(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Iterator for FileSource {
    type Item = io::Result<ByteWindow>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut window = ByteWindow::new(self.window_size);
        match self.read_into(&mut window) {
            Ok(0) => None,
            Ok(_) => {
                window.flip();
                Some(Ok(window))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Stream every window of `source` into `sink`. Returns bytes copied.
///
/// The sink stays open; the caller decides when to close it.
pub fn copy(source: FileSource, sink: &mut FileSink) -> Result<u64, SinkError> {
    let mut total = 0u64;
    for window in source {
        let mut window = window?;
        total += sink.drain(&mut window)? as u64;
    }
    Ok(total)
}
