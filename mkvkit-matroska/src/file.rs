//! File handles used by the element index and the updater.
//!
//! The index normally holds its file read-only and switches to read-write
//! only for the duration of an update. [`SegmentIo`] abstracts over that so
//! the same code runs against on-disk files and in-memory buffers.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Access mode of a segment handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reads only; writes fail with `PermissionDenied`.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Random-access storage holding a Matroska file.
pub trait SegmentIo: Read + Write + Seek {
    /// Reopen the underlying storage with a different access mode.
    fn reopen(&mut self, access: Access) -> io::Result<()>;

    /// Current access mode.
    fn access(&self) -> Access;

    /// Truncate or extend the storage.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Flush all written data to durable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Current length of the storage.
    fn byte_len(&mut self) -> io::Result<u64> {
        let current = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(current))?;
        Ok(len)
    }

    /// Read exactly `len` bytes at `position`.
    fn read_at(&mut self, position: u64, len: usize) -> io::Result<Vec<u8>> {
        self.seek(SeekFrom::Start(position))?;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write all of `data` at `position`.
    fn write_at(&mut self, position: u64, data: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(position))?;
        self.write_all(data)
    }
}

/// An on-disk Matroska file.
#[derive(Debug)]
pub struct SegmentFile {
    file: File,
    path: PathBuf,
    access: Access,
}

impl SegmentFile {
    /// Open a file with the given access mode.
    pub fn open(path: impl AsRef<Path>, access: Access) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_file(&path, access)?;
        Ok(Self { file, path, access })
    }

    fn open_file(path: &Path, access: Access) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(access == Access::ReadWrite)
            .open(path)
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> io::Result<()> {
        match self.access {
            Access::ReadWrite => Ok(()),
            Access::ReadOnly => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is open read-only", self.path.display()),
            )),
        }
    }
}

impl Read for SegmentFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SegmentFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_writable()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for SegmentFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl SegmentIo for SegmentFile {
    fn reopen(&mut self, access: Access) -> io::Result<()> {
        if access == self.access {
            return Ok(());
        }
        let position = self.file.stream_position()?;
        if self.access == Access::ReadWrite {
            self.file.sync_all()?;
        }
        let mut file = Self::open_file(&self.path, access)?;
        file.seek(SeekFrom::Start(position))?;
        self.file = file;
        self.access = access;
        Ok(())
    }

    fn access(&self) -> Access {
        self.access
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.ensure_writable()?;
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// In-memory buffers are always writable.
impl SegmentIo for Cursor<Vec<u8>> {
    fn reopen(&mut self, _access: Access) -> io::Result<()> {
        Ok(())
    }

    fn access(&self) -> Access {
        Access::ReadWrite
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length too large"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}
