//! Where assembled files go.

use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Seek, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Creates the output files of a mux job. Split jobs ask for one output
/// per file, numbered from zero.
pub trait OutputFactory {
    /// Writer type of one output file.
    type Output: Write + Seek;

    /// Open output number `index`.
    fn create(&mut self, index: usize) -> io::Result<Self::Output>;

    /// A completed output is handed back for flushing.
    fn close(&mut self, index: usize, output: Self::Output) -> io::Result<()>;

    /// A partial output after a failure. Implementations remove it if they can.
    fn discard(&mut self, index: usize, output: Self::Output);

    /// Display name of output `index`.
    fn name(&self, index: usize) -> String;
}

/// Writes to files on disk. With splitting enabled the files are named
/// `stem-001.ext`, `stem-002.ext`, and so on.
#[derive(Debug, Clone)]
pub struct FileOutputFactory {
    path: PathBuf,
    numbered: bool,
}

impl FileOutputFactory {
    /// Write to `path` without numbering.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            numbered: false,
        }
    }

    /// Number the output files.
    pub fn numbered(mut self, numbered: bool) -> Self {
        self.numbered = numbered;
        self
    }

    /// Path of output `index`.
    pub fn path_for(&self, index: usize) -> PathBuf {
        if !self.numbered {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match self.path.extension() {
            Some(ext) => format!("{}-{:03}.{}", stem, index + 1, ext.to_string_lossy()),
            None => format!("{}-{:03}", stem, index + 1),
        };
        self.path.with_file_name(name)
    }
}

impl OutputFactory for FileOutputFactory {
    type Output = BufWriter<File>;

    fn create(&mut self, index: usize) -> io::Result<Self::Output> {
        let path = self.path_for(index);
        debug!(path = %path.display(), "Creating output file");
        Ok(BufWriter::new(File::create(path)?))
    }

    fn close(&mut self, _index: usize, mut output: Self::Output) -> io::Result<()> {
        output.flush()?;
        output.get_ref().sync_all()
    }

    fn discard(&mut self, index: usize, output: Self::Output) {
        drop(output);
        let path = self.path_for(index);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Could not remove partial output");
        }
    }

    fn name(&self, index: usize) -> String {
        self.path_for(index).display().to_string()
    }
}

/// Keeps outputs in memory. Used by tests and by callers that post-process
/// the bytes themselves.
#[derive(Debug, Default)]
pub struct MemoryOutputFactory {
    outputs: Vec<Vec<u8>>,
}

impl MemoryOutputFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed outputs in creation order.
    pub fn outputs(&self) -> &[Vec<u8>] {
        &self.outputs
    }

    /// Take the completed outputs.
    pub fn into_outputs(self) -> Vec<Vec<u8>> {
        self.outputs
    }
}

impl OutputFactory for MemoryOutputFactory {
    type Output = Cursor<Vec<u8>>;

    fn create(&mut self, _index: usize) -> io::Result<Self::Output> {
        Ok(Cursor::new(Vec::new()))
    }

    fn close(&mut self, _index: usize, output: Self::Output) -> io::Result<()> {
        self.outputs.push(output.into_inner());
        Ok(())
    }

    fn discard(&mut self, _index: usize, _output: Self::Output) {}

    fn name(&self, index: usize) -> String {
        format!("memory#{}", index)
    }
}
