//! Undo journal for planned writes.

use super::plan::PlannedWrite;
use crate::file::SegmentIo;
use std::io;
use tracing::{debug, trace};

/// Records the original bytes under every write so that a failed update
/// can be undone.
#[derive(Debug)]
pub(crate) struct Journal {
    original_length: u64,
    saved: Vec<(u64, Vec<u8>)>,
}

impl Journal {
    pub fn new(original_length: u64) -> Self {
        Self {
            original_length,
            saved: Vec::new(),
        }
    }

    /// Apply `writes` in the order of their kinds, then sync.
    pub fn apply<F: SegmentIo>(&mut self, io: &mut F, writes: &[PlannedWrite]) -> io::Result<()> {
        let mut ordered: Vec<&PlannedWrite> = writes.iter().collect();
        ordered.sort_by_key(|w| w.kind);
        for write in ordered {
            trace!(
                position = write.position,
                len = write.data.len(),
                kind = ?write.kind,
                "write"
            );
            self.write(io, write.position, &write.data)?;
        }
        io.sync()
    }

    fn write<F: SegmentIo>(&mut self, io: &mut F, position: u64, data: &[u8]) -> io::Result<()> {
        if position < self.original_length {
            let len = (data.len() as u64).min(self.original_length - position) as usize;
            let original = io.read_at(position, len)?;
            self.saved.push((position, original));
        }
        io.write_at(position, data)
    }

    /// Restore every saved range in reverse order and truncate to the
    /// original length.
    pub fn rollback<F: SegmentIo>(self, io: &mut F) -> io::Result<()> {
        debug!(ranges = self.saved.len(), "rolling back update");
        for (position, data) in self.saved.iter().rev() {
            io.write_at(*position, data)?;
        }
        io.set_len(self.original_length)?;
        io.sync()
    }
}
