//! Element Index: the ordered list of top-level elements of a Segment.
//!
//! The index records where every child of the Segment lives (ID, byte
//! position, header layout, content size) without decoding the elements
//! themselves. Elements are decoded on demand with
//! [`ElementIndex::read_element`], [`ElementIndex::read_all`] and
//! [`ElementIndex::with_elements`].
//!
//! ```text
//! EBML Head
//! Segment ──┬── SeekHead ─── Seek*
//!           ├── Info
//!           ├── Tracks
//!           ├── Void
//!           ├── Cluster*
//!           ├── Cues
//!           └── Tags
//! ```
//!
//! Two scan modes exist. [`ParseMode::Full`] walks every top-level element.
//! [`ParseMode::Fast`] walks up to the first Cluster and then trusts the
//! SeekHead for everything after it; every entry is checked against the
//! element actually found at its position and any disagreement falls back
//! to a full walk.

mod scan;
pub mod seek_head;

use crate::element::{Anomaly, Element, ElementValue};
use crate::elements::{self, CLUSTER, EBML, INFO, SEEK_HEAD, TIMESTAMP_SCALE, VOID};
use crate::error::{MkvError, Result};
use crate::file::{Access, SegmentFile, SegmentIo};
use mkvkit_core::{CancellationToken, TimestampScale};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use tracing::debug;

pub use seek_head::{build_seek_head, parse_seek_head, SeekEntry};

/// Location and layout of one top-level element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElementDescriptor {
    /// Element ID.
    pub id: u32,
    /// Absolute byte offset of the first ID byte.
    pub position: u64,
    /// Size of ID and size field together.
    pub header_size: usize,
    /// Width of the size field in bytes.
    pub size_length: usize,
    /// Content size. For unknown-size elements this is the implied size
    /// found by scanning for the next top-level element.
    pub size: u64,
    /// Whether the size field carried a known size.
    pub size_known: bool,
}

impl ElementDescriptor {
    /// Absolute offset of the first content byte.
    pub fn data_position(&self) -> u64 {
        self.position + self.header_size as u64
    }

    /// Header plus content size.
    pub fn total_size(&self) -> u64 {
        self.header_size as u64 + self.size
    }

    /// Absolute offset one past the last content byte.
    pub fn end(&self) -> u64 {
        self.position + self.total_size()
    }

    /// Whether this is an EbmlVoid.
    pub fn is_void(&self) -> bool {
        self.id == VOID
    }
}

/// Header of the Segment element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SegmentHeader {
    /// Absolute offset of the Segment ID.
    pub position: u64,
    /// Size of ID and size field together.
    pub header_size: usize,
    /// Width of the size field in bytes.
    pub size_length: usize,
    /// Declared content size; `None` when unknown.
    pub size: Option<u64>,
    /// Absolute offset of the first child; SeekHead and Cue positions are
    /// relative to it.
    pub data_start: u64,
}

impl SegmentHeader {
    /// Absolute end of the Segment as declared, if known.
    pub fn declared_end(&self) -> Option<u64> {
        self.size.map(|size| self.data_start + size)
    }

    /// Convert an absolute offset into a segment-relative one.
    pub fn relative(&self, absolute: u64) -> u64 {
        absolute.saturating_sub(self.data_start)
    }

    /// Convert a segment-relative offset into an absolute one.
    pub fn absolute(&self, relative: u64) -> u64 {
        self.data_start + relative
    }
}

/// How much of the file a scan walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Walk up to the first Cluster and trust verified SeekHead entries for
    /// the rest.
    Fast,
    /// Walk every top-level element.
    #[default]
    Full,
}

/// Ordered index of the top-level elements of a Matroska file.
pub struct ElementIndex<F: SegmentIo> {
    pub(crate) io: F,
    pub(crate) mode: ParseMode,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) ebml_header: Element,
    pub(crate) segment: SegmentHeader,
    /// Effective end of the scanned region: the declared segment end
    /// clamped to the file length.
    pub(crate) segment_end: u64,
    pub(crate) file_length: u64,
    pub(crate) descriptors: Vec<ElementDescriptor>,
    pub(crate) meta_seek_positions: BTreeMap<u64, bool>,
    pub(crate) anomalies: Vec<Anomaly>,
}

impl ElementIndex<SegmentFile> {
    /// Open a file read-only and index it.
    pub fn open(path: impl AsRef<Path>, mode: ParseMode) -> Result<Self> {
        let file = SegmentFile::open(path, Access::ReadOnly)?;
        Self::from_io(file, mode)
    }

    /// Path of the indexed file.
    pub fn path(&self) -> &Path {
        self.io.path()
    }
}

impl<F: SegmentIo> ElementIndex<F> {
    /// Create an index over `io` without scanning it yet.
    pub fn new(io: F, mode: ParseMode) -> Self {
        Self {
            io,
            mode,
            cancel: None,
            ebml_header: Element::master(EBML, Vec::new()),
            segment: SegmentHeader::default(),
            segment_end: 0,
            file_length: 0,
            descriptors: Vec::new(),
            meta_seek_positions: BTreeMap::new(),
            anomalies: Vec::new(),
        }
    }

    /// Attach a cancellation token checked at every top-level element.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Index `io`.
    pub fn from_io(io: F, mode: ParseMode) -> Result<Self> {
        let mut index = Self::new(io, mode);
        index.process()?;
        Ok(index)
    }

    /// Scan the file and rebuild the index.
    pub fn process(&mut self) -> Result<()> {
        self.descriptors.clear();
        self.meta_seek_positions.clear();
        self.anomalies.clear();
        self.file_length = self.io.byte_len()?;

        self.read_head()?;
        let head_anomalies = self.anomalies.len();

        match self.mode {
            ParseMode::Full => self.scan_full()?,
            ParseMode::Fast => {
                if !self.scan_fast()? {
                    debug!("seek head not trustworthy, falling back to a full scan");
                    self.descriptors.clear();
                    self.anomalies.truncate(head_anomalies);
                    self.scan_full()?;
                }
            }
        }

        self.collect_meta_seek_positions()?;
        debug!(
            elements = self.descriptors.len(),
            anomalies = self.anomalies.len(),
            mode = ?self.mode,
            "indexed segment"
        );
        Ok(())
    }

    /// Switch to a full scan if the index was built in fast mode.
    pub fn ensure_full(&mut self) -> Result<()> {
        if self.mode != ParseMode::Full {
            self.mode = ParseMode::Full;
            self.process()?;
        }
        Ok(())
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(MkvError::Aborted),
            _ => Ok(()),
        }
    }

    pub(crate) fn push_anomaly(&mut self, anomaly: Anomaly) {
        if !self.anomalies.contains(&anomaly) {
            self.anomalies.push(anomaly);
        }
    }

    fn collect_meta_seek_positions(&mut self) -> Result<()> {
        let seek_heads: Vec<ElementDescriptor> = self
            .descriptors
            .iter()
            .filter(|d| d.id == SEEK_HEAD)
            .copied()
            .collect();

        for descriptor in seek_heads {
            let seek_head = match self.read_element(&descriptor) {
                Ok(seek_head) => seek_head,
                Err(MkvError::CorruptElement { reason, .. }) => {
                    self.push_anomaly(Anomaly::new(descriptor.position, SEEK_HEAD, reason));
                    continue;
                }
                Err(e) => return Err(e),
            };
            for entry in parse_seek_head(&seek_head) {
                let position = self.segment.absolute(entry.position);
                let found = self.position_holds(position, entry.id);
                if self.meta_seek_positions.insert(position, found).is_some() {
                    self.push_anomaly(Anomaly::new(
                        descriptor.position,
                        SEEK_HEAD,
                        format!("duplicate seek entry for position {}", entry.position),
                    ));
                }
                if !found {
                    self.push_anomaly(Anomaly::new(
                        descriptor.position,
                        SEEK_HEAD,
                        format!(
                            "seek entry for {} points at {} where no such element starts",
                            elements::element_name(entry.id),
                            entry.position
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn position_holds(&self, position: u64, id: u32) -> bool {
        self.descriptors
            .binary_search_by_key(&position, |d| d.position)
            .map(|i| self.descriptors[i].id == id)
            .unwrap_or(false)
    }

    /// Index of the last occurrence of `id`.
    pub fn find(&self, id: u32) -> Option<usize> {
        self.descriptors.iter().rposition(|d| d.id == id)
    }

    /// Index of the first occurrence of `id`.
    pub fn find_first(&self, id: u32) -> Option<usize> {
        self.descriptors.iter().position(|d| d.id == id)
    }

    /// Indices of all occurrences of `id` in position order.
    pub fn find_all(&self, id: u32) -> Vec<usize> {
        self.descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.id == id)
            .map(|(i, _)| i)
            .collect()
    }

    /// Descriptor at `index`.
    pub fn descriptor(&self, index: usize) -> Option<&ElementDescriptor> {
        self.descriptors.get(index)
    }

    /// Read and decode the element described by `descriptor`.
    pub fn read_element(&mut self, descriptor: &ElementDescriptor) -> Result<Element> {
        let header = crate::ebml::ElementHeader::read_at(&mut self.io, descriptor.position)?;
        if header.id != descriptor.id || header.header_size != descriptor.header_size {
            return Err(MkvError::CorruptElement {
                offset: descriptor.position,
                id: descriptor.id,
                reason: format!(
                    "found 0x{:X} with a {}-byte header where the index expects 0x{:X} with {}",
                    header.id, header.header_size, descriptor.id, descriptor.header_size
                ),
            });
        }

        let len = usize::try_from(descriptor.size).map_err(|_| MkvError::CorruptElement {
            offset: descriptor.position,
            id: descriptor.id,
            reason: "element too large to load".into(),
        })?;
        let content = self
            .io
            .read_at(descriptor.data_position(), len)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => MkvError::CorruptElement {
                    offset: descriptor.position,
                    id: descriptor.id,
                    reason: "content extends beyond the end of the file".into(),
                },
                _ => MkvError::Io(e),
            })?;

        let mut anomalies = Vec::new();
        let element = Element::decode_content(
            descriptor.id,
            &content,
            descriptor.data_position(),
            0,
            &mut anomalies,
        )?;
        for anomaly in anomalies {
            self.push_anomaly(anomaly);
        }
        Ok(element)
    }

    /// Read every occurrence of `id` and merge them into one master whose
    /// children appear in file order.
    pub fn read_all(&mut self, id: u32) -> Result<Option<Element>> {
        let mut merged: Option<Element> = None;
        for i in self.find_all(id) {
            let descriptor = self.descriptors[i];
            let element = self.read_element(&descriptor)?;
            match merged.as_mut() {
                None => merged = Some(element),
                Some(existing) => {
                    if let (Some(children), ElementValue::Master(more)) =
                        (existing.children_mut(), element.value)
                    {
                        children.extend(more);
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Read every occurrence of `id` in position order and hand each one
    /// to `callback`.
    pub fn with_elements<C>(&mut self, id: u32, mut callback: C) -> Result<()>
    where
        C: FnMut(&ElementDescriptor, Element) -> Result<()>,
    {
        for i in self.find_all(id) {
            self.check_cancelled()?;
            let descriptor = self.descriptors[i];
            let element = self.read_element(&descriptor)?;
            callback(&descriptor, element)?;
        }
        Ok(())
    }

    /// Descriptors in position order.
    pub fn descriptors(&self) -> &[ElementDescriptor] {
        &self.descriptors
    }

    /// Segment header.
    pub fn segment(&self) -> &SegmentHeader {
        &self.segment
    }

    /// Decoded EBML Head.
    pub fn ebml_header(&self) -> &Element {
        &self.ebml_header
    }

    /// Recoverable problems found so far.
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// SeekHead-referenced absolute positions, mapped to whether an indexed
    /// element of the referenced type starts there.
    pub fn meta_seek_positions(&self) -> &BTreeMap<u64, bool> {
        &self.meta_seek_positions
    }

    /// Mode of the last scan.
    pub fn parse_mode(&self) -> ParseMode {
        self.mode
    }

    /// Length of the file when it was last scanned.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Position of the first Cluster, if any.
    pub fn first_cluster_position(&self) -> Option<u64> {
        self.find_first(CLUSTER).map(|i| self.descriptors[i].position)
    }

    /// TimestampScale from Info, or the default when absent or zero.
    pub fn timestamp_scale(&mut self) -> Result<TimestampScale> {
        let Some(i) = self.find(INFO) else {
            return Ok(TimestampScale::default());
        };
        let descriptor = self.descriptors[i];
        let info = self.read_element(&descriptor)?;
        Ok(info
            .child_unsigned(TIMESTAMP_SCALE)
            .and_then(TimestampScale::new)
            .unwrap_or_default())
    }

    /// Mutable access to the underlying storage.
    pub(crate) fn io_mut(&mut self) -> &mut F {
        &mut self.io
    }

    /// Give up the index and return the underlying storage.
    pub fn into_inner(self) -> F {
        self.io
    }
}

impl<F: SegmentIo> std::fmt::Debug for ElementIndex<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementIndex")
            .field("mode", &self.mode)
            .field("segment", &self.segment)
            .field("file_length", &self.file_length)
            .field("elements", &self.descriptors.len())
            .field("anomalies", &self.anomalies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_geometry() {
        let d = ElementDescriptor {
            id: INFO,
            position: 100,
            header_size: 5,
            size_length: 1,
            size: 20,
            size_known: true,
        };
        assert_eq!(d.data_position(), 105);
        assert_eq!(d.total_size(), 25);
        assert_eq!(d.end(), 125);
        assert!(!d.is_void());
    }

    #[test]
    fn test_segment_relative_positions() {
        let segment = SegmentHeader {
            position: 40,
            header_size: 12,
            size_length: 8,
            size: Some(1000),
            data_start: 52,
        };
        assert_eq!(segment.declared_end(), Some(1052));
        assert_eq!(segment.relative(152), 100);
        assert_eq!(segment.absolute(100), 152);
        assert_eq!(segment.relative(10), 0);
    }
}
