//! Planning the writes of an update.
//!
//! The planner works on a copy of the top-level layout. Every decision
//! (voiding, placing, appending, rewriting a SeekHead) is applied to that
//! copy and recorded as a [`PlannedWrite`]; nothing touches the file until
//! the plan is complete.

use super::layout::{fit_in, Fitted};
use super::{PlacementStrategy, UpdateError};
use crate::analyzer::seek_head::canonical_entries;
use crate::analyzer::{build_seek_head, ElementDescriptor, ElementIndex, SeekEntry, SegmentHeader};
use crate::ebml::{encode_vint_with_length, void_header};
use crate::element::Element;
use crate::elements::{self, CLUSTER, SEEK_HEAD, VOID};
use crate::file::SegmentIo;
use std::collections::BTreeSet;
use tracing::debug;

/// Category of a write. Writes are applied in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum WriteKind {
    Append,
    UnknownSizeFix,
    Element,
    Void,
    SeekHead,
    SegmentSize,
}

/// Bytes to write at a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedWrite {
    pub position: u64,
    pub data: Vec<u8>,
    pub kind: WriteKind,
}

impl PlannedWrite {
    pub fn new(position: u64, data: Vec<u8>, kind: WriteKind) -> Self {
        Self {
            position,
            data,
            kind,
        }
    }

    fn end(&self) -> u64 {
        self.position + self.data.len() as u64
    }
}

/// A SeekHead as read from the file, and its entries as they will be.
#[derive(Debug, Clone)]
pub(crate) struct SeekHeadState {
    pub position: u64,
    pub original: Vec<SeekEntry>,
    pub entries: Vec<SeekEntry>,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: u32,
    position: u64,
    end: u64,
}

/// Working copy of the layout plus the writes decided so far.
#[derive(Debug)]
pub(crate) struct Planner {
    slots: Vec<Slot>,
    segment: SegmentHeader,
    segment_end: u64,
    original_length: u64,
    file_length: u64,
    first_cluster: Option<u64>,
    last_unknown: Option<ElementDescriptor>,
    writes: Vec<PlannedWrite>,
    voided: BTreeSet<u64>,
}

impl Planner {
    pub fn new<F: SegmentIo>(index: &ElementIndex<F>) -> Self {
        let slots = index
            .descriptors()
            .iter()
            .map(|d| Slot {
                id: d.id,
                position: d.position,
                end: d.end(),
            })
            .collect();
        let last_unknown = index
            .descriptors()
            .last()
            .filter(|d| !d.size_known && d.end() == index.file_length())
            .copied();
        Self {
            slots,
            segment: *index.segment(),
            segment_end: index.segment_end,
            original_length: index.file_length(),
            file_length: index.file_length(),
            first_cluster: index.first_cluster_position(),
            last_unknown,
            writes: Vec::new(),
            voided: BTreeSet::new(),
        }
    }

    pub fn original_length(&self) -> u64 {
        self.original_length
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn segment(&self) -> &SegmentHeader {
        &self.segment
    }

    pub fn is_voided(&self, position: u64) -> bool {
        self.voided.contains(&position)
    }

    pub fn into_writes(self) -> Vec<PlannedWrite> {
        self.writes
    }

    fn slot_index(&self, position: u64) -> Result<usize, UpdateError> {
        self.slots
            .binary_search_by_key(&position, |s| s.position)
            .map_err(|_| {
                UpdateError::Unknown(crate::MkvError::InvalidState(format!(
                    "no element at position {} in the layout",
                    position
                )))
            })
    }

    /// Exclusive end index of the run starting at `start`: the slot itself
    /// and every directly following EbmlVoid.
    fn run_end(&self, start: usize) -> usize {
        let mut end = start + 1;
        while end < self.slots.len()
            && self.slots[end].id == VOID
            && self.slots[end].position == self.slots[end - 1].end
        {
            end += 1;
        }
        end
    }

    fn run_len(&self, start: usize, end: usize) -> u64 {
        self.slots[end - 1].end - self.slots[start].position
    }

    /// Whether the run ending at `end` is the last thing in both the
    /// segment and the file.
    fn run_at_file_end(&self, end: usize) -> bool {
        end == self.slots.len()
            && self.slots[end - 1].end == self.segment_end
            && self.segment_end == self.file_length
    }

    fn write(&mut self, position: u64, data: Vec<u8>, kind: WriteKind) {
        let end = position + data.len() as u64;
        self.writes
            .retain(|w| !(w.position >= position && w.end() <= end));
        self.writes.push(PlannedWrite::new(position, data, kind));
    }

    /// Turn the run `start..end` into a single EbmlVoid.
    fn void_run(&mut self, start: usize, end: usize) -> Result<(), UpdateError> {
        let position = self.slots[start].position;
        let total = self.run_len(start, end);
        for slot in &self.slots[start..end] {
            if slot.id != VOID {
                self.voided.insert(slot.position);
            }
        }
        self.write(position, void_header(total)?, WriteKind::Void);
        self.slots.splice(
            start..end,
            [Slot {
                id: VOID,
                position,
                end: position + total,
            }],
        );
        Ok(())
    }

    /// Void the single element at `position`.
    pub fn void_element(&mut self, position: u64) -> Result<(), UpdateError> {
        let index = self.slot_index(position)?;
        debug!(
            position,
            id = elements::element_name(self.slots[index].id),
            "voiding element"
        );
        self.void_run(index, index + 1)
    }

    /// Void an element together with the voids that follow it.
    pub fn void_element_run(&mut self, position: u64) -> Result<(), UpdateError> {
        let index = self.slot_index(position)?;
        let end = self.run_end(index);
        self.void_run(index, end)
    }

    fn place(&mut self, start: usize, end: usize, id: u32, fitted: Fitted, kind: WriteKind) {
        let position = self.slots[start].position;
        let run_end = self.slots[end - 1].end;
        let element_end = position + fitted.element_len;
        let mut replacement = vec![Slot {
            id,
            position,
            end: element_end,
        }];
        if fitted.padding() > 0 {
            replacement.push(Slot {
                id: VOID,
                position: element_end,
                end: run_end,
            });
        }
        self.write(position, fitted.data, kind);
        self.slots.splice(start..end, replacement);
    }

    /// Append `data` at the end of the file and return its position.
    fn append(&mut self, id: u32, data: Vec<u8>) -> Result<u64, UpdateError> {
        self.fix_last_unknown_size()?;
        let position = self.file_length;
        let end = position + data.len() as u64;
        debug!(position, len = data.len(), id = elements::element_name(id), "appending");
        self.write(position, data, WriteKind::Append);
        self.slots.push(Slot { id, position, end });
        self.file_length = end;
        self.segment_end = end;
        Ok(position)
    }

    /// Give the last element a known size before anything is appended
    /// after it.
    fn fix_last_unknown_size(&mut self) -> Result<(), UpdateError> {
        let Some(last) = self.last_unknown.take() else {
            return Ok(());
        };
        let still_last = self
            .slots
            .last()
            .map_or(false, |s| s.position == last.position && s.id == last.id);
        if !still_last {
            return Ok(());
        }
        let (bytes, len) = encode_vint_with_length(last.size, last.size_length)
            .map_err(|_| UpdateError::FixingLastElementUnknownSize)?;
        let position = last.position + (last.header_size - last.size_length) as u64;
        debug!(position = last.position, size = last.size, "fixing unknown size");
        self.write(position, bytes[..len].to_vec(), WriteKind::UnknownSizeFix);
        Ok(())
    }

    /// Find the first run of voids before the first Cluster that can hold
    /// `element`.
    fn find_void_run(&self, element: &Element) -> Result<Option<(usize, usize, Fitted)>, UpdateError> {
        let limit = self.first_cluster.unwrap_or(u64::MAX);
        let mut start = 0;
        while start < self.slots.len() && self.slots[start].position < limit {
            if self.slots[start].id != VOID {
                start += 1;
                continue;
            }
            let end = self.run_end(start);
            if let Some(fitted) = fit_in(element, self.run_len(start, end))? {
                return Ok(Some((start, end, fitted)));
            }
            start = end;
        }
        Ok(None)
    }

    /// Rewrite the element at `position` in place if it fits, otherwise
    /// void it and place it per `strategy`. Returns the final position.
    pub fn replace(
        &mut self,
        position: u64,
        element: &Element,
        strategy: PlacementStrategy,
    ) -> Result<u64, UpdateError> {
        let start = self.slot_index(position)?;
        let end = self.run_end(start);
        let available = self.run_len(start, end);

        if let Some(fitted) = fit_in(element, available)? {
            debug!(position, available, "element fits in place");
            self.place(start, end, element.id, fitted, WriteKind::Element);
            return Ok(position);
        }

        if self.run_at_file_end(end) {
            let data = element.to_bytes()?;
            let new_end = position + data.len() as u64;
            debug!(position, grows_by = new_end - self.file_length, "rewriting last element");
            self.write(position, data, WriteKind::Element);
            self.slots.splice(
                start..end,
                [Slot {
                    id: element.id,
                    position,
                    end: new_end,
                }],
            );
            if self.last_unknown.map_or(false, |d| d.position == position) {
                self.last_unknown = None;
            }
            self.file_length = self.file_length.max(new_end);
            self.segment_end = self.file_length;
            return Ok(position);
        }

        self.void_run(start, end)?;
        self.insert(element, strategy)
    }

    /// Place an element that has no slot yet. Returns its position.
    pub fn insert(&mut self, element: &Element, strategy: PlacementStrategy) -> Result<u64, UpdateError> {
        if strategy == PlacementStrategy::Anywhere {
            if let Some((start, end, fitted)) = self.find_void_run(element)? {
                let position = self.slots[start].position;
                debug!(position, "reusing void space");
                self.place(start, end, element.id, fitted, WriteKind::Element);
                return Ok(position);
            }
        }
        self.append(element.id, element.to_bytes()?)
    }

    /// Entries a freshly created SeekHead should carry: the last occurrence
    /// of every non-void, non-cluster element.
    pub fn seekable_entries(&self) -> Vec<SeekEntry> {
        let mut entries: Vec<SeekEntry> = Vec::new();
        for slot in self.slots.iter().rev() {
            if matches!(slot.id, VOID | CLUSTER | SEEK_HEAD) || entries.iter().any(|e| e.id == slot.id) {
                continue;
            }
            entries.push(SeekEntry::new(slot.id, self.segment.relative(slot.position)));
        }
        canonical_entries(entries)
    }

    /// Bring the SeekHeads up to date. Returns the number of SeekHeads
    /// rewritten and whether a merged SeekHead was generated.
    pub fn update_seek_heads(
        &mut self,
        mut heads: Vec<SeekHeadState>,
        target: Option<SeekEntry>,
        create_if_missing: bool,
    ) -> Result<(usize, bool), UpdateError> {
        let voided = self.voided.clone();
        let segment = self.segment;
        for head in &mut heads {
            head.entries
                .retain(|e| !voided.contains(&segment.absolute(e.position)));
        }
        heads.retain(|h| !self.voided.contains(&h.position));

        if heads.is_empty() {
            if create_if_missing {
                let entries = self.seekable_entries();
                let seek_head = build_seek_head(&entries);
                let position = self.insert(&seek_head, PlacementStrategy::Anywhere)?;
                debug!(position, entries = entries.len(), "created seek head");
                return Ok((1, true));
            }
            return Ok((0, false));
        }

        if let Some(target) = target {
            if !heads.iter().any(|h| h.entries.contains(&target)) {
                heads[0].entries.push(target);
            }
        }

        let modified: Vec<usize> = (0..heads.len())
            .filter(|&i| heads[i].entries != heads[i].original)
            .collect();
        if modified.is_empty() {
            return Ok((0, false));
        }

        let mut fits = Vec::with_capacity(modified.len());
        for &i in &modified {
            let start = self.slot_index(heads[i].position)?;
            let end = self.run_end(start);
            let seek_head = build_seek_head(&heads[i].entries);
            match fit_in(&seek_head, self.run_len(start, end))? {
                Some(fitted) => fits.push((heads[i].position, fitted)),
                None => break,
            }
        }
        if fits.len() == modified.len() {
            let count = fits.len();
            for (position, fitted) in fits {
                let start = self.slot_index(position)?;
                let end = self.run_end(start);
                self.place(start, end, SEEK_HEAD, fitted, WriteKind::SeekHead);
            }
            return Ok((count, false));
        }

        self.regenerate_seek_head(heads).map(|count| (count, true))
    }

    /// Merge all SeekHeads into one canonical SeekHead.
    fn regenerate_seek_head(&mut self, heads: Vec<SeekHeadState>) -> Result<usize, UpdateError> {
        let merged = canonical_entries(
            heads
                .iter()
                .flat_map(|h| h.entries.iter().copied())
                .filter(|e| e.id != SEEK_HEAD),
        );
        debug!(entries = merged.len(), seek_heads = heads.len(), "regenerating seek head");

        let primary = heads[0].position;
        for head in &heads[1..] {
            self.void_element(head.position)?;
        }

        let seek_head = build_seek_head(&merged);
        let start = self.slot_index(primary)?;
        let end = self.run_end(start);
        let available = self.run_len(start, end);
        if let Some(fitted) = fit_in(&seek_head, available)? {
            self.place(start, end, SEEK_HEAD, fitted, WriteKind::SeekHead);
            return Ok(1);
        }

        let pointer_target = self.segment.relative(self.file_length);
        let pointer = build_seek_head(&[SeekEntry::new(SEEK_HEAD, pointer_target)]);
        let Some(fitted) = fit_in(&pointer, available)? else {
            return Err(UpdateError::MetaSeek);
        };
        let appended = self.append(SEEK_HEAD, seek_head.to_bytes()?)?;
        debug_assert_eq!(self.segment.relative(appended), pointer_target);
        let start = self.slot_index(primary)?;
        let end = self.run_end(start);
        self.place(start, end, SEEK_HEAD, fitted, WriteKind::SeekHead);
        Ok(2)
    }

    /// Fail with `error` if the segment size field cannot describe the
    /// current file length.
    pub fn check_segment_size(&self, error: UpdateError) -> Result<(), UpdateError> {
        if self.segment.size.is_none() || self.file_length == self.original_length {
            return Ok(());
        }
        let size = self.file_length - self.segment.data_start;
        encode_vint_with_length(size, self.segment.size_length)
            .map(|_| ())
            .map_err(|_| error)
    }

    /// Rewrite a known Segment size when the file grew.
    pub fn write_segment_size(&mut self) -> Result<(), UpdateError> {
        if self.segment.size.is_none() || self.file_length == self.original_length {
            return Ok(());
        }
        let size = self.file_length - self.segment.data_start;
        let (bytes, len) = encode_vint_with_length(size, self.segment.size_length)
            .map_err(|_| UpdateError::SegmentSizeForElement)?;
        let position = self.segment.data_start - self.segment.size_length as u64;
        debug!(size, "rewriting segment size");
        self.write(position, bytes[..len].to_vec(), WriteKind::SegmentSize);
        Ok(())
    }
}
