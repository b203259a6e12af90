//! Layout of one output file.
//!
//! ```text
//! EBML header
//! Segment (8-byte size, patched at the end)
//! ├── Void      reserved for the SeekHead
//! ├── Info      reserved slot, rewritten with Duration and NextUID
//! ├── Tracks
//! ├── Chapters / Tags / Attachments
//! ├── Cluster ...
//! ├── Cues
//! └── Info / Tracks copies (WRITE_HEADERS_TWICE)
//! ```

use super::block::RenderedBlock;
use super::cues::CueWriter;
use crate::analyzer::{build_seek_head, SeekEntry};
use crate::ebml::{
    encode_vint_with_length, write_void, EbmlHeader, ElementHeader, MAX_VINT_LENGTH,
};
use crate::element::Element;
use crate::elements::{
    ATTACHMENTS, CHAPTERS, CLUSTER, CUES, DURATION, INFO, MUXING_APP, NEXT_UID, PREV_UID,
    SEEK_HEAD, SEGMENT, SEGMENT_UID, TAGS, TIMESTAMP, TIMESTAMP_SCALE, TRACKS, WRITING_APP,
};
use crate::error::{MkvError, Result};
use crate::updater::layout::fit_in;
use mkvkit_core::{HackFlags, TimestampScale};
use std::io::{Seek, SeekFrom, Write};
use tracing::{debug, trace, warn};

/// Space kept free for the SeekHead after the Segment header.
const SEEK_HEAD_RESERVE: u64 = 256;
/// Spare bytes in the Info slot for Duration updates.
const INFO_SLACK: u64 = 16;
/// Room for a NextUID written once the following file exists.
const NEXT_UID_RESERVE: u64 = 20;

/// Everything a new file repeats from the job.
#[derive(Debug, Clone)]
pub(crate) struct FileHeaders {
    pub ebml: EbmlHeader,
    pub scale: TimestampScale,
    /// Info children other than the ones the writer maintains.
    pub info_extras: Vec<Element>,
    pub muxing_app: String,
    pub writing_app: String,
    pub tracks: Element,
    pub chapters: Option<Element>,
    pub tags: Option<Element>,
    pub attachments: Option<Element>,
    pub hacks: HackFlags,
    pub link_files: bool,
}

/// Identity of a file within a linked series.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileLink {
    pub segment_uid: [u8; 16],
    pub prev_uid: Option<[u8; 16]>,
}

/// What a finished file reports.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FinishedFile {
    pub bytes: u64,
    pub cues: usize,
}

pub(crate) struct SegmentWriter<W: Write + Seek> {
    output: W,
    position: u64,
    segment_size_position: u64,
    segment_data_start: u64,
    seek_head_slot: Option<u64>,
    info_slot: (u64, u64),
    link: FileLink,
    seek_entries: Vec<SeekEntry>,
    cues: CueWriter,
    clusters: usize,
    first_ns: Option<i64>,
    end_ns: i64,
}

impl<W: Write + Seek> SegmentWriter<W> {
    pub fn new(output: W, hacks: HackFlags, link: FileLink) -> Self {
        Self {
            output,
            position: 0,
            segment_size_position: 0,
            segment_data_start: 0,
            seek_head_slot: None,
            info_slot: (0, 0),
            link,
            seek_entries: Vec::new(),
            cues: CueWriter::new(hacks),
            clusters: 0,
            first_ns: None,
            end_ns: 0,
        }
    }

    /// Write the file header up to and including the static top-level
    /// elements.
    pub fn begin(&mut self, headers: &FileHeaders) -> Result<()> {
        self.write(&headers.ebml.to_element().to_bytes()?)?;
        let segment_header =
            ElementHeader::encode_with_size_length(SEGMENT, None, MAX_VINT_LENGTH)?;
        self.segment_size_position =
            self.position + (segment_header.len() - MAX_VINT_LENGTH) as u64;
        self.write(&segment_header)?;
        self.segment_data_start = self.position;

        if !headers.hacks.contains(HackFlags::NO_META_SEEK) {
            self.seek_head_slot = Some(self.position);
            let mut void = Vec::new();
            write_void(&mut void, SEEK_HEAD_RESERVE)?;
            self.write(&void)?;
        }

        let info = self.info_element(headers, None, None);
        let mut slot_len = info.encoded_size() + INFO_SLACK;
        if headers.link_files {
            slot_len += NEXT_UID_RESERVE;
        }
        self.info_slot = (self.position, slot_len);
        self.write_fitted(&info, slot_len)?;
        self.add_seek_entry(INFO, self.info_slot.0);

        self.write_top_level(&headers.tracks)?;
        for element in [&headers.chapters, &headers.tags, &headers.attachments]
            .into_iter()
            .flatten()
        {
            self.write_top_level(element)?;
        }

        debug!(
            segment_data_start = self.segment_data_start,
            position = self.position,
            "File header written"
        );
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters
    }

    pub fn cues_estimated_size(&self) -> u64 {
        self.cues.estimated_size()
    }

    pub fn segment_uid(&self) -> [u8; 16] {
        self.link.segment_uid
    }

    /// Append a cluster. `cue_flags[i]` tells whether block `i` gets a cue.
    /// Returns the number of bytes written.
    pub fn write_cluster(
        &mut self,
        timestamp_ticks: i64,
        blocks: &[RenderedBlock],
        cue_flags: &[bool],
        time_range: (i64, i64),
    ) -> Result<u64> {
        let timestamp = u64::try_from(timestamp_ticks).map_err(|_| {
            MkvError::InvalidBlock(format!("negative cluster timestamp {}", timestamp_ticks))
        })?;
        let mut children = Vec::with_capacity(blocks.len() + 1);
        children.push(Element::unsigned(TIMESTAMP, timestamp));
        children.extend(blocks.iter().map(|b| b.element.clone()));
        let cluster = Element::master(CLUSTER, children);
        let bytes = cluster.to_bytes()?;

        let cluster_position = self.position;
        let relative_cluster = cluster_position - self.segment_data_start;
        let header_len = bytes.len() as u64 - cluster.content_size();
        let mut offset = Element::unsigned(TIMESTAMP, timestamp).encoded_size();
        for (block, &cue) in blocks.iter().zip(cue_flags) {
            if cue {
                self.cues.add(
                    (timestamp_ticks + block.relative_ticks as i64).max(0) as u64,
                    block.track_number,
                    relative_cluster,
                    offset,
                    block.duration_ticks,
                );
            }
            offset += block.encoded_size();
        }

        self.write(&bytes)?;
        self.clusters += 1;
        self.first_ns = Some(self.first_ns.map_or(time_range.0, |first| first.min(time_range.0)));
        self.end_ns = self.end_ns.max(time_range.1);
        trace!(
            position = cluster_position,
            header_len,
            blocks = blocks.len(),
            timestamp,
            "Cluster written"
        );
        Ok(bytes.len() as u64)
    }

    /// Write the trailing elements and patch the reserved slots.
    pub fn finish(
        &mut self,
        headers: &FileHeaders,
        next_uid: Option<[u8; 16]>,
    ) -> Result<FinishedFile> {
        let cue_count = self.cues.len();
        if let Some(cues) = self.cues.to_element() {
            self.write_top_level(&cues)?;
        }

        let duration_ticks = self
            .first_ns
            .map(|first| (self.end_ns - first) as f64 / headers.scale.as_nanos() as f64);
        let info = self.info_element(headers, duration_ticks, next_uid);

        if headers.hacks.contains(HackFlags::WRITE_HEADERS_TWICE) {
            self.write(&info.to_bytes()?)?;
            self.write(&headers.tracks.to_bytes()?)?;
        }

        if let Some(slot) = self.seek_head_slot {
            self.write_seek_head(slot)?;
        }

        let (info_position, info_len) = self.info_slot;
        let fitted = fit_in(&info, info_len)?.ok_or_else(|| {
            MkvError::InvalidState(format!(
                "Info of {} bytes does not fit its {} byte slot",
                info.encoded_size(),
                info_len
            ))
        })?;
        self.write_at(info_position, &fitted.data)?;

        let segment_size = self.position - self.segment_data_start;
        let (size_bytes, size_len) = encode_vint_with_length(segment_size, MAX_VINT_LENGTH)?;
        self.write_at(self.segment_size_position, &size_bytes[..size_len])?;
        self.output.seek(SeekFrom::Start(self.position))?;
        self.output.flush()?;

        debug!(
            bytes = self.position,
            clusters = self.clusters,
            cues = cue_count,
            "File finished"
        );
        Ok(FinishedFile {
            bytes: self.position,
            cues: cue_count,
        })
    }

    /// Hand back the output.
    pub fn into_output(self) -> W {
        self.output
    }

    fn info_element(
        &self,
        headers: &FileHeaders,
        duration_ticks: Option<f64>,
        next_uid: Option<[u8; 16]>,
    ) -> Element {
        let mut children = vec![Element::binary(SEGMENT_UID, self.link.segment_uid.to_vec())];
        if let Some(prev) = self.link.prev_uid {
            children.push(Element::binary(PREV_UID, prev.to_vec()));
        }
        if let Some(next) = next_uid {
            children.push(Element::binary(NEXT_UID, next.to_vec()));
        }
        children.push(Element::unsigned(TIMESTAMP_SCALE, headers.scale.as_nanos()));
        children.push(Element::float(DURATION, duration_ticks.unwrap_or(0.0)));
        children.push(Element::utf8(MUXING_APP, headers.muxing_app.clone()));
        children.push(Element::utf8(WRITING_APP, headers.writing_app.clone()));
        children.extend(headers.info_extras.iter().cloned());
        Element::master(INFO, children)
    }

    fn write_seek_head(&mut self, slot: u64) -> Result<()> {
        let seek_head = build_seek_head(&self.seek_entries);
        if let Some(fitted) = fit_in(&seek_head, SEEK_HEAD_RESERVE)? {
            return self.write_at(slot, &fitted.data);
        }

        // Too many entries for the reserved space: store the full SeekHead
        // at the end and point to it from the slot.
        let position = self.position;
        warn!(
            size = seek_head.encoded_size(),
            reserved = SEEK_HEAD_RESERVE,
            "SeekHead does not fit its reserved space, appending it"
        );
        self.write(&seek_head.to_bytes()?)?;
        let pointer = build_seek_head(&[SeekEntry::new(
            SEEK_HEAD,
            position - self.segment_data_start,
        )]);
        let fitted = fit_in(&pointer, SEEK_HEAD_RESERVE)?.ok_or_else(|| {
            MkvError::InvalidState("SeekHead pointer does not fit its slot".into())
        })?;
        self.write_at(slot, &fitted.data)
    }

    fn write_top_level(&mut self, element: &Element) -> Result<()> {
        if matches!(element.id, TRACKS | CHAPTERS | TAGS | ATTACHMENTS | CUES) {
            self.add_seek_entry(element.id, self.position);
        }
        self.write(&element.to_bytes()?)
    }

    fn write_fitted(&mut self, element: &Element, available: u64) -> Result<()> {
        let fitted = fit_in(element, available)?.ok_or_else(|| {
            MkvError::InvalidState(format!("element 0x{:X} does not fit its slot", element.id))
        })?;
        self.write(&fitted.data)
    }

    fn add_seek_entry(&mut self, id: u32, position: u64) {
        self.seek_entries
            .push(SeekEntry::new(id, position - self.segment_data_start));
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.output.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    fn write_at(&mut self, position: u64, data: &[u8]) -> Result<()> {
        self.output.seek(SeekFrom::Start(position))?;
        self.output.write_all(data)?;
        Ok(())
    }
}
