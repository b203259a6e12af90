//! Segment scanning.

use super::{parse_seek_head, ElementDescriptor, ElementIndex, SegmentHeader};
use crate::ebml::{EbmlHeader, ElementHeader};
use crate::element::{Anomaly, Element};
use crate::elements::{self, is_top_level, CLUSTER, EBML, SEEK_HEAD, SEGMENT, VOID};
use crate::error::{MkvError, Result};
use crate::file::SegmentIo;
use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace};

/// Buffer size of the forward scan that resolves unknown sizes.
const SCAN_CHUNK: usize = 64 * 1024;

impl<F: SegmentIo> ElementIndex<F> {
    /// Read the EBML Head and the Segment header.
    pub(super) fn read_head(&mut self) -> Result<()> {
        let header = ElementHeader::read_at(&mut self.io, 0)
            .map_err(|_| MkvError::NotMatroska { offset: 0 })?;
        if header.id != EBML {
            return Err(MkvError::NotMatroska { offset: 0 });
        }
        let size = header
            .size
            .ok_or_else(|| MkvError::InvalidEbmlHeader("EBML Head has unknown size".into()))?;
        let head_end = header.header_size as u64 + size;
        if head_end > self.file_length {
            return Err(MkvError::InvalidEbmlHeader(
                "EBML Head extends beyond the end of the file".into(),
            ));
        }

        let content = self.io.read_at(header.header_size as u64, size as usize)?;
        let mut anomalies = Vec::new();
        self.ebml_header = Element::decode_content(
            EBML,
            &content,
            header.header_size as u64,
            0,
            &mut anomalies,
        )?;
        self.anomalies.extend(anomalies);
        let doc = EbmlHeader::from_element(&self.ebml_header)?;
        if !doc.is_matroska() && !doc.is_webm() {
            self.push_anomaly(Anomaly::new(
                0,
                EBML,
                format!("unexpected DocType {:?}", doc.doc_type),
            ));
        }

        let mut pos = head_end;
        let segment = loop {
            if pos >= self.file_length {
                return Err(MkvError::MissingElement("Segment".into()));
            }
            let header = ElementHeader::read_at(&mut self.io, pos).map_err(|e| {
                MkvError::CorruptFile {
                    offset: pos,
                    reason: format!("unreadable element header after the EBML Head: {}", e),
                }
            })?;
            match (header.id, header.total_size()) {
                (VOID, Some(total)) => pos += total,
                (SEGMENT, _) => break header,
                _ => return Err(MkvError::MissingElement("Segment".into())),
            }
        };

        self.segment = SegmentHeader {
            position: pos,
            header_size: segment.header_size,
            size_length: segment.size_length,
            size: segment.size,
            data_start: pos + segment.header_size as u64,
        };
        self.segment_end = match self.segment.declared_end() {
            Some(end) if end > self.file_length => {
                self.push_anomaly(Anomaly::new(
                    pos,
                    SEGMENT,
                    format!(
                        "segment declares {} bytes but the file ends at {}",
                        end - self.segment.data_start,
                        self.file_length
                    ),
                ));
                self.file_length
            }
            Some(end) => end,
            None => self.file_length,
        };
        debug!(
            data_start = self.segment.data_start,
            size = ?self.segment.size,
            "found segment"
        );
        Ok(())
    }

    /// Walk every top-level element of the segment.
    pub(super) fn scan_full(&mut self) -> Result<()> {
        let mut pos = self.segment.data_start;
        while pos < self.segment_end {
            self.check_cancelled()?;
            let Some(descriptor) = self.read_descriptor(pos)? else {
                break;
            };
            trace!(
                id = format_args!("0x{:X}", descriptor.id),
                position = descriptor.position,
                size = descriptor.size,
                "element"
            );
            pos = descriptor.end();
            self.descriptors.push(descriptor);
        }
        Ok(())
    }

    /// Walk up to the first Cluster, then add the elements the SeekHeads
    /// point at. Returns `false` when the result cannot be trusted.
    pub(super) fn scan_fast(&mut self) -> Result<bool> {
        let mut pos = self.segment.data_start;
        let mut first_cluster = None;
        while pos < self.segment_end {
            self.check_cancelled()?;
            let Some(descriptor) = self.read_descriptor(pos)? else {
                break;
            };
            pos = descriptor.end();
            self.descriptors.push(descriptor);
            if descriptor.id == CLUSTER {
                first_cluster = Some(descriptor);
                break;
            }
        }
        let Some(first_cluster) = first_cluster else {
            return Ok(true);
        };
        if !first_cluster.size_known {
            return Ok(false);
        }

        let mut pending: Vec<u64> = self
            .descriptors
            .iter()
            .filter(|d| d.id == SEEK_HEAD)
            .map(|d| d.position)
            .collect();
        if pending.is_empty() {
            // Nothing describes what follows the first cluster.
            return Ok(false);
        }
        let mut visited = BTreeSet::new();
        let mut entries = Vec::new();

        while let Some(position) = pending.pop() {
            if !visited.insert(position) {
                continue;
            }
            let descriptor = match self.descriptors.iter().find(|d| d.position == position) {
                Some(d) => *d,
                None => match self.verified_descriptor(position, SEEK_HEAD)? {
                    Some(d) => {
                        self.descriptors.push(d);
                        d
                    }
                    None => return Ok(false),
                },
            };
            let seek_head = match self.read_element(&descriptor) {
                Ok(seek_head) => seek_head,
                Err(MkvError::CorruptElement { .. }) => return Ok(false),
                Err(e) => return Err(e),
            };
            for entry in parse_seek_head(&seek_head) {
                let absolute = self.segment.absolute(entry.position);
                if entry.id == SEEK_HEAD {
                    pending.push(absolute);
                } else {
                    entries.push((entry.id, absolute));
                }
            }
        }

        for (id, position) in entries {
            self.check_cancelled()?;
            if let Some(existing) = self.descriptors.iter().find(|d| d.position == position) {
                if existing.id != id {
                    return Ok(false);
                }
                continue;
            }
            if position < first_cluster.position {
                // The sequential walk saw everything before the first cluster.
                return Ok(false);
            }
            match self.verified_descriptor(position, id)? {
                Some(descriptor) => self.descriptors.push(descriptor),
                None => return Ok(false),
            }
        }

        self.descriptors.sort_by_key(|d| d.position);
        let overlapping = self
            .descriptors
            .windows(2)
            .any(|pair| pair[0].end() > pair[1].position);
        Ok(!overlapping)
    }

    /// Descriptor of a known-size `id` element at `position`, or `None` if
    /// something else is found there.
    fn verified_descriptor(&mut self, position: u64, id: u32) -> Result<Option<ElementDescriptor>> {
        if position >= self.segment_end {
            return Ok(None);
        }
        let Ok(header) = ElementHeader::read_at(&mut self.io, position) else {
            return Ok(None);
        };
        let Some(size) = header.size else {
            return Ok(None);
        };
        let end = position + header.header_size as u64 + size;
        if header.id != id || end > self.segment_end {
            return Ok(None);
        }
        Ok(Some(ElementDescriptor {
            id,
            position,
            header_size: header.header_size,
            size_length: header.size_length,
            size,
            size_known: true,
        }))
    }

    /// Read the descriptor of the top-level element at `pos`.
    ///
    /// Returns `None` when fewer bytes remain than any element header needs.
    fn read_descriptor(&mut self, pos: u64) -> Result<Option<ElementDescriptor>> {
        if self.segment_end - pos < 2 {
            self.push_anomaly(Anomaly::new(pos, SEGMENT, "trailing byte at end of segment"));
            return Ok(None);
        }

        let header = ElementHeader::read_at(&mut self.io, pos).map_err(|e| MkvError::CorruptFile {
            offset: pos,
            reason: format!("malformed top-level element: {}", e),
        })?;
        let data = pos + header.header_size as u64;
        let (size, size_known) = match header.size {
            Some(size) => {
                let fits = data
                    .checked_add(size)
                    .map_or(false, |end| end <= self.segment_end);
                if !fits {
                    return Err(MkvError::CorruptFile {
                        offset: pos,
                        reason: format!(
                            "{} of {} bytes extends beyond the end of the segment",
                            elements::element_name(header.id),
                            size
                        ),
                    });
                }
                (size, true)
            }
            None => {
                let end = self.find_next_top_level(data)?;
                debug!(
                    id = format_args!("0x{:X}", header.id),
                    position = pos,
                    implied_size = end - data,
                    "resolved unknown size"
                );
                (end - data, false)
            }
        };

        Ok(Some(ElementDescriptor {
            id: header.id,
            position: pos,
            header_size: header.header_size,
            size_length: header.size_length,
            size,
            size_known,
        }))
    }

    /// Scan forward from `start` for the next plausible top-level element
    /// and return its position, or the segment end if none is found.
    ///
    /// A candidate must carry a four-byte top-level ID, a readable size
    /// field, and (when its size is known) lie entirely inside the segment.
    fn find_next_top_level(&mut self, start: u64) -> Result<u64> {
        let end = self.segment_end;
        let mut buf = vec![0u8; SCAN_CHUNK + 3];
        let mut chunk_start = start;

        while chunk_start < end {
            self.check_cancelled()?;
            let len = (end - chunk_start).min(buf.len() as u64) as usize;
            self.io.seek(SeekFrom::Start(chunk_start))?;
            self.io.read_exact(&mut buf[..len])?;

            let candidates = len.saturating_sub(3).min(SCAN_CHUNK);
            for i in 0..candidates {
                if !(0x10..=0x1F).contains(&buf[i]) {
                    continue;
                }
                let id = u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
                if !is_top_level(id) {
                    continue;
                }
                let candidate = chunk_start + i as u64;
                if self.plausible_element_at(candidate)? {
                    return Ok(candidate);
                }
            }
            chunk_start += SCAN_CHUNK as u64;
        }

        Ok(end)
    }

    fn plausible_element_at(&mut self, position: u64) -> Result<bool> {
        let Ok(header) = ElementHeader::read_at(&mut self.io, position) else {
            return Ok(false);
        };
        Ok(match header.size {
            Some(size) => (position + header.header_size as u64)
                .checked_add(size)
                .map_or(false, |e| e <= self.segment_end),
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::ParseMode;
    use super::*;
    use crate::ebml::write_void;
    use crate::element::Element;
    use crate::elements::*;
    use std::io::Cursor;

    fn head() -> Vec<u8> {
        EbmlHeader::default().to_element().to_bytes().unwrap()
    }

    fn segment(children: &[u8], size: Option<u64>) -> Vec<u8> {
        let mut out = head();
        out.extend(ElementHeader::encode_with_size_length(SEGMENT, size, 8).unwrap());
        out.extend_from_slice(children);
        out
    }

    fn info() -> Vec<u8> {
        Element::master(INFO, vec![Element::unsigned(TIMESTAMP_SCALE, 1_000_000)])
            .to_bytes()
            .unwrap()
    }

    fn cluster(ts: u64) -> Element {
        Element::master(
            CLUSTER,
            vec![
                Element::unsigned(TIMESTAMP, ts),
                Element::binary(SIMPLE_BLOCK, vec![0x81, 0, 0, 0x80, 1, 2, 3]),
            ],
        )
    }

    #[test]
    fn test_not_matroska() {
        let err = ElementIndex::from_io(Cursor::new(b"RIFF\0\0\0\0WAVE".to_vec()), ParseMode::Full)
            .unwrap_err();
        assert!(matches!(err, MkvError::NotMatroska { offset: 0 }));
    }

    #[test]
    fn test_missing_segment() {
        let err = ElementIndex::from_io(Cursor::new(head()), ParseMode::Full).unwrap_err();
        assert!(matches!(err, MkvError::MissingElement(_)));
    }

    #[test]
    fn test_full_scan_with_void() {
        let mut children = info();
        write_void(&mut children, 20).unwrap();
        children.extend(cluster(0).to_bytes().unwrap());
        let data = segment(&children, Some(children.len() as u64));

        let index = ElementIndex::from_io(Cursor::new(data), ParseMode::Full).unwrap();
        let ids: Vec<u32> = index.descriptors().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![INFO, VOID, CLUSTER]);
        assert!(index.anomalies().is_empty());
    }

    #[test]
    fn test_unknown_size_cluster_implied() {
        let inner = cluster(0);
        let content = {
            let mut out = Vec::new();
            for child in inner.children() {
                child.encode(&mut out).unwrap();
            }
            out
        };
        let mut children = info();
        children.extend(ElementHeader::encode(CLUSTER, None).unwrap());
        children.extend_from_slice(&content);
        let cues = Element::master(CUES, vec![]).to_bytes().unwrap();
        children.extend_from_slice(&cues);
        let data = segment(&children, None);

        let index = ElementIndex::from_io(Cursor::new(data), ParseMode::Full).unwrap();
        let cluster = index.descriptors()[1];
        assert_eq!(cluster.id, CLUSTER);
        assert!(!cluster.size_known);
        assert_eq!(cluster.size, content.len() as u64);
        assert_eq!(index.descriptors()[2].id, CUES);
    }

    #[test]
    fn test_overrun_is_fatal() {
        let mut children = info();
        children.extend(ElementHeader::encode(TAGS, Some(500)).unwrap());
        children.extend_from_slice(&[0u8; 10]);
        let data = segment(&children, None);

        let err = ElementIndex::from_io(Cursor::new(data), ParseMode::Full).unwrap_err();
        assert!(matches!(err, MkvError::CorruptFile { .. }));
    }

    #[test]
    fn test_cancelled_scan() {
        let data = segment(&info(), None);
        let token = mkvkit_core::CancellationToken::new();
        token.cancel();
        let mut index =
            ElementIndex::new(Cursor::new(data), ParseMode::Full).with_cancellation(token);
        assert!(matches!(index.process(), Err(MkvError::Aborted)));
    }
}
