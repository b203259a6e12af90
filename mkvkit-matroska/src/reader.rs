//! Packet source for existing Matroska files.
//!
//! [`MatroskaReader`] sits on top of an [`ElementIndex`] and decodes the
//! blocks of every Cluster, in file order, into [`Packet`]s. Laced blocks
//! yield one packet per frame.

use crate::analyzer::{ElementDescriptor, ElementIndex, ParseMode};
use crate::cluster::{parse_laced_frames, BlockHeader, LacingKind};
use crate::element::Element;
use crate::elements::{
    ATTACHMENTS, BLOCK, BLOCK_DURATION, BLOCK_GROUP, CHAPTERS, CLUSTER, DEFAULT_DURATION,
    DISCARD_PADDING, INFO, REFERENCE_BLOCK, SIMPLE_BLOCK, TAGS, TIMESTAMP, TRACKS, TRACK_ENTRY,
    TRACK_NUMBER,
};
use crate::error::{MkvError, Result};
use crate::file::{SegmentFile, SegmentIo};
use mkvkit_core::{Packet, PacketFlags, Packetizer, TimestampScale};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, warn};

/// Reads the packets of a Matroska file.
pub struct MatroskaReader<F: SegmentIo> {
    index: ElementIndex<F>,
    scale: TimestampScale,
    tracks: Element,
    info: Option<Element>,
    chapters: Option<Element>,
    tags: Option<Element>,
    attachments: Option<Element>,
    default_durations: HashMap<u64, i64>,
    clusters: Vec<ElementDescriptor>,
    next_cluster: usize,
    pending: VecDeque<Packet>,
}

impl MatroskaReader<SegmentFile> {
    /// Open a file with a full scan.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(ElementIndex::open(path, ParseMode::Full)?)
    }
}

impl<F: SegmentIo> MatroskaReader<F> {
    /// Create a reader from a processed index. Fails when the file has no
    /// Tracks.
    pub fn new(mut index: ElementIndex<F>) -> Result<Self> {
        index.ensure_full()?;
        let scale = index.timestamp_scale()?;
        let tracks = index
            .read_all(TRACKS)?
            .ok_or_else(|| MkvError::MissingElement("Tracks".into()))?;
        let info = index.read_all(INFO)?;
        let chapters = index.read_all(CHAPTERS)?;
        let tags = index.read_all(TAGS)?;
        let attachments = index.read_all(ATTACHMENTS)?;

        let default_durations = tracks
            .find_children(TRACK_ENTRY)
            .filter_map(|entry| {
                let number = entry.child_unsigned(TRACK_NUMBER)?;
                let duration = entry.child_unsigned(DEFAULT_DURATION)?;
                Some((number, i64::try_from(duration).ok()?))
            })
            .collect();
        let clusters: Vec<ElementDescriptor> = index
            .find_all(CLUSTER)
            .into_iter()
            .filter_map(|i| index.descriptor(i).copied())
            .collect();

        debug!(
            clusters = clusters.len(),
            scale = scale.as_nanos(),
            "Reader ready"
        );
        Ok(Self {
            index,
            scale,
            tracks,
            info,
            chapters,
            tags,
            attachments,
            default_durations,
            clusters,
            next_cluster: 0,
            pending: VecDeque::new(),
        })
    }

    /// The Tracks tree.
    pub fn tracks(&self) -> &Element {
        &self.tracks
    }

    /// The Info tree.
    pub fn info(&self) -> Option<&Element> {
        self.info.as_ref()
    }

    /// The Chapters tree.
    pub fn chapters(&self) -> Option<&Element> {
        self.chapters.as_ref()
    }

    /// The Tags tree.
    pub fn tags(&self) -> Option<&Element> {
        self.tags.as_ref()
    }

    /// The Attachments tree.
    pub fn attachments(&self) -> Option<&Element> {
        self.attachments.as_ref()
    }

    /// Nanoseconds per tick of the file.
    pub fn timestamp_scale(&self) -> TimestampScale {
        self.scale
    }

    /// The underlying index.
    pub fn index(&self) -> &ElementIndex<F> {
        &self.index
    }

    fn decode_cluster(&mut self, cluster: &Element, offset: u64) -> Result<()> {
        let cluster_ticks = cluster
            .child_unsigned(TIMESTAMP)
            .ok_or(MkvError::ClusterMissingTimestamp { offset })?;
        let cluster_ticks = i64::try_from(cluster_ticks).map_err(|_| MkvError::CorruptFile {
            offset,
            reason: format!("cluster timestamp {} out of range", cluster_ticks),
        })?;

        for child in cluster.children() {
            match child.id {
                SIMPLE_BLOCK => {
                    let data = child.as_binary().unwrap_or_default();
                    self.decode_block(data, cluster_ticks, None)?;
                }
                BLOCK_GROUP => {
                    let Some(data) = child.child_binary(BLOCK) else {
                        warn!("BlockGroup without a Block");
                        continue;
                    };
                    let group = GroupFields {
                        duration: child.child_unsigned(BLOCK_DURATION),
                        references: child
                            .find_children(REFERENCE_BLOCK)
                            .filter_map(Element::as_signed)
                            .collect(),
                        discard_padding: child.child_signed(DISCARD_PADDING),
                    };
                    self.decode_block(data, cluster_ticks, Some(group))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn decode_block(
        &mut self,
        data: &[u8],
        cluster_ticks: i64,
        group: Option<GroupFields>,
    ) -> Result<()> {
        let (header, header_len) = BlockHeader::parse(data)?;
        let ticks = cluster_ticks + header.relative_timestamp as i64;
        let timestamp = self.scale.to_nanos(ticks);
        let frames = parse_laced_frames(&data[header_len..], header.lacing())?;
        let count = frames.len() as i64;

        let default_duration = self.default_durations.get(&header.track_number).copied();
        let block_duration = group
            .as_ref()
            .and_then(|g| g.duration)
            .and_then(|d| i64::try_from(d).ok())
            .map(|d| self.scale.to_nanos(d));
        let frame_duration = match (block_duration, header.lacing()) {
            (Some(total), LacingKind::None) => Some(total),
            (Some(total), _) => Some(total / count),
            (None, _) => default_duration,
        };

        let key_frame = match &group {
            Some(group) => group.references.is_empty(),
            None => header.is_key_frame(),
        };
        let mut flags = PacketFlags::empty();
        if header.is_invisible() {
            flags |= PacketFlags::INVISIBLE;
        }
        if group.is_none() && header.is_discardable() {
            flags |= PacketFlags::DISCARDABLE;
        }

        for (i, frame) in frames.into_iter().enumerate() {
            let offset = frame_duration.map_or(0, |d| d * i as i64);
            let mut packet = Packet::new(header.track_number, timestamp + offset, frame)
                .with_flags(flags)
                .with_key_frame(key_frame && i == 0);
            if let Some(duration) = frame_duration {
                packet = packet.with_duration(duration);
            }
            if let Some(group) = &group {
                for &reference in &group.references {
                    let target = self.scale.to_nanos(ticks + reference);
                    packet = if reference < 0 {
                        packet.with_back_reference(target)
                    } else {
                        packet.with_forward_reference(target)
                    };
                }
                if let Some(padding) = group.discard_padding {
                    packet = packet.with_discard_padding(padding);
                }
            }
            self.pending.push_back(packet);
        }
        Ok(())
    }
}

struct GroupFields {
    duration: Option<u64>,
    references: Vec<i64>,
    discard_padding: Option<i64>,
}

impl<F: SegmentIo> Packetizer for MatroskaReader<F> {
    fn track_numbers(&self) -> Vec<u64> {
        self.tracks
            .find_children(TRACK_ENTRY)
            .filter_map(|entry| entry.child_unsigned(TRACK_NUMBER))
            .collect()
    }

    fn next_packet(&mut self) -> mkvkit_core::Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }
            let Some(descriptor) = self.clusters.get(self.next_cluster).copied() else {
                return Ok(None);
            };
            self.next_cluster += 1;
            let cluster = self.index.read_element(&descriptor)?;
            self.decode_cluster(&cluster, descriptor.position)?;
        }
    }
}
