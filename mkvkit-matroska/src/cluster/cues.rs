//! Cue index collection.

use crate::element::Element;
use crate::elements::{
    CUES, CUE_CLUSTER_POSITION, CUE_DURATION, CUE_POINT, CUE_RELATIVE_POSITION, CUE_TIME,
    CUE_TRACK, CUE_TRACK_POSITIONS,
};
use crate::error::MkvError;
use mkvkit_core::HackFlags;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

// Header bounds: 4-byte Cues ID with an 8-byte size, 1-byte CuePoint ID
// with a 4-byte size.
const CUES_OVERHEAD: u64 = 12;
const CUE_POINT_OVERHEAD: u64 = 5;

/// Which blocks of a track get a cue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CueStrategy {
    /// No cues for the track.
    None,
    /// Key frames only.
    IFramesOnly,
    /// Every block.
    All,
}

impl FromStr for CueStrategy {
    type Err = MkvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CueStrategy::None),
            "iframes" | "iframes_only" | "key" => Ok(CueStrategy::IFramesOnly),
            "all" => Ok(CueStrategy::All),
            other => Err(MkvError::Other(format!("unknown cue strategy {:?}", other))),
        }
    }
}

impl CueStrategy {
    /// Whether a block with the given key frame flag is indexed.
    pub fn wants(self, key_frame: bool) -> bool {
        match self {
            CueStrategy::None => false,
            CueStrategy::IFramesOnly => key_frame,
            CueStrategy::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CueEntry {
    track: u64,
    cluster_position: u64,
    relative_position: u64,
    duration: Option<u64>,
}

/// Collects cue entries while clusters are written and renders the Cues
/// element.
#[derive(Debug, Default)]
pub struct CueWriter {
    points: BTreeMap<u64, Vec<CueEntry>>,
    estimated_size: u64,
    write_relative_position: bool,
    write_duration: bool,
}

impl CueWriter {
    /// Create a writer honoring the cue-related hacks.
    pub fn new(hacks: HackFlags) -> Self {
        Self {
            points: BTreeMap::new(),
            estimated_size: 0,
            write_relative_position: !hacks.contains(HackFlags::NO_CUE_RELATIVE_POSITION),
            write_duration: !hacks.contains(HackFlags::NO_CUE_DURATION),
        }
    }

    /// Record a cue for a block at `time` ticks.
    ///
    /// `cluster_position` is relative to the segment data start,
    /// `relative_position` to the cluster data start.
    pub fn add(
        &mut self,
        time: u64,
        track: u64,
        cluster_position: u64,
        relative_position: u64,
        duration: Option<u64>,
    ) {
        let entry = CueEntry {
            track,
            cluster_position,
            relative_position,
            duration,
        };
        let entry_size = self.track_positions(&entry).encoded_size();
        let entries = self.points.entry(time).or_default();
        if entries.iter().any(|e| e.track == track) {
            return;
        }
        if entries.is_empty() {
            self.estimated_size +=
                CUE_POINT_OVERHEAD + Element::unsigned(CUE_TIME, time).encoded_size();
        }
        self.estimated_size += entry_size;
        entries.push(entry);
    }

    /// Number of cue points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no cue was recorded.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Render the Cues element, or `None` when there is nothing to index.
    pub fn to_element(&self) -> Option<Element> {
        if self.points.is_empty() {
            return None;
        }
        let points = self
            .points
            .iter()
            .map(|(&time, entries)| {
                let mut children = vec![Element::unsigned(CUE_TIME, time)];
                children.extend(entries.iter().map(|entry| self.track_positions(entry)));
                Element::master(CUE_POINT, children)
            })
            .collect();
        Some(Element::master(CUES, points))
    }

    /// Upper bound of the encoded size of the Cues element, kept up to date
    /// as entries are added.
    pub fn estimated_size(&self) -> u64 {
        if self.points.is_empty() {
            0
        } else {
            CUES_OVERHEAD + self.estimated_size
        }
    }

    fn track_positions(&self, entry: &CueEntry) -> Element {
        let mut children = vec![
            Element::unsigned(CUE_TRACK, entry.track),
            Element::unsigned(CUE_CLUSTER_POSITION, entry.cluster_position),
        ];
        if self.write_relative_position {
            children.push(Element::unsigned(CUE_RELATIVE_POSITION, entry.relative_position));
        }
        if let (true, Some(duration)) = (self.write_duration, entry.duration) {
            children.push(Element::unsigned(CUE_DURATION, duration));
        }
        Element::master(CUE_TRACK_POSITIONS, children)
    }
}
