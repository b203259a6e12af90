//! Cluster and block assembly.
//!
//! [`ClusterAssembler`] takes [`Packet`]s from any number of tracks,
//! interleaves them by timestamp, groups them into Clusters of
//! SimpleBlocks and BlockGroups, collects Cues and writes complete
//! Matroska files through an [`OutputFactory`], switching files at split
//! points.
//!
//! ```text
//! accept_packet ─► per-track queues ─► (timestamp, arrival) merge
//!                                          │
//!                                          ▼
//!                               ClusterInProgress ─► flush ─► SegmentWriter
//! ```

mod block;
mod cues;
mod lacing;
mod output;
mod segment;
mod split;

pub use block::{BlockHeader, FLAG_DISCARDABLE, FLAG_INVISIBLE, FLAG_KEY_FRAME};
pub use cues::{CueStrategy, CueWriter};
pub use lacing::{lacing_header, parse_laced_frames, LacingKind, LacingMode, MAX_LACED_FRAMES};
pub use output::{FileOutputFactory, MemoryOutputFactory, OutputFactory};
pub use split::{SplitKind, SplitPoint, LAST_CHAPTER_TRIM_NS, SPU_GAP_THRESHOLD_NS};

use crate::ebml::EbmlHeader;
use crate::element::Element;
use crate::elements::{
    self, CODEC_ID, DEFAULT_DURATION, DURATION, FLAG_LACING, MUXING_APP, NEXT_UID, PREV_UID,
    SEGMENT_UID, TIMESTAMP_SCALE, TITLE, TRACK_ENTRY, TRACK_NUMBER, TRACK_TYPE, WRITING_APP,
};
use crate::error::{MkvError, Result};
use crate::schema::{normalize, NormalizeOptions};
use block::{lacing_candidate, render_block, BlockStyle, RenderedBlock};
use mkvkit_core::{HackFlags, MuxSession, Packet, TimestampScale};
use segment::{FileHeaders, FileLink, SegmentWriter};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, trace};

/// Default maximum number of blocks in one cluster.
pub const DEFAULT_MAX_BLOCKS_PER_CLUSTER: usize = 65_535;
/// Default maximum cluster duration (5 s).
pub const DEFAULT_MAX_CLUSTER_DURATION_NS: i64 = 5_000_000_000;
/// Default maximum cluster content size (5 MB).
pub const DEFAULT_MAX_CLUSTER_SIZE: u64 = 5 * 1024 * 1024;
/// Default tolerance for packets arriving behind the open cluster (200 ms).
pub const DEFAULT_LATE_TOLERANCE_NS: i64 = 200_000_000;
/// Default number of packets a track may queue before rendering is forced.
pub const DEFAULT_MAX_BUFFERED_PACKETS: usize = 256;

// Block header plus element header, per packet.
const BLOCK_OVERHEAD_ESTIMATE: u64 = 16;

/// Kind of a track, from its TrackType.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Video track.
    Video,
    /// Audio track.
    Audio,
    /// Subtitle track.
    Subtitle,
    /// Anything else.
    Other,
}

impl TrackKind {
    /// Map a TrackType value.
    pub fn from_track_type(track_type: u64) -> Self {
        match track_type {
            elements::TRACK_TYPE_VIDEO => TrackKind::Video,
            elements::TRACK_TYPE_AUDIO => TrackKind::Audio,
            elements::TRACK_TYPE_SUBTITLE => TrackKind::Subtitle,
            _ => TrackKind::Other,
        }
    }
}

/// Per-track overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackOptions {
    /// Cue strategy; defaults depend on the track kind.
    pub cue_strategy: Option<CueStrategy>,
    /// Lacing mode; audio tracks default to [`LacingMode::Auto`], other
    /// tracks are not laced.
    pub lacing: Option<LacingMode>,
    /// Sparse tracks do not hold back interleaving while their queue is
    /// empty. Subtitle tracks are sparse by default.
    pub sparse: Option<bool>,
}

impl TrackOptions {
    /// Set the cue strategy.
    pub fn with_cue_strategy(mut self, strategy: CueStrategy) -> Self {
        self.cue_strategy = Some(strategy);
        self
    }

    /// Set the lacing mode.
    pub fn with_lacing(mut self, lacing: LacingMode) -> Self {
        self.lacing = Some(lacing);
        self
    }

    /// Mark the track as sparse or not.
    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = Some(sparse);
        self
    }
}

/// Assembler configuration.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Nanoseconds per tick.
    pub timestamp_scale: TimestampScale,
    /// Flush a cluster once it holds this many blocks.
    pub max_blocks_per_cluster: usize,
    /// Flush a cluster once it spans this many nanoseconds.
    pub max_cluster_duration_ns: i64,
    /// Flush a cluster once its content reaches this many bytes.
    pub max_cluster_size: u64,
    /// How far behind the open cluster's newest packet a packet may arrive.
    pub late_tolerance_ns: i64,
    /// Start a new cluster when a track's packet begins more than this many
    /// nanoseconds after the end of its previous packet.
    pub gap_threshold_ns: Option<i64>,
    /// Packets a track may queue before rendering proceeds without the
    /// other tracks.
    pub max_buffered_packets: usize,
    /// Where to switch output files.
    pub split_points: Vec<SplitPoint>,
    /// Write PrevUID/NextUID into consecutive split files.
    pub link_files: bool,
    /// DocType of the EBML header.
    pub doc_type: String,
    /// MuxingApp written to Info.
    pub muxing_app: String,
    /// WritingApp written to Info.
    pub writing_app: String,
    /// Segment title.
    pub title: Option<String>,
    /// Per-track overrides by track number.
    pub track_options: HashMap<u64, TrackOptions>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            timestamp_scale: TimestampScale::DEFAULT,
            max_blocks_per_cluster: DEFAULT_MAX_BLOCKS_PER_CLUSTER,
            max_cluster_duration_ns: DEFAULT_MAX_CLUSTER_DURATION_NS,
            max_cluster_size: DEFAULT_MAX_CLUSTER_SIZE,
            late_tolerance_ns: DEFAULT_LATE_TOLERANCE_NS,
            gap_threshold_ns: None,
            max_buffered_packets: DEFAULT_MAX_BUFFERED_PACKETS,
            split_points: Vec::new(),
            link_files: false,
            doc_type: "matroska".to_string(),
            muxing_app: crate::APP_NAME.to_string(),
            writing_app: crate::APP_NAME.to_string(),
            title: None,
            track_options: HashMap::new(),
        }
    }
}

impl AssemblerConfig {
    /// Create a WebM assembler config.
    pub fn webm() -> Self {
        Self {
            doc_type: "webm".to_string(),
            ..Default::default()
        }
    }

    /// Split the output at `points`.
    pub fn with_split_points(mut self, points: Vec<SplitPoint>) -> Self {
        self.split_points = points;
        self
    }

    /// Link consecutive split files.
    pub fn with_link_files(mut self, link: bool) -> Self {
        self.link_files = link;
        self
    }

    /// Start new clusters on gaps larger than [`SPU_GAP_THRESHOLD_NS`].
    pub fn with_gap_detection(mut self) -> Self {
        self.gap_threshold_ns = Some(SPU_GAP_THRESHOLD_NS);
        self
    }

    /// Set the maximum cluster duration.
    pub fn with_max_cluster_duration(mut self, duration_ns: i64) -> Self {
        self.max_cluster_duration_ns = duration_ns;
        self
    }

    /// Set the segment title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Override options of one track.
    pub fn with_track_options(mut self, track_number: u64, options: TrackOptions) -> Self {
        self.track_options.insert(track_number, options);
        self
    }

    fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }
}

/// The static top-level elements of the files to write.
#[derive(Debug, Clone)]
pub struct SegmentTemplate {
    /// The Tracks tree.
    pub tracks: Element,
    /// Extra Info children (Title, DateUTC, SegmentFamily, ...). Fields the
    /// assembler maintains are ignored.
    pub info: Option<Element>,
    /// Chapters tree.
    pub chapters: Option<Element>,
    /// Tags tree.
    pub tags: Option<Element>,
    /// Attachments tree.
    pub attachments: Option<Element>,
}

impl SegmentTemplate {
    /// Create a template from a Tracks tree.
    pub fn new(tracks: Element) -> Self {
        Self {
            tracks,
            info: None,
            chapters: None,
            tags: None,
            attachments: None,
        }
    }

    /// Add Info children.
    pub fn with_info(mut self, info: Element) -> Self {
        self.info = Some(info);
        self
    }

    /// Add a Chapters tree.
    pub fn with_chapters(mut self, chapters: Element) -> Self {
        self.chapters = Some(chapters);
        self
    }

    /// Add a Tags tree.
    pub fn with_tags(mut self, tags: Element) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Add an Attachments tree.
    pub fn with_attachments(mut self, attachments: Element) -> Self {
        self.attachments = Some(attachments);
        self
    }
}

/// Assembler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssemblerState {
    /// No packet accepted yet.
    Idle,
    /// Collecting packets.
    Accumulating,
    /// Writing a cluster.
    FlushingCluster,
    /// Writing the trailing elements.
    FlushingFinal,
    /// Finished.
    Closed,
    /// An output error occurred; nothing more is accepted.
    Failed,
}

/// Statistics of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxStats {
    /// Bytes written over all files.
    pub bytes_written: u64,
    /// Cue points written over all files.
    pub cue_count: usize,
    /// Clusters written.
    pub cluster_count: usize,
    /// Blocks written (a laced block counts once).
    pub block_count: usize,
    /// Span from the first packet to the end of the last one.
    pub duration_ns: i64,
    /// Names of the completed files.
    pub files: Vec<String>,
}

#[derive(Debug)]
struct Queued {
    packet: Packet,
    sequence: u64,
}

#[derive(Debug)]
struct TrackState {
    kind: TrackKind,
    style: BlockStyle,
    cue_strategy: CueStrategy,
    sparse: bool,
    ended: bool,
    queue: VecDeque<Queued>,
    last_end_ns: Option<i64>,
}

#[derive(Debug)]
struct ClusterInProgress {
    timestamp_ticks: i64,
    start_ns: i64,
    max_ns: i64,
    end_ns: i64,
    packets: Vec<Queued>,
    content_size: u64,
    starts_with_candidate: bool,
    switch_before: bool,
    force_cue: bool,
}

impl ClusterInProgress {
    fn insert(&mut self, queued: Queued, end_ns: i64) {
        let key = (queued.packet.timestamp, queued.sequence);
        let index = self
            .packets
            .partition_point(|q| (q.packet.timestamp, q.sequence) <= key);
        self.max_ns = self.max_ns.max(queued.packet.timestamp);
        self.end_ns = self.end_ns.max(end_ns);
        self.content_size += queued.packet.size() as u64 + BLOCK_OVERHEAD_ESTIMATE;
        self.packets.insert(index, queued);
    }
}

#[derive(Debug, Default)]
struct SplitState {
    size: Option<u64>,
    duration: Option<SplitPoint>,
    timestamps: VecDeque<SplitPoint>,
    frames: VecDeque<SplitPoint>,
    pending: Option<SplitPoint>,
    file_start_ns: Option<i64>,
    reference_frames: i64,
}

impl SplitState {
    fn new(points: &[SplitPoint]) -> Self {
        let mut state = SplitState::default();
        let mut timestamps = Vec::new();
        let mut frames = Vec::new();
        for point in points {
            match point.kind {
                SplitKind::Size => state.size = u64::try_from(point.value).ok(),
                SplitKind::Duration => state.duration = Some(*point),
                SplitKind::Timestamp | SplitKind::Chapter => timestamps.push(*point),
                SplitKind::Frame => frames.push(*point),
            }
        }
        timestamps.sort_by_key(|p| p.value);
        frames.sort_by_key(|p| p.value);
        state.timestamps = timestamps.into();
        state.frames = frames.into();
        state
    }
}

/// Writes Matroska files from packets.
pub struct ClusterAssembler<O: OutputFactory> {
    factory: O,
    config: AssemblerConfig,
    session: MuxSession,
    headers: FileHeaders,
    tracks: BTreeMap<u64, TrackState>,
    reference_track: Option<u64>,
    state: AssemblerState,
    file: Option<(usize, SegmentWriter<O::Output>)>,
    file_index: usize,
    next_segment_uid: [u8; 16],
    prev_segment_uid: Option<[u8; 16]>,
    cluster: Option<ClusterInProgress>,
    sequence: u64,
    watermark_ns: i64,
    splits: SplitState,
    first_ns: Option<i64>,
    end_ns: i64,
    stats: MuxStats,
}

impl<O: OutputFactory> ClusterAssembler<O> {
    /// Create an assembler. The template's trees are normalised with the
    /// session's UID generator; no output is created before the first
    /// cluster is written.
    pub fn new(
        factory: O,
        config: AssemblerConfig,
        template: SegmentTemplate,
        mut session: MuxSession,
    ) -> Result<Self> {
        let hacks = session.hacks();
        let SegmentTemplate {
            mut tracks,
            info,
            chapters,
            tags,
            attachments,
        } = template;

        let options = NormalizeOptions::default();
        normalize(&mut tracks, options, &mut session);
        let mut normalized = |element: Option<Element>| {
            element.map(|mut e| {
                normalize(&mut e, options, &mut session);
                e
            })
        };
        let chapters = normalized(chapters);
        let tags = normalized(tags);
        let attachments = normalized(attachments);

        let track_states = build_tracks(&tracks, &config, hacks)?;
        let reference_track = track_states
            .iter()
            .find(|(_, t)| t.kind == TrackKind::Video)
            .map(|(&number, _)| number);

        let mut info_extras: Vec<Element> = info
            .map(|info| {
                info.children()
                    .iter()
                    .filter(|c| {
                        !matches!(
                            c.id,
                            SEGMENT_UID
                                | PREV_UID
                                | NEXT_UID
                                | TIMESTAMP_SCALE
                                | DURATION
                                | MUXING_APP
                                | WRITING_APP
                        )
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(title) = &config.title {
            info_extras.retain(|c| c.id != TITLE);
            info_extras.push(Element::utf8(TITLE, title.clone()));
        }

        let headers = FileHeaders {
            ebml: EbmlHeader {
                doc_type: config.doc_type.clone(),
                ..EbmlHeader::default()
            },
            scale: config.timestamp_scale,
            info_extras,
            muxing_app: config.muxing_app.clone(),
            writing_app: config.writing_app.clone(),
            tracks,
            chapters,
            tags,
            attachments,
            hacks,
            link_files: config.link_files,
        };

        debug!(
            tracks = track_states.len(),
            reference_track = ?reference_track,
            doc_type = %config.doc_type,
            "Assembler created"
        );

        let next_segment_uid = session.uids().segment_uid();
        Ok(Self {
            factory,
            splits: SplitState::new(&config.split_points),
            config,
            session,
            headers,
            tracks: track_states,
            reference_track,
            state: AssemblerState::Idle,
            file: None,
            file_index: 0,
            next_segment_uid,
            prev_segment_uid: None,
            cluster: None,
            sequence: 0,
            watermark_ns: i64::MIN,
            first_ns: None,
            end_ns: 0,
            stats: MuxStats::default(),
        })
    }

    /// Current state.
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Statistics so far.
    pub fn stats(&self) -> &MuxStats {
        &self.stats
    }

    /// The job's session.
    pub fn session(&self) -> &MuxSession {
        &self.session
    }

    /// Take back the output factory.
    pub fn into_factory(self) -> O {
        self.factory
    }

    /// Queue a packet. Packets are rendered once every active track has
    /// one queued, in `(timestamp, arrival)` order.
    pub fn accept_packet(&mut self, packet: Packet) -> Result<()> {
        self.ensure_accepting()?;
        let number = packet.track_number;
        let track = self
            .tracks
            .get_mut(&number)
            .ok_or(MkvError::TrackNotFound {
                track_number: number,
            })?;
        if track.ended {
            return Err(MkvError::InvalidState(format!(
                "packet for track {} after its end",
                number
            )));
        }
        if packet.timestamp < 0 {
            return Err(MkvError::InvalidBlock(format!(
                "negative timestamp {} on track {}",
                packet.timestamp, number
            )));
        }
        track.queue.push_back(Queued {
            packet,
            sequence: self.sequence,
        });
        self.sequence += 1;
        if self.state == AssemblerState::Idle {
            self.state = AssemblerState::Accumulating;
        }

        let result = self.drain(false);
        self.guard(result)
    }

    /// Declare that `track_number` produces no further packets.
    pub fn end_of_track(&mut self, track_number: u64) -> Result<()> {
        self.ensure_accepting()?;
        let track = self
            .tracks
            .get_mut(&track_number)
            .ok_or(MkvError::TrackNotFound { track_number })?;
        track.ended = true;
        debug!(track = track_number, "End of track");
        let result = self.drain(false);
        self.guard(result)
    }

    /// Render every queued packet and write the open cluster.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_accepting()?;
        let result = self.drain(true).and_then(|()| self.flush_cluster());
        self.guard(result)
    }

    /// Flush, write the trailing elements of the last file and close it.
    pub fn finish(&mut self) -> Result<MuxStats> {
        match self.state {
            AssemblerState::Closed => return Ok(self.stats.clone()),
            AssemblerState::Failed => {
                return Err(MkvError::InvalidState("assembler failed".into()))
            }
            _ => {}
        }
        let result = self.finish_inner();
        self.guard(result)
    }

    fn finish_inner(&mut self) -> Result<MuxStats> {
        self.drain(true)?;
        self.flush_cluster()?;
        self.state = AssemblerState::FlushingFinal;
        self.ensure_file()?;
        self.finish_file(false)?;
        self.state = AssemblerState::Closed;
        self.stats.duration_ns = self.first_ns.map_or(0, |first| self.end_ns - first);
        info!(
            files = self.stats.files.len(),
            clusters = self.stats.cluster_count,
            blocks = self.stats.block_count,
            bytes = self.stats.bytes_written,
            "Mux finished"
        );
        Ok(self.stats.clone())
    }

    fn ensure_accepting(&self) -> Result<()> {
        match self.state {
            AssemblerState::Idle | AssemblerState::Accumulating => Ok(()),
            state => Err(MkvError::InvalidState(format!(
                "cannot accept data in state {:?}",
                state
            ))),
        }
    }

    /// Output errors are fatal, and so is any error once a cluster or the
    /// file trailer is being written: its packets are already gone from the
    /// queues. The partial file is discarded.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        let Err(e) = &result else {
            return result;
        };
        let writing = matches!(
            self.state,
            AssemblerState::FlushingCluster | AssemblerState::FlushingFinal
        );
        if matches!(e, MkvError::Io(_)) || writing {
            tracing::error!(error = %e, state = ?self.state, "Mux failed, discarding partial file");
            self.state = AssemblerState::Failed;
            if let Some((index, writer)) = self.file.take() {
                self.factory.discard(index, writer.into_output());
            }
        }
        result
    }

    fn drain(&mut self, force: bool) -> Result<()> {
        loop {
            let blocked = !force
                && self
                    .tracks
                    .values()
                    .any(|t| !t.sparse && !t.ended && t.queue.is_empty());
            let overflowing = self
                .tracks
                .values()
                .any(|t| t.queue.len() > self.config.max_buffered_packets);
            if blocked && !overflowing {
                return Ok(());
            }

            let next = self
                .tracks
                .iter()
                .filter_map(|(&number, t)| {
                    t.queue
                        .front()
                        .map(|q| (q.packet.timestamp, q.sequence, number))
                })
                .min();
            let Some((_, _, number)) = next else {
                return Ok(());
            };
            let Some(queued) = self.tracks.get_mut(&number).and_then(|t| t.queue.pop_front())
            else {
                return Ok(());
            };
            self.place(queued)?;
        }
    }

    fn place(&mut self, queued: Queued) -> Result<()> {
        let ts = queued.packet.timestamp;
        let number = queued.packet.track_number;
        let (default_duration, last_end_ns) = match self.tracks.get(&number) {
            Some(track) => (track.style.default_duration, track.last_end_ns),
            None => {
                return Err(MkvError::TrackNotFound {
                    track_number: number,
                })
            }
        };
        let end_ns = ts + queued.packet.duration.or(default_duration).unwrap_or(0);

        let late = match &self.cluster {
            Some(cluster) if ts < cluster.max_ns => Some(
                ts >= cluster.start_ns && cluster.max_ns - ts <= self.config.late_tolerance_ns,
            ),
            None if ts < self.watermark_ns => Some(false),
            _ => None,
        };
        match (late, self.cluster.as_mut()) {
            (Some(true), Some(cluster)) => {
                debug!(track = number, timestamp = ts, "Late packet inserted");
                cluster.insert(queued, end_ns);
                self.note_placed(number, end_ns, ts);
                return Ok(());
            }
            (Some(_), _) => return Err(out_of_order(number, ts)),
            (None, _) => {}
        }

        let candidate = match self.reference_track {
            Some(reference) => number == reference && queued.packet.is_key_frame(),
            None => true,
        };
        self.cross_split_boundary(number, ts);
        if Some(number) == self.reference_track {
            self.splits.reference_frames += 1;
        }

        let must_flush = match &self.cluster {
            Some(cluster) => {
                (candidate && self.splits.pending.is_some())
                    || self.cluster_full(cluster, ts, last_end_ns)
            }
            None => false,
        };
        if must_flush {
            self.flush_cluster()?;
        }

        if self.cluster.is_none() {
            let switch = if candidate { self.splits.pending.take() } else { None };
            if switch.is_some() {
                self.splits.file_start_ns = Some(ts);
            }
            self.cluster = Some(ClusterInProgress {
                timestamp_ticks: self.config.timestamp_scale.to_ticks(ts),
                start_ns: ts,
                max_ns: ts,
                end_ns,
                packets: Vec::new(),
                content_size: 0,
                starts_with_candidate: candidate,
                switch_before: switch.is_some(),
                force_cue: switch.map_or(false, |p| p.is_cue_point),
            });
        }
        if let Some(cluster) = self.cluster.as_mut() {
            cluster.insert(queued, end_ns);
        }
        self.note_placed(number, end_ns, ts);
        Ok(())
    }

    fn note_placed(&mut self, number: u64, end_ns: i64, ts: i64) {
        if let Some(track) = self.tracks.get_mut(&number) {
            track.last_end_ns = Some(track.last_end_ns.map_or(end_ns, |e| e.max(end_ns)));
        }
        self.first_ns = Some(self.first_ns.map_or(ts, |first| first.min(ts)));
        self.end_ns = self.end_ns.max(end_ns);
    }

    fn cluster_full(&self, cluster: &ClusterInProgress, ts: i64, last_end_ns: Option<i64>) -> bool {
        let relative_ticks = self.config.timestamp_scale.to_ticks(ts) - cluster.timestamp_ticks;
        let gap = match (self.config.gap_threshold_ns, last_end_ns) {
            (Some(threshold), Some(end)) => ts - end > threshold,
            _ => false,
        };
        cluster.packets.len() >= self.config.max_blocks_per_cluster
            || ts - cluster.start_ns >= self.config.max_cluster_duration_ns
            || cluster.content_size >= self.config.max_cluster_size
            || relative_ticks > i16::MAX as i64
            || gap
    }

    /// Record a timestamp, chapter, frame or duration split point crossed by
    /// `ts`. A crossed point stays pending until a split candidate starts a
    /// cluster.
    fn cross_split_boundary(&mut self, number: u64, ts: i64) {
        let splits = &mut self.splits;
        let file_start = *splits.file_start_ns.get_or_insert(ts);
        let mut crossed = None;

        while splits.timestamps.front().map_or(false, |p| p.value <= ts) {
            crossed = splits.timestamps.pop_front();
        }
        if Some(number) == self.reference_track || self.reference_track.is_none() {
            while splits
                .frames
                .front()
                .map_or(false, |p| p.value <= splits.reference_frames)
            {
                crossed = splits.frames.pop_front();
            }
        }
        if let Some(duration) = splits.duration {
            if splits.pending.is_none() && ts - file_start >= duration.value {
                crossed = Some(duration);
            }
        }

        let Some(point) = crossed else {
            return;
        };
        debug!(kind = ?point.kind, value = point.value, timestamp = ts, "Split point crossed");
        splits.pending = Some(match splits.pending {
            Some(pending) => pending.with_cue_point(pending.is_cue_point || point.is_cue_point),
            None => point,
        });
    }

    fn flush_cluster(&mut self) -> Result<()> {
        let Some(cluster) = self.cluster.take() else {
            return Ok(());
        };
        self.state = AssemblerState::FlushingCluster;

        let scale = self.config.timestamp_scale;
        let start_ns = cluster.start_ns;
        let groups = self.lacing_groups(cluster.packets);
        let mut blocks: Vec<RenderedBlock> = Vec::with_capacity(groups.len());
        let mut cue_flags = Vec::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            let number = group.first().map_or(0, |p| p.track_number);
            let track = self.tracks.get(&number).ok_or(MkvError::TrackNotFound {
                track_number: number,
            })?;
            let block = render_block(group, cluster.timestamp_ticks, scale, &track.style)?;
            cue_flags.push(track.cue_strategy.wants(block.key_frame) || (i == 0 && cluster.force_cue));
            blocks.push(block);
        }

        let cluster_size: u64 = blocks.iter().map(RenderedBlock::encoded_size).sum::<u64>() + 16;
        let switch = match &self.file {
            Some((index, writer)) if writer.cluster_count() > 0 => {
                let over_size = self.splits.size.map_or(false, |limit| {
                    cluster.starts_with_candidate
                        && writer.position() + cluster_size + writer.cues_estimated_size() > limit
                });
                (cluster.switch_before || over_size).then_some((*index, over_size))
            }
            _ => None,
        };
        if let Some((index, over_size)) = switch {
            info!(
                file = %self.factory.name(index),
                size_limit = over_size,
                "Switching to the next output file"
            );
            self.finish_file(true)?;
            self.splits.file_start_ns = Some(start_ns);
        }

        let writer = self.ensure_file()?;
        writer.write_cluster(
            cluster.timestamp_ticks,
            &blocks,
            &cue_flags,
            (start_ns, cluster.end_ns),
        )?;
        trace!(
            timestamp = start_ns,
            blocks = blocks.len(),
            "Cluster flushed"
        );

        self.stats.cluster_count += 1;
        self.stats.block_count += blocks.len();
        self.watermark_ns = cluster.max_ns;
        self.state = AssemblerState::Accumulating;
        Ok(())
    }

    /// Group the cluster's packets into blocks. Consecutive packets of one
    /// track are laced when the track allows it and they follow each other
    /// exactly by the default duration.
    fn lacing_groups(&self, packets: Vec<Queued>) -> Vec<Vec<Packet>> {
        let mut groups: Vec<Vec<Packet>> = Vec::with_capacity(packets.len());
        let mut open: HashMap<u64, usize> = HashMap::new();
        for Queued { packet, .. } in packets {
            let number = packet.track_number;
            let Some(track) = self.tracks.get(&number) else {
                groups.push(vec![packet]);
                continue;
            };
            if !lacing_candidate(&packet, &track.style) {
                open.remove(&number);
                groups.push(vec![packet]);
                continue;
            }
            let default_duration = track.style.default_duration.unwrap_or(0);
            if let Some(group) = open.get(&number).and_then(|&i| groups.get_mut(i)) {
                let follows = group
                    .last()
                    .map_or(false, |last| last.timestamp + default_duration == packet.timestamp);
                if follows && group.len() < MAX_LACED_FRAMES {
                    group.push(packet);
                    continue;
                }
            }
            open.insert(number, groups.len());
            groups.push(vec![packet]);
        }
        groups
    }

    fn ensure_file(&mut self) -> Result<&mut SegmentWriter<O::Output>> {
        if self.file.is_none() {
            let index = self.file_index;
            let output = self.factory.create(index)?;
            let link = FileLink {
                segment_uid: self.next_segment_uid,
                prev_uid: self.prev_segment_uid.filter(|_| self.config.link_files),
            };
            self.next_segment_uid = self.session.uids().segment_uid();
            self.file_index += 1;
            let writer = SegmentWriter::new(output, self.headers.hacks, link);
            let (_, writer) = self.file.insert((index, writer));
            writer.begin(&self.headers)?;
            info!(file = %self.factory.name(index), "Output file started");
        }
        match self.file.as_mut() {
            Some((_, writer)) => Ok(writer),
            None => Err(MkvError::InvalidState("no open output file".into())),
        }
    }

    fn finish_file(&mut self, more_follow: bool) -> Result<()> {
        let Some((index, writer)) = self.file.as_mut() else {
            return Ok(());
        };
        let index = *index;
        let next_uid = (more_follow && self.config.link_files).then_some(self.next_segment_uid);
        let finished = writer.finish(&self.headers, next_uid)?;
        self.prev_segment_uid = Some(writer.segment_uid());

        if let Some((_, writer)) = self.file.take() {
            self.factory.close(index, writer.into_output())?;
        }
        self.stats.bytes_written += finished.bytes;
        self.stats.cue_count += finished.cues;
        let name = self.factory.name(index);
        info!(file = %name, bytes = finished.bytes, cues = finished.cues, "Output file finished");
        self.stats.files.push(name);
        Ok(())
    }
}

fn out_of_order(track_number: u64, timestamp_ns: i64) -> MkvError {
    debug!(track = track_number, timestamp = timestamp_ns, "Packet out of order");
    MkvError::OutOfOrder {
        track_number,
        timestamp_ns,
    }
}

fn build_tracks(
    tracks: &Element,
    config: &AssemblerConfig,
    hacks: HackFlags,
) -> Result<BTreeMap<u64, TrackState>> {
    let entries: Vec<&Element> = tracks.find_children(TRACK_ENTRY).collect();
    if entries.is_empty() {
        return Err(MkvError::MissingElement("TrackEntry".into()));
    }
    let has_video = entries
        .iter()
        .any(|e| e.child_unsigned(TRACK_TYPE) == Some(elements::TRACK_TYPE_VIDEO));

    let mut states = BTreeMap::new();
    for entry in entries {
        let number = entry
            .child_unsigned(TRACK_NUMBER)
            .filter(|&n| n > 0)
            .ok_or_else(|| MkvError::MissingElement("TrackNumber".into()))?;
        let kind = TrackKind::from_track_type(entry.child_unsigned(TRACK_TYPE).unwrap_or(0));
        if config.is_webm() {
            let codec = entry.child_str(CODEC_ID).unwrap_or_default();
            if !elements::is_webm_compatible_codec(codec) {
                return Err(MkvError::InvalidWebM(format!(
                    "track {} uses codec {:?}",
                    number, codec
                )));
            }
        }

        let options = config.track_options.get(&number).copied().unwrap_or_default();
        let lacing_allowed =
            !hacks.contains(HackFlags::NO_LACING) && entry.child_unsigned(FLAG_LACING) != Some(0);
        let lacing = match (options.lacing, kind) {
            (Some(mode), _) => Some(mode),
            (None, TrackKind::Audio) => Some(LacingMode::Auto),
            _ => None,
        }
        .filter(|_| lacing_allowed);
        let cue_strategy = options.cue_strategy.unwrap_or(match kind {
            TrackKind::Video => CueStrategy::IFramesOnly,
            TrackKind::Subtitle => CueStrategy::All,
            TrackKind::Audio if !has_video => CueStrategy::IFramesOnly,
            TrackKind::Audio | TrackKind::Other => CueStrategy::None,
        });

        let state = TrackState {
            kind,
            style: BlockStyle {
                default_duration: entry
                    .child_unsigned(DEFAULT_DURATION)
                    .and_then(|d| i64::try_from(d).ok()),
                lacing,
                simple_blocks: !hacks.contains(HackFlags::NO_SIMPLEBLOCKS),
            },
            cue_strategy,
            sparse: options.sparse.unwrap_or(kind == TrackKind::Subtitle),
            ended: false,
            queue: VecDeque::new(),
            last_end_ns: None,
        };
        if states.insert(number, state).is_some() {
            return Err(MkvError::InvalidState(format!(
                "duplicate track number {}",
                number
            )));
        }
    }
    Ok(states)
}
