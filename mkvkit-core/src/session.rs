//! Per-job muxing context.
//!
//! A [`MuxSession`] carries the state that would otherwise live in
//! process-wide tables: the engaged hack flags and the generator for the
//! unique IDs written into segments, tracks, chapters and attachments.
//! It is created once per job and handed to the assembler and the updater.

use bitflags::bitflags;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::{HashMap, HashSet};

bitflags! {
    /// Output-format tweaks the user can engage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HackFlags: u32 {
        /// Do not write a SeekHead.
        const NO_META_SEEK = 0x0001;
        /// Write a copy of Info and Tracks after the last Cluster.
        const WRITE_HEADERS_TWICE = 0x0002;
        /// Omit CueDuration from cue entries.
        const NO_CUE_DURATION = 0x0004;
        /// Omit CueRelativePosition from cue entries.
        const NO_CUE_RELATIVE_POSITION = 0x0008;
        /// Always use BlockGroups instead of SimpleBlocks.
        const NO_SIMPLEBLOCKS = 0x0010;
        /// Never lace frames.
        const NO_LACING = 0x0020;
    }
}

const HACK_NAMES: &[(&str, HackFlags)] = &[
    ("no_meta_seek", HackFlags::NO_META_SEEK),
    ("write_headers_twice", HackFlags::WRITE_HEADERS_TWICE),
    ("no_cue_duration", HackFlags::NO_CUE_DURATION),
    ("no_cue_relative_position", HackFlags::NO_CUE_RELATIVE_POSITION),
    ("no_simpleblocks", HackFlags::NO_SIMPLEBLOCKS),
    ("no_lacing", HackFlags::NO_LACING),
];

impl HackFlags {
    /// Look up a hack by its command-line name.
    pub fn from_hack_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase().replace('-', "_");
        HACK_NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, flag)| *flag)
    }

    /// All hack names understood by [`HackFlags::from_hack_name`].
    pub fn names() -> impl Iterator<Item = &'static str> {
        HACK_NAMES.iter().map(|(name, _)| *name)
    }
}

/// Namespaces for generated unique IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UidKind {
    /// TrackUID values.
    Track,
    /// ChapterUID values.
    Chapter,
    /// EditionUID values.
    Edition,
    /// FileUID values of attachments.
    Attachment,
}

/// Generates random non-zero unique IDs, never repeating within a kind.
#[derive(Debug)]
pub struct UidGenerator {
    rng: StdRng,
    issued: HashMap<UidKind, HashSet<u64>>,
}

impl UidGenerator {
    /// Create a generator seeded from system entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            issued: HashMap::new(),
        }
    }

    /// Create a deterministic generator.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            issued: HashMap::new(),
        }
    }

    /// Record a UID already present in the input so it is never handed out.
    ///
    /// Returns `false` if the UID was already known for this kind.
    pub fn register(&mut self, kind: UidKind, uid: u64) -> bool {
        self.issued.entry(kind).or_default().insert(uid)
    }

    /// Produce a fresh UID of the given kind.
    pub fn next(&mut self, kind: UidKind) -> u64 {
        loop {
            let candidate: u64 = self.rng.gen();
            if candidate != 0 && self.register(kind, candidate) {
                return candidate;
            }
        }
    }

    /// Produce a random 128-bit SegmentUID.
    pub fn segment_uid(&mut self) -> [u8; 16] {
        let mut uid = [0u8; 16];
        self.rng.fill_bytes(&mut uid);
        uid
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Context threaded through one muxing or editing job.
#[derive(Debug, Default)]
pub struct MuxSession {
    hacks: HackFlags,
    uids: UidGenerator,
}

impl MuxSession {
    /// Create a session with no hacks engaged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a deterministic UID generator.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            hacks: HackFlags::empty(),
            uids: UidGenerator::with_seed(seed),
        }
    }

    /// Engage a set of hacks (builder style).
    pub fn with_hacks(mut self, hacks: HackFlags) -> Self {
        self.hacks |= hacks;
        self
    }

    /// Engage additional hacks.
    pub fn engage(&mut self, hacks: HackFlags) {
        self.hacks |= hacks;
    }

    /// Currently engaged hacks.
    pub fn hacks(&self) -> HackFlags {
        self.hacks
    }

    /// Check whether every flag in `hack` is engaged.
    pub fn is_engaged(&self, hack: HackFlags) -> bool {
        self.hacks.contains(hack)
    }

    /// Access the UID generator.
    pub fn uids(&mut self) -> &mut UidGenerator {
        &mut self.uids
    }
}
