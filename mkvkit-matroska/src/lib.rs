//! # mkvkit-matroska
//!
//! Matroska and WebM structure editing and muxing.
//!
//! This crate provides:
//! - **EBML primitives** - VINT and element header encoding, EbmlVoid synthesis
//! - **Element Index** - an ordered map of a file's top-level elements, built
//!   from the SeekHead or by a full scan, tolerant of unknown sizes
//! - **In-place updater** - rewrite or remove metadata elements (Tags,
//!   Chapters, Attachments, Info, Tracks) with minimal file rewriting,
//!   keeping the SeekHead and Segment size consistent
//! - **Cluster assembler** - interleave packets into Clusters of SimpleBlocks
//!   and BlockGroups, collect Cues, split into several files
//! - **Reader** - packets of an existing file, for remuxing
//!
//! ## Example: Replacing the tags of a file
//!
//! ```no_run
//! use mkvkit_matroska::{ElementIndex, ParseMode, UpdateOptions};
//! use mkvkit_matroska::elements::TAGS;
//!
//! let mut index = ElementIndex::open("movie.mkv", ParseMode::Fast)?;
//! if let Some(tags) = index.read_all(TAGS)? {
//!     let report = index.update_element(&tags, UpdateOptions::default())?;
//!     println!("{:?}", report.outcome);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Example: Remuxing with a size split
//!
//! ```no_run
//! use mkvkit_core::{MuxSession, Packetizer};
//! use mkvkit_matroska::{
//!     AssemblerConfig, ClusterAssembler, FileOutputFactory, MatroskaReader, SegmentTemplate,
//!     SplitPoint,
//! };
//!
//! let mut reader = MatroskaReader::open("input.mkv")?;
//! let config = AssemblerConfig::default().with_split_points(SplitPoint::parse("size:700M")?);
//! let template = SegmentTemplate::new(reader.tracks().clone());
//! let factory = FileOutputFactory::new("output.mkv").numbered(true);
//! let mut mux = ClusterAssembler::new(factory, config, template, MuxSession::new())?;
//!
//! while let Some(packet) = reader.next_packet()? {
//!     mux.accept_packet(packet)?;
//! }
//! let stats = mux.finish()?;
//! println!("{} files", stats.files.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Matroska Element Structure
//!
//! ```text
//! EBML Header
//! Segment
//! ├── SeekHead (positions of the other top-level elements)
//! ├── Info
//! ├── Tracks
//! ├── Chapters
//! ├── Tags
//! ├── Attachments
//! ├── Cluster
//! │   ├── Timestamp
//! │   └── SimpleBlock / BlockGroup
//! ├── Cues
//! └── EbmlVoid (free space, anywhere)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod analyzer;
pub mod cluster;
pub mod ebml;
pub mod element;
pub mod elements;
pub mod error;
pub mod file;
pub mod reader;
pub mod schema;
pub mod updater;

pub use analyzer::{ElementDescriptor, ElementIndex, ParseMode, SegmentHeader};
pub use cluster::{
    AssemblerConfig, AssemblerState, ClusterAssembler, CueStrategy, FileOutputFactory,
    LacingMode, MemoryOutputFactory, MuxStats, OutputFactory, SegmentTemplate, SplitKind,
    SplitPoint, TrackKind, TrackOptions,
};
pub use ebml::{EbmlHeader, ElementHeader};
pub use element::{Anomaly, Element, ElementValue};
pub use error::{MkvError, Result};
pub use file::{Access, SegmentFile, SegmentIo};
pub use reader::MatroskaReader;
pub use updater::{PlacementStrategy, UpdateError, UpdateOptions, UpdateOutcome, UpdateReport};

use std::io::Read;

/// Written as MuxingApp and WritingApp.
pub const APP_NAME: &str = concat!("mkvkit ", env!("CARGO_PKG_VERSION"));

/// Check if data starts with the EBML header signature.
pub fn is_mkv_signature(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == [0x1A, 0x45, 0xDF, 0xA3]
}

/// Read the EBML header at the start of `reader` and return its DocType,
/// `"matroska"` or `"webm"` for the files this crate handles.
pub fn detect_doc_type<R: Read>(reader: &mut R) -> Result<String> {
    let header = ElementHeader::read(reader)?;
    if header.id != elements::EBML {
        return Err(MkvError::InvalidEbmlHeader(format!(
            "expected the EBML ID, found 0x{:X}",
            header.id
        )));
    }
    // The EBML header is a handful of small children.
    let size = header
        .size
        .filter(|&size| size <= 1024)
        .ok_or_else(|| MkvError::InvalidEbmlHeader("implausible header size".into()))?;
    let mut content = vec![0u8; size as usize];
    reader.read_exact(&mut content)?;
    let mut anomalies = Vec::new();
    let element = Element::decode_content(
        elements::EBML,
        &content,
        header.header_size as u64,
        0,
        &mut anomalies,
    )?;
    Ok(EbmlHeader::from_element(&element)?.doc_type)
}
