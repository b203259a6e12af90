//! Matroska file inspection command.

use crate::{format_size, OutputMode};
use clap::Args;
use console::style;
use mkvkit_core::FormattedTimestamp;
use mkvkit_matroska::elements::*;
use mkvkit_matroska::{Anomaly, Element, ElementIndex, ParseMode, SegmentIo, TrackKind};
use serde::Serialize;
use std::path::PathBuf;

use super::Status;

/// One top-level element, or a run of identical ones.
#[derive(Debug, Clone, Serialize)]
pub struct ElementSummary {
    /// Element name.
    pub name: &'static str,
    /// Element ID in hex.
    pub id: String,
    /// Absolute position of the first element of the run.
    pub position: u64,
    /// Total size of the run in bytes.
    pub size: u64,
    /// Number of elements in the run.
    pub count: usize,
    /// Whether every size field was known.
    pub size_known: bool,
}

/// Track information for display.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    /// Track number.
    pub number: u64,
    /// Track kind.
    pub kind: TrackKind,
    /// CodecID.
    pub codec: String,
    /// Track name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Video-specific: width.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    /// Video-specific: height.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    /// Audio-specific: sampling frequency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_frequency: Option<f64>,
    /// Audio-specific: channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u64>,
    /// Default frame duration in nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_duration_ns: Option<u64>,
}

/// Matroska file information.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    /// File path.
    pub file: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// EBML DocType.
    pub doc_type: String,
    /// How the index was built.
    pub parse_mode: ParseMode,
    /// Absolute position of the Segment content.
    pub segment_data_start: u64,
    /// Declared Segment size, absent when unknown.
    pub segment_size: Option<u64>,
    /// Segment title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Duration in nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ns: Option<i64>,
    /// Top-level elements in file order.
    pub elements: Vec<ElementSummary>,
    /// Tracks.
    pub tracks: Vec<TrackSummary>,
    /// Number of chapter atoms across all editions.
    pub chapters: usize,
    /// Number of Tag elements.
    pub tags: usize,
    /// Attached file names.
    pub attachments: Vec<String>,
    /// Structural problems found while indexing.
    pub anomalies: Vec<Anomaly>,
}

/// Inspect a Matroska file.
#[derive(Args, Debug)]
pub struct CmdInfo {
    /// Path to the Matroska file.
    pub file: PathBuf,

    /// Scan every element instead of trusting the SeekHead past the first
    /// Cluster.
    #[arg(long)]
    pub full: bool,
}

impl CmdInfo {
    /// Execute the info command.
    pub fn run(&self, mode: OutputMode) -> anyhow::Result<Status> {
        if !self.file.exists() {
            anyhow::bail!("File not found: {}", self.file.display());
        }

        let parse_mode = if self.full {
            ParseMode::Full
        } else {
            ParseMode::Fast
        };
        let mut index = ElementIndex::open(&self.file, parse_mode)?;
        let summary = summarize(&mut index, self.file.display().to_string())?;

        match mode {
            OutputMode::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            OutputMode::Quiet => {}
            OutputMode::Normal | OutputMode::Verbose => print_summary(&summary),
        }

        Ok(Status::from_anomalies(summary.anomalies.len()))
    }
}

/// Collect the summary of an indexed file.
pub fn summarize<F: SegmentIo>(
    index: &mut ElementIndex<F>,
    file: String,
) -> anyhow::Result<FileSummary> {
    let scale = index.timestamp_scale()?;
    let info = index.read_all(INFO)?;
    let tracks = index.read_all(TRACKS)?;
    let chapters = index.read_all(CHAPTERS)?;
    let tags = index.read_all(TAGS)?;
    let attachments = index.read_all(ATTACHMENTS)?;

    let duration_ns = info
        .as_ref()
        .and_then(|info| info.child_float(DURATION))
        .map(|ticks| (ticks * scale.as_nanos() as f64).round() as i64);

    Ok(FileSummary {
        file,
        size_bytes: index.file_length(),
        doc_type: index
            .ebml_header()
            .child_str(DOC_TYPE)
            .unwrap_or("matroska")
            .to_string(),
        parse_mode: index.parse_mode(),
        segment_data_start: index.segment().data_start,
        segment_size: index.segment().size,
        title: info
            .as_ref()
            .and_then(|info| info.child_str(TITLE))
            .map(str::to_string),
        duration_ns,
        elements: element_runs(index),
        tracks: tracks
            .iter()
            .flat_map(|tracks| tracks.find_children(TRACK_ENTRY))
            .map(track_summary)
            .collect(),
        chapters: chapters
            .iter()
            .flat_map(|chapters| chapters.find_children(EDITION_ENTRY))
            .map(count_atoms)
            .sum(),
        tags: tags.map_or(0, |tags| tags.find_children(TAG).count()),
        attachments: attachments
            .iter()
            .flat_map(|a| a.find_children(ATTACHED_FILE))
            .filter_map(|file| file.child_str(FILE_NAME))
            .map(str::to_string)
            .collect(),
        anomalies: index.anomalies().to_vec(),
    })
}

/// Consecutive elements with the same ID are merged into one run.
fn element_runs<F: SegmentIo>(index: &ElementIndex<F>) -> Vec<ElementSummary> {
    let mut runs: Vec<ElementSummary> = Vec::new();
    let mut last_id = None;
    for descriptor in index.descriptors() {
        if last_id == Some(descriptor.id) {
            if let Some(run) = runs.last_mut() {
                run.size += descriptor.total_size();
                run.count += 1;
                run.size_known &= descriptor.size_known;
                continue;
            }
        }
        last_id = Some(descriptor.id);
        runs.push(ElementSummary {
            name: element_name(descriptor.id),
            id: format!("0x{:X}", descriptor.id),
            position: descriptor.position,
            size: descriptor.total_size(),
            count: 1,
            size_known: descriptor.size_known,
        });
    }
    runs
}

fn track_summary(entry: &Element) -> TrackSummary {
    let video = entry.find_child(VIDEO);
    let audio = entry.find_child(AUDIO);
    TrackSummary {
        number: entry.child_unsigned(TRACK_NUMBER).unwrap_or(0),
        kind: TrackKind::from_track_type(entry.child_unsigned(TRACK_TYPE).unwrap_or(0)),
        codec: entry.child_str(CODEC_ID).unwrap_or("").to_string(),
        name: entry.child_str(NAME).map(str::to_string),
        language: entry.child_str(LANGUAGE).map(str::to_string),
        width: video.and_then(|v| v.child_unsigned(PIXEL_WIDTH)),
        height: video.and_then(|v| v.child_unsigned(PIXEL_HEIGHT)),
        sampling_frequency: audio.and_then(|a| a.child_float(SAMPLING_FREQUENCY)),
        channels: audio.and_then(|a| a.child_unsigned(CHANNELS)),
        default_duration_ns: entry.child_unsigned(DEFAULT_DURATION),
    }
}

fn count_atoms(parent: &Element) -> usize {
    parent
        .find_children(CHAPTER_ATOM)
        .map(|atom| 1 + count_atoms(atom))
        .sum()
}

fn print_summary(summary: &FileSummary) {
    println!();
    println!("{}", style("File Information").cyan().bold());
    println!();

    println!("  {:<16} {}", style("File:").white(), summary.file);
    println!(
        "  {:<16} {}",
        style("Size:").white(),
        format_size(summary.size_bytes)
    );
    println!("  {:<16} {}", style("DocType:").white(), summary.doc_type);
    if let Some(title) = &summary.title {
        println!("  {:<16} {}", style("Title:").white(), title);
    }
    if let Some(duration) = summary.duration_ns {
        println!(
            "  {:<16} {}",
            style("Duration:").white(),
            FormattedTimestamp(duration)
        );
    }
    let segment_size = summary
        .segment_size
        .map_or_else(|| "unknown".to_string(), |size| size.to_string());
    println!(
        "  {:<16} data at {}, size {}",
        style("Segment:").white(),
        summary.segment_data_start,
        segment_size
    );

    println!();
    println!(
        "{} ({:?} scan)",
        style("Elements:").cyan().bold(),
        summary.parse_mode
    );
    for run in &summary.elements {
        let count = if run.count > 1 {
            format!(" x{}", run.count)
        } else {
            String::new()
        };
        let unknown = if run.size_known { "" } else { " (unknown size)" };
        println!(
            "  {:>12}  {:<12} {:>10}{}{}",
            run.position,
            run.name,
            format_size(run.size),
            style(count).dim(),
            style(unknown).yellow()
        );
    }

    if !summary.tracks.is_empty() {
        println!();
        println!("{}", style("Tracks:").cyan().bold());
        for track in &summary.tracks {
            println!();
            println!(
                "  {} #{} ({})",
                style("Track").white(),
                track.number,
                style(format!("{:?}", track.kind).to_lowercase()).yellow()
            );
            println!("    {:<14} {}", style("Codec:").dim(), track.codec);
            if let Some(name) = &track.name {
                println!("    {:<14} {}", style("Name:").dim(), name);
            }
            if let Some(language) = &track.language {
                println!("    {:<14} {}", style("Language:").dim(), language);
            }
            if let (Some(w), Some(h)) = (track.width, track.height) {
                println!("    {:<14} {}x{}", style("Resolution:").dim(), w, h);
            }
            if let Some(duration) = track.default_duration_ns.filter(|&d| d > 0) {
                println!(
                    "    {:<14} {:.3} fps",
                    style("Frame Rate:").dim(),
                    1e9 / duration as f64
                );
            }
            if let Some(sr) = track.sampling_frequency {
                println!("    {:<14} {} Hz", style("Sample Rate:").dim(), sr);
            }
            if let Some(ch) = track.channels {
                let ch_str = match ch {
                    1 => "mono".to_string(),
                    2 => "stereo".to_string(),
                    6 => "5.1".to_string(),
                    8 => "7.1".to_string(),
                    _ => format!("{} channels", ch),
                };
                println!("    {:<14} {}", style("Channels:").dim(), ch_str);
            }
        }
    }

    println!();
    println!("  {:<16} {}", style("Chapters:").white(), summary.chapters);
    println!("  {:<16} {}", style("Tags:").white(), summary.tags);
    if !summary.attachments.is_empty() {
        println!(
            "  {:<16} {}",
            style("Attachments:").white(),
            summary.attachments.join(", ")
        );
    }

    if !summary.anomalies.is_empty() {
        println!();
        println!("{}", style("Anomalies:").yellow().bold());
        for anomaly in &summary.anomalies {
            println!(
                "  {} at {}: {}",
                element_name(anomaly.id),
                anomaly.offset,
                anomaly.reason
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkvkit_core::{MuxSession, Packet};
    use mkvkit_matroska::{AssemblerConfig, ClusterAssembler, MemoryOutputFactory, SegmentTemplate};
    use std::io::Cursor;

    fn sample_file() -> Vec<u8> {
        let tracks = Element::master(
            TRACKS,
            vec![Element::master(
                TRACK_ENTRY,
                vec![
                    Element::unsigned(TRACK_NUMBER, 1),
                    Element::unsigned(TRACK_UID, 1),
                    Element::unsigned(TRACK_TYPE, TRACK_TYPE_VIDEO),
                    Element::unsigned(DEFAULT_DURATION, 40_000_000),
                    Element::string(CODEC_ID, "V_VP9"),
                    Element::master(
                        VIDEO,
                        vec![
                            Element::unsigned(PIXEL_WIDTH, 640),
                            Element::unsigned(PIXEL_HEIGHT, 360),
                        ],
                    ),
                ],
            )],
        );
        let mut mux = ClusterAssembler::new(
            MemoryOutputFactory::new(),
            AssemblerConfig::default().with_title("Sample"),
            SegmentTemplate::new(tracks),
            MuxSession::with_seed(5),
        )
        .unwrap();
        for i in 0..50 {
            let packet = Packet::new(1, i * 40_000_000, vec![0xAB; 200]).with_key_frame(i % 25 == 0);
            mux.accept_packet(packet).unwrap();
        }
        mux.finish().unwrap();
        mux.into_factory().into_outputs().remove(0)
    }

    #[test]
    fn test_summary_of_muxed_file() {
        let bytes = sample_file();
        let length = bytes.len() as u64;
        let mut index = ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap();
        let summary = summarize(&mut index, "sample.mkv".into()).unwrap();

        assert_eq!(summary.size_bytes, length);
        assert_eq!(summary.doc_type, "matroska");
        assert_eq!(summary.title.as_deref(), Some("Sample"));
        assert_eq!(summary.duration_ns, Some(2_000_000_000));
        assert_eq!(summary.tracks.len(), 1);
        assert_eq!(summary.tracks[0].kind, TrackKind::Video);
        assert_eq!((summary.tracks[0].width, summary.tracks[0].height), (Some(640), Some(360)));
        assert!(summary.anomalies.is_empty());

        let covered: u64 = summary.elements.iter().map(|run| run.size).sum();
        assert_eq!(summary.segment_data_start + covered, length);
        assert!(summary.elements.iter().any(|run| run.name == "Cluster"));
    }

    #[test]
    fn test_summary_serialization() {
        let mut index = ElementIndex::from_io(Cursor::new(sample_file()), ParseMode::Fast).unwrap();
        let summary = summarize(&mut index, "sample.mkv".into()).unwrap();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"file\":\"sample.mkv\""));
        assert!(json.contains("\"kind\":\"video\""));
        assert!(json.contains("\"parse_mode\""));
    }

    #[test]
    fn test_nested_chapter_atoms_counted() {
        let atom = |children| Element::master(CHAPTER_ATOM, children);
        let edition = Element::master(
            EDITION_ENTRY,
            vec![atom(vec![atom(vec![]), atom(vec![])]), atom(vec![])],
        );
        assert_eq!(count_atoms(&edition), 4);
    }
}
