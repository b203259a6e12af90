//! Remuxing files on disk through the reader and the assembler.

mod common;

use common::{av_packets, av_tracks};
use mkvkit_core::{MuxSession, Packet, Packetizer};
use mkvkit_matroska::elements::*;
use mkvkit_matroska::{
    AssemblerConfig, ClusterAssembler, Element, FileOutputFactory, MatroskaReader,
    SegmentTemplate, SplitPoint,
};
use std::path::Path;

fn chapters() -> Element {
    let atom = |uid: u64, start: u64, name: &str| {
        Element::master(
            CHAPTER_ATOM,
            vec![
                Element::unsigned(CHAPTER_UID, uid),
                Element::unsigned(CHAPTER_TIME_START, start),
                Element::master(
                    CHAPTER_DISPLAY,
                    vec![Element::utf8(CHAP_STRING, name)],
                ),
            ],
        )
    };
    Element::master(
        CHAPTERS,
        vec![Element::master(
            EDITION_ENTRY,
            vec![
                Element::unsigned(EDITION_UID, 9),
                atom(1, 0, "Opening"),
                atom(2, 3_000_000_000, "Middle"),
            ],
        )],
    )
}

fn write(path: &Path, template: SegmentTemplate, config: AssemblerConfig, packets: Vec<Packet>) {
    let numbered = !config.split_points.is_empty();
    let mut mux = ClusterAssembler::new(
        FileOutputFactory::new(path).numbered(numbered),
        config,
        template,
        MuxSession::with_seed(11),
    )
    .unwrap();
    for packet in packets {
        mux.accept_packet(packet).unwrap();
    }
    mux.finish().unwrap();
}

fn read_all(reader: &mut MatroskaReader<mkvkit_matroska::SegmentFile>) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Some(packet) = reader.next_packet().unwrap() {
        packets.push(packet);
    }
    packets
}

/// Laced frames after the first come back without the key flag, so only
/// video key frames are compared.
fn summary(packets: &[Packet]) -> Vec<(u64, i64, usize, bool)> {
    let mut summary: Vec<_> = packets
        .iter()
        .map(|p| (p.track_number, p.timestamp, p.size(), p.track_number == 1 && p.is_key_frame()))
        .collect();
    summary.sort_unstable();
    summary
}

#[test]
fn test_remux_preserves_packets_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mkv");
    let target = dir.path().join("target.mkv");
    let packets = av_packets(6, 25);

    let template = SegmentTemplate::new(av_tracks()).with_chapters(chapters());
    write(&source, template, AssemblerConfig::default(), packets.clone());

    let mut reader = MatroskaReader::open(&source).unwrap();
    assert_eq!(reader.track_numbers(), vec![1, 2]);
    assert!(reader.chapters().is_some());
    let template = SegmentTemplate::new(reader.tracks().clone())
        .with_chapters(reader.chapters().cloned().unwrap());
    let config = AssemblerConfig::default().with_title("Remuxed");
    let mut mux = ClusterAssembler::new(
        FileOutputFactory::new(&target),
        config,
        template,
        MuxSession::new(),
    )
    .unwrap();
    while let Some(packet) = reader.next_packet().unwrap() {
        mux.accept_packet(packet).unwrap();
    }
    let stats = mux.finish().unwrap();
    assert_eq!(stats.files, vec![target.display().to_string()]);
    assert_eq!(stats.duration_ns, 6_000_000_000);

    let mut remuxed = MatroskaReader::open(&target).unwrap();
    assert_eq!(summary(&read_all(&mut remuxed)), summary(&packets));
    let info = remuxed.info().unwrap();
    assert_eq!(info.child_str(TITLE), Some("Remuxed"));
    let edition = remuxed.chapters().unwrap().find_child(EDITION_ENTRY).unwrap();
    assert_eq!(edition.find_children(CHAPTER_ATOM).count(), 2);
}

#[test]
fn test_chapter_split_writes_numbered_files() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("episode.mkv");
    let points = SplitPoint::from_chapters(&chapters());
    assert_eq!(points.len(), 1);

    let config = AssemblerConfig::default().with_split_points(points);
    write(
        &target,
        SegmentTemplate::new(av_tracks()).with_chapters(chapters()),
        config,
        av_packets(6, 25),
    );

    let first = dir.path().join("episode-001.mkv");
    let second = dir.path().join("episode-002.mkv");
    assert!(!target.exists());

    let mut reader = MatroskaReader::open(&first).unwrap();
    let early = read_all(&mut reader);
    assert!(early.iter().all(|p| p.timestamp < 3_000_000_000));

    let mut reader = MatroskaReader::open(&second).unwrap();
    let late = read_all(&mut reader);
    let first_video = late.iter().find(|p| p.track_number == 1).unwrap();
    assert_eq!(first_video.timestamp, 3_000_000_000);
    assert!(first_video.is_key_frame());
    assert_eq!(early.len() + late.len(), av_packets(6, 25).len());
}

#[test]
fn test_open_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(MatroskaReader::open(dir.path().join("nope.mkv")).is_err());
}
