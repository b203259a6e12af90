//! Element index construction on whole files.

mod common;

use common::{av_packets, av_tracks, cluster, metadata_file, mux};
use mkvkit_matroska::analyzer::{build_seek_head, SeekEntry};
use mkvkit_matroska::elements::*;
use mkvkit_matroska::{
    AssemblerConfig, EbmlHeader, Element, ElementHeader, ElementIndex, MkvError, ParseMode,
};
use std::io::Cursor;

/// EBML Head plus a Segment holding `parts`. `size` overrides the declared
/// segment size; `None` writes an unknown size.
fn segment_file(parts: &[Vec<u8>], size: Option<Option<u64>>) -> (Vec<u8>, u64) {
    let mut bytes = EbmlHeader::default().to_element().to_bytes().unwrap();
    let content: Vec<u8> = parts.concat();
    let size = size.unwrap_or(Some(content.len() as u64));
    bytes.extend(ElementHeader::encode_with_size_length(SEGMENT, size, 8).unwrap());
    let data_start = bytes.len() as u64;
    bytes.extend(content);
    (bytes, data_start)
}

fn info() -> Vec<u8> {
    Element::master(INFO, vec![Element::unsigned(TIMESTAMP_SCALE, 1_000_000)])
        .to_bytes()
        .unwrap()
}

fn ids(index: &ElementIndex<Cursor<Vec<u8>>>) -> Vec<u32> {
    index.descriptors().iter().map(|d| d.id).collect()
}

#[test]
fn test_full_scan_lists_every_element() {
    let fixture = metadata_file(50);
    let index = ElementIndex::from_io(Cursor::new(fixture.bytes), ParseMode::Full).unwrap();

    assert_eq!(
        ids(&index),
        vec![SEEK_HEAD, VOID, INFO, TRACKS, TAGS, CLUSTER, CLUSTER]
    );
    assert_eq!(index.segment().data_start, fixture.data_start);
    assert_eq!(index.first_cluster_position(), Some(1050));
    assert!(index.anomalies().is_empty());

    let descriptors = index.descriptors();
    for pair in descriptors.windows(2) {
        assert_eq!(pair[0].end(), pair[1].position);
    }
    assert_eq!(descriptors.last().unwrap().end(), index.file_length());
}

#[test]
fn test_fast_scan_stops_at_first_cluster() {
    let fixture = metadata_file(50);
    let full = ElementIndex::from_io(Cursor::new(fixture.bytes.clone()), ParseMode::Full).unwrap();
    let fast = ElementIndex::from_io(Cursor::new(fixture.bytes), ParseMode::Fast).unwrap();

    assert_eq!(fast.parse_mode(), ParseMode::Fast);
    assert_eq!(fast.find_all(CLUSTER).len(), 1);
    assert_eq!(full.descriptors()[..fast.descriptors().len()], *fast.descriptors());
    assert_eq!(fast.descriptor(fast.find(TAGS).unwrap()).unwrap().position, 1000);
}

#[test]
fn test_fast_scan_follows_seek_head_past_clusters() {
    let files = mux(AssemblerConfig::default(), av_tracks(), av_packets(12, 25));
    assert_eq!(files.len(), 1);

    let full = ElementIndex::from_io(Cursor::new(files[0].clone()), ParseMode::Full).unwrap();
    let mut fast = ElementIndex::from_io(Cursor::new(files[0].clone()), ParseMode::Fast).unwrap();

    let cues = full.descriptor(full.find(CUES).unwrap()).copied().unwrap();
    assert!(cues.position > full.first_cluster_position().unwrap());
    assert_eq!(fast.descriptor(fast.find(CUES).unwrap()), Some(&cues));
    assert!(fast.find_all(CLUSTER).len() < full.find_all(CLUSTER).len());

    fast.ensure_full().unwrap();
    assert_eq!(fast.descriptors(), full.descriptors());
}

#[test]
fn test_unknown_sizes_resolved_by_scanning() {
    let mut first = ElementHeader::encode(CLUSTER, None).unwrap();
    first.extend(Element::unsigned(TIMESTAMP, 0).to_bytes().unwrap());
    first.extend(
        Element::binary(SIMPLE_BLOCK, vec![0x81, 0, 0, 0x80, 1, 2, 3, 4])
            .to_bytes()
            .unwrap(),
    );
    let second = cluster(1000).to_bytes().unwrap();
    let (bytes, data_start) = segment_file(&[info(), first.clone(), second.clone()], Some(None));

    let mut index = ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap();
    assert_eq!(index.segment().size, None);
    assert_eq!(ids(&index), vec![INFO, CLUSTER, CLUSTER]);

    let clusters = index.find_all(CLUSTER);
    let open = *index.descriptor(clusters[0]).unwrap();
    assert!(!open.size_known);
    assert_eq!(open.position, data_start + info().len() as u64);
    assert_eq!(open.total_size(), first.len() as u64);
    assert_eq!(index.descriptor(clusters[1]).unwrap().position, open.end());

    let decoded = index.read_element(&open).unwrap();
    assert_eq!(decoded.child_unsigned(TIMESTAMP), Some(0));
    assert_eq!(decoded.find_children(SIMPLE_BLOCK).count(), 1);
}

#[test]
fn test_segment_longer_than_file_is_an_anomaly() {
    let parts = [info(), cluster(0).to_bytes().unwrap()];
    let declared = parts.iter().map(|p| p.len() as u64).sum::<u64>() + 500;
    let (bytes, _) = segment_file(&parts, Some(Some(declared)));

    let index = ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap();
    assert_eq!(ids(&index), vec![INFO, CLUSTER]);
    assert_eq!(index.anomalies().len(), 1);
    assert_eq!(index.anomalies()[0].id, SEGMENT);
}

#[test]
fn test_stale_seek_entry_falls_back_to_full_scan() {
    let info = info();
    // The first SeekHead is sized with a placeholder so the real one
    // encodes to the same length.
    let placeholder = build_seek_head(&[SeekEntry::new(INFO, 0)]).to_bytes().unwrap();
    let info_relative = placeholder.len() as u64;
    let stale = build_seek_head(&[SeekEntry::new(INFO, info_relative + 3)])
        .to_bytes()
        .unwrap();
    assert_eq!(stale.len(), placeholder.len());

    let (bytes, _) = segment_file(&[stale, info, cluster(0).to_bytes().unwrap()], None);
    let fast = ElementIndex::from_io(Cursor::new(bytes.clone()), ParseMode::Fast).unwrap();
    let full = ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap();

    assert_eq!(fast.descriptors(), full.descriptors());
    assert_eq!(full.anomalies().len(), 1);
    assert_eq!(full.anomalies()[0].id, SEEK_HEAD);
    assert_eq!(full.meta_seek_positions().values().filter(|found| !**found).count(), 1);
}

#[test]
fn test_fast_scan_without_seek_head_walks_everything() {
    let tags = Element::master(
        TAGS,
        vec![Element::master(
            TAG,
            vec![Element::master(
                SIMPLE_TAG,
                vec![
                    Element::utf8(TAG_NAME, "TITLE"),
                    Element::utf8(TAG_STRING, "late tags"),
                ],
            )],
        )],
    );
    let (bytes, _) = segment_file(
        &[
            info(),
            cluster(0).to_bytes().unwrap(),
            cluster(1000).to_bytes().unwrap(),
            tags.to_bytes().unwrap(),
        ],
        None,
    );

    let full = ElementIndex::from_io(Cursor::new(bytes.clone()), ParseMode::Full).unwrap();
    let mut fast = ElementIndex::from_io(Cursor::new(bytes), ParseMode::Fast).unwrap();

    assert_eq!(ids(&full), vec![INFO, CLUSTER, CLUSTER, TAGS]);
    assert_eq!(fast.descriptors(), full.descriptors());
    assert_eq!(fast.read_all(TAGS).unwrap(), Some(tags));
}

#[test]
fn test_damaged_descendant_is_recoverable() {
    // A SimpleTag claiming 16 bytes inside a Tag that holds only 7.
    let simple_tag = [0x67, 0xC8, 0x90, 0x45, 0xA3, 0x81, 0x41];
    let mut tag = vec![0x73, 0x73, 0x87];
    tag.extend_from_slice(&simple_tag);
    let mut tags = vec![0x12, 0x54, 0xC3, 0x67, 0x8A];
    tags.extend_from_slice(&tag);

    let (bytes, data_start) = segment_file(&[info(), tags, cluster(0).to_bytes().unwrap()], None);
    let mut index = ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap();
    assert_eq!(ids(&index), vec![INFO, TAGS, CLUSTER]);

    let decoded = index.read_all(TAGS).unwrap().unwrap();
    let tag = decoded.find_child(TAG).unwrap();
    assert_eq!(tag.children().len(), 1);
    assert_eq!(tag.children()[0].id, VOID);
    assert_eq!(tag.children()[0].as_binary(), Some(&simple_tag[..]));

    let anomaly = &index.anomalies()[0];
    assert_eq!(anomaly.id, TAG);
    assert_eq!(anomaly.offset, data_start + info().len() as u64 + 8);
}

#[test]
fn test_damaged_seek_entry_does_not_prevent_opening() {
    // A Seek child claiming 15 bytes inside a 6-byte SeekHead.
    let seek_head = vec![0x11, 0x4D, 0x9B, 0x74, 0x86, 0x4D, 0xBB, 0x8F, 0x53, 0xAB, 0x84];
    let (bytes, _) = segment_file(&[seek_head, info(), cluster(0).to_bytes().unwrap()], None);

    for mode in [ParseMode::Full, ParseMode::Fast] {
        let index = ElementIndex::from_io(Cursor::new(bytes.clone()), mode).unwrap();
        assert_eq!(ids(&index), vec![SEEK_HEAD, INFO, CLUSTER]);
        assert!(index.meta_seek_positions().is_empty());
        assert!(index.anomalies().iter().any(|a| a.id == SEEK_HEAD));
    }
}

#[test]
fn test_non_matroska_input_rejected() {
    let err = ElementIndex::from_io(Cursor::new(b"RIFF\0\0\0\0WAVEfmt ".to_vec()), ParseMode::Fast)
        .unwrap_err();
    assert!(matches!(err, MkvError::NotMatroska { offset: 0 }));
}

#[test]
fn test_element_beyond_segment_is_corrupt() {
    let (mut bytes, _) = segment_file(&[info(), cluster(0).to_bytes().unwrap()], None);
    // The declared size still covers the whole cluster, so the segment is
    // clamped to the file and the cluster overruns it.
    bytes.truncate(bytes.len() - 3);

    let err = ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap_err();
    assert!(matches!(err, MkvError::CorruptFile { .. }));
}
