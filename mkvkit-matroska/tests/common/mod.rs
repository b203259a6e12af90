//! Fixtures shared by the integration tests. Files are built in memory with
//! the crate's own writers.

#![allow(dead_code)]

use mkvkit_core::{MuxSession, Packet};
use mkvkit_matroska::analyzer::{build_seek_head, SeekEntry};
use mkvkit_matroska::ebml::write_void;
use mkvkit_matroska::elements::*;
use mkvkit_matroska::{
    AssemblerConfig, ClusterAssembler, EbmlHeader, Element, ElementHeader, MemoryOutputFactory,
    SegmentTemplate,
};

/// Offset of the Tags element in [`metadata_file`].
pub const TAGS_POSITION: u64 = 1000;

/// Offset of Info relative to the segment data start in [`metadata_file`].
const INFO_RELATIVE: u64 = 100;

/// A Tags tree whose minimal encoding is exactly `total` bytes.
pub fn tags_of_size(total: u64) -> Element {
    for name_len in 1..8 {
        for value_len in 0..600 {
            let tags = tags_with(name_len, value_len);
            if tags.encoded_size() == total {
                return tags;
            }
        }
    }
    panic!("no Tags layout encodes to {} bytes", total);
}

fn tags_with(name_len: usize, value_len: usize) -> Element {
    Element::master(
        TAGS,
        vec![Element::master(
            TAG,
            vec![
                Element::master(TARGETS, vec![]),
                Element::master(
                    SIMPLE_TAG,
                    vec![
                        Element::utf8(TAG_NAME, "N".repeat(name_len)),
                        Element::utf8(TAG_STRING, "v".repeat(value_len)),
                    ],
                ),
            ],
        )],
    )
}

/// A Tracks element that encodes to exactly `total` bytes, padded through
/// its CodecPrivate and, if needed, a wider size field.
fn tracks_of_size(total: u64) -> Vec<u8> {
    for private_len in 0..total as usize {
        let tracks = Element::master(
            TRACKS,
            vec![Element::master(
                TRACK_ENTRY,
                vec![
                    Element::unsigned(TRACK_NUMBER, 1),
                    Element::unsigned(TRACK_UID, 7),
                    Element::unsigned(TRACK_TYPE, TRACK_TYPE_VIDEO),
                    Element::string(CODEC_ID, "V_VP9"),
                    Element::binary(CODEC_PRIVATE, vec![0x55; private_len]),
                ],
            )],
        );
        let content = tracks.content_size();
        for size_length in 1..=8 {
            if 4 + size_length as u64 + content == total {
                if let Ok(bytes) = tracks.to_bytes_with_size_length(size_length) {
                    return bytes;
                }
            }
        }
    }
    panic!("no Tracks layout encodes to {} bytes", total);
}

/// A cluster with a couple of SimpleBlocks on track 1.
pub fn cluster(timestamp: u64) -> Element {
    Element::master(
        CLUSTER,
        vec![
            Element::unsigned(TIMESTAMP, timestamp),
            Element::binary(SIMPLE_BLOCK, vec![0x81, 0, 0, 0x80, 1, 2, 3, 4]),
            Element::binary(SIMPLE_BLOCK, vec![0x81, 0, 40, 0x00, 5, 6, 7, 8]),
        ],
    )
}

/// Layout of a file built by [`metadata_file`].
pub struct MetadataFile {
    pub bytes: Vec<u8>,
    pub data_start: u64,
    pub seek_head_position: u64,
}

/// A file with a SeekHead, Info, Tracks, a Tags element of `tags_total`
/// bytes at [`TAGS_POSITION`] and two Clusters directly after it.
pub fn metadata_file(tags_total: u64) -> MetadataFile {
    let mut bytes = EbmlHeader::default().to_element().to_bytes().unwrap();
    let segment_header_position = bytes.len();
    bytes.extend(ElementHeader::encode_with_size_length(SEGMENT, Some(0), 8).unwrap());
    let data_start = bytes.len() as u64;

    let info = Element::master(
        INFO,
        vec![
            Element::unsigned(TIMESTAMP_SCALE, 1_000_000),
            Element::utf8(MUXING_APP, "fixture"),
            Element::utf8(WRITING_APP, "fixture"),
        ],
    )
    .to_bytes()
    .unwrap();
    let tracks_relative = INFO_RELATIVE + info.len() as u64;
    let tags_relative = TAGS_POSITION - data_start;

    let seek_head = build_seek_head(&[
        SeekEntry::new(INFO, INFO_RELATIVE),
        SeekEntry::new(TRACKS, tracks_relative),
        SeekEntry::new(TAGS, tags_relative),
    ])
    .to_bytes()
    .unwrap();
    let seek_head_position = bytes.len() as u64;
    bytes.extend_from_slice(&seek_head);
    write_void(&mut bytes, INFO_RELATIVE - seek_head.len() as u64).unwrap();
    bytes.extend_from_slice(&info);
    bytes.extend(tracks_of_size(tags_relative - tracks_relative));
    assert_eq!(bytes.len() as u64, TAGS_POSITION);

    bytes.extend(tags_of_size(tags_total).to_bytes().unwrap());
    bytes.extend(cluster(0).to_bytes().unwrap());
    bytes.extend(cluster(1000).to_bytes().unwrap());

    let segment_size = bytes.len() as u64 - data_start;
    let size_field =
        ElementHeader::encode_with_size_length(SEGMENT, Some(segment_size), 8).unwrap();
    bytes[segment_header_position..data_start as usize].copy_from_slice(&size_field);

    MetadataFile {
        bytes,
        data_start,
        seek_head_position,
    }
}

/// A video plus audio Tracks tree.
pub fn av_tracks() -> Element {
    Element::master(
        TRACKS,
        vec![
            Element::master(
                TRACK_ENTRY,
                vec![
                    Element::unsigned(TRACK_NUMBER, 1),
                    Element::unsigned(TRACK_UID, 101),
                    Element::unsigned(TRACK_TYPE, TRACK_TYPE_VIDEO),
                    Element::string(CODEC_ID, "V_VP9"),
                    Element::unsigned(DEFAULT_DURATION, 40_000_000),
                ],
            ),
            Element::master(
                TRACK_ENTRY,
                vec![
                    Element::unsigned(TRACK_NUMBER, 2),
                    Element::unsigned(TRACK_UID, 102),
                    Element::unsigned(TRACK_TYPE, TRACK_TYPE_AUDIO),
                    Element::string(CODEC_ID, "A_OPUS"),
                    Element::unsigned(DEFAULT_DURATION, 20_000_000),
                ],
            ),
        ],
    )
}

/// `seconds` of 25 fps video with a key frame every `gop` frames, plus
/// 20 ms audio frames.
pub fn av_packets(seconds: i64, gop: i64) -> Vec<Packet> {
    let mut packets = Vec::new();
    for frame in 0..seconds * 25 {
        let ts = frame * 40_000_000;
        packets.push(
            Packet::new(1, ts, vec![(frame % 251) as u8; 400 + (frame % 7) as usize * 50])
                .with_key_frame(frame % gop == 0),
        );
        packets.push(Packet::new(2, ts, vec![0xA0; 60]).with_key_frame(true));
        packets.push(Packet::new(2, ts + 20_000_000, vec![0xA1; 60]).with_key_frame(true));
    }
    packets
}

/// Mux `packets` into memory and return every output file.
pub fn mux(config: AssemblerConfig, tracks: Element, packets: Vec<Packet>) -> Vec<Vec<u8>> {
    let mut assembler = ClusterAssembler::new(
        MemoryOutputFactory::new(),
        config,
        SegmentTemplate::new(tracks),
        MuxSession::with_seed(42),
    )
    .unwrap();
    for packet in packets {
        assembler.accept_packet(packet).unwrap();
    }
    assembler.finish().unwrap();
    assembler.into_factory().into_outputs()
}
