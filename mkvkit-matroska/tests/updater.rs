//! In-place update scenarios on complete files.

mod common;

use common::{metadata_file, tags_of_size, TAGS_POSITION};
use mkvkit_matroska::analyzer::parse_seek_head;
use mkvkit_matroska::elements::{CHAPTERS, CLUSTER, SEEK_HEAD, TAGS, TITLE, VOID};
use mkvkit_matroska::{
    Element, ElementDescriptor, ElementIndex, ParseMode, UpdateError, UpdateOptions,
    UpdateOutcome,
};
use std::io::Cursor;

fn exact() -> UpdateOptions {
    UpdateOptions::default().with_add_mandatory(false)
}

fn index(bytes: Vec<u8>) -> ElementIndex<Cursor<Vec<u8>>> {
    ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap()
}

fn non_void(index: &ElementIndex<Cursor<Vec<u8>>>) -> Vec<ElementDescriptor> {
    index
        .descriptors()
        .iter()
        .filter(|d| !d.is_void())
        .copied()
        .collect()
}

#[test]
fn test_smaller_tags_stay_in_place() {
    let fixture = metadata_file(50);
    let mut index = index(fixture.bytes);
    let segment_size = index.segment().size;
    let length = index.file_length();

    let report = index.update_element(&tags_of_size(40), exact()).unwrap();
    assert_eq!(
        report.outcome,
        UpdateOutcome::InPlace {
            position: TAGS_POSITION
        }
    );
    assert_eq!(report.seek_heads_rewritten, 0);

    let tags = index.descriptor(index.find(TAGS).unwrap()).copied().unwrap();
    assert_eq!((tags.position, tags.total_size()), (TAGS_POSITION, 40));
    let next = index
        .descriptors()
        .iter()
        .find(|d| d.position == TAGS_POSITION + 40)
        .unwrap();
    assert_eq!((next.id, next.total_size()), (VOID, 10));
    assert_eq!(index.segment().size, segment_size);
    assert_eq!(index.file_length(), length);
}

#[test]
fn test_larger_tags_relocated_to_end() {
    let fixture = metadata_file(50);
    let mut index = index(fixture.bytes);
    let segment_size = index.segment().size.unwrap();
    let length = index.file_length();
    let last_cluster = index.descriptor(*index.find_all(CLUSTER).last().unwrap()).copied().unwrap();
    assert_eq!(last_cluster.end(), length);

    let report = index.update_element(&tags_of_size(200), exact()).unwrap();
    assert_eq!(
        report.outcome,
        UpdateOutcome::Relocated {
            from: TAGS_POSITION,
            to: length
        }
    );
    assert_eq!(report.seek_heads_rewritten, 1);
    assert!(!report.seek_head_regenerated);

    let old = index
        .descriptors()
        .iter()
        .find(|d| d.position == TAGS_POSITION)
        .copied()
        .unwrap();
    assert_eq!((old.id, old.total_size()), (VOID, 50));

    let tags = index.descriptor(index.find(TAGS).unwrap()).copied().unwrap();
    assert_eq!((tags.position, tags.total_size()), (length, 200));
    assert_eq!(index.file_length(), length + 200);
    assert_eq!(index.segment().size, Some(segment_size + 200));

    let seek_head = index.read_all(SEEK_HEAD).unwrap().unwrap();
    let entries = parse_seek_head(&seek_head);
    let relative = length - fixture.data_start;
    assert_eq!(entries.iter().filter(|e| e.id == TAGS).count(), 1);
    assert!(entries.iter().any(|e| e.id == TAGS && e.position == relative));
    assert_eq!(index.find(SEEK_HEAD).map(|i| index.descriptors()[i].position), Some(fixture.seek_head_position));
}

#[test]
fn test_unchanged_update_keeps_layout() {
    let fixture = metadata_file(50);
    let mut index = index(fixture.bytes);
    let before = non_void(&index);

    let tags = index.read_all(TAGS).unwrap().unwrap();
    index.update_element(&tags, exact()).unwrap();

    let reopened = index_of(index);
    assert_eq!(non_void(&reopened), before);
}

fn index_of(index: ElementIndex<Cursor<Vec<u8>>>) -> ElementIndex<Cursor<Vec<u8>>> {
    let bytes = index.into_inner().into_inner();
    ElementIndex::from_io(Cursor::new(bytes), ParseMode::Full).unwrap()
}

#[test]
fn test_round_trip_with_default_options_keeps_layout() {
    let fixture = metadata_file(50);
    let mut index = index(fixture.bytes);
    let before = non_void(&index);

    let tags = index.read_all(TAGS).unwrap().unwrap();
    let report = index.update_element(&tags, UpdateOptions::default()).unwrap();
    assert_eq!(
        report.outcome,
        UpdateOutcome::InPlace {
            position: TAGS_POSITION
        }
    );
    assert_eq!(report.file_length_after, report.file_length_before);

    let reopened = index_of(index);
    assert_eq!(non_void(&reopened), before);
}

#[test]
fn test_repeated_update_is_idempotent() {
    let fixture = metadata_file(50);
    let replacement = tags_of_size(120);

    let mut once = index(fixture.bytes.clone());
    once.update_element(&replacement, exact()).unwrap();
    let once = index_of(once);

    let mut twice = index(fixture.bytes);
    twice.update_element(&replacement, exact()).unwrap();
    twice.update_element(&replacement, exact()).unwrap();
    let twice = index_of(twice);

    assert_eq!(non_void(&once), non_void(&twice));
    assert_eq!(once.file_length(), twice.file_length());
}

#[test]
fn test_insert_missing_chapters() {
    let fixture = metadata_file(50);
    let mut index = index(fixture.bytes);
    let chapters = Element::master(
        CHAPTERS,
        vec![Element::master(
            mkvkit_matroska::elements::EDITION_ENTRY,
            vec![Element::master(
                mkvkit_matroska::elements::CHAPTER_ATOM,
                vec![Element::unsigned(mkvkit_matroska::elements::CHAPTER_TIME_START, 0)],
            )],
        )],
    );

    let report = index
        .update_element(&chapters, UpdateOptions::default())
        .unwrap();
    let UpdateOutcome::Inserted { position } = report.outcome else {
        panic!("expected an insertion, got {:?}", report.outcome);
    };

    let read_back = index.read_all(CHAPTERS).unwrap().unwrap();
    let atom = read_back
        .find_child(mkvkit_matroska::elements::EDITION_ENTRY)
        .and_then(|e| e.find_child(mkvkit_matroska::elements::CHAPTER_ATOM))
        .unwrap();
    assert!(atom.child_unsigned(mkvkit_matroska::elements::CHAPTER_UID).is_some());

    let seek_head = index.read_all(SEEK_HEAD).unwrap().unwrap();
    let relative = position - fixture.data_start;
    assert!(parse_seek_head(&seek_head)
        .iter()
        .any(|e| e.id == CHAPTERS && e.position == relative));
}

#[test]
fn test_remove_tags() {
    let fixture = metadata_file(50);
    let mut index = index(fixture.bytes);
    let length = index.file_length();

    let report = index.remove_elements(TAGS).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Removed { count: 1 });
    assert!(index.find(TAGS).is_none());
    assert_eq!(index.file_length(), length);

    let seek_head = index.read_all(SEEK_HEAD).unwrap().unwrap();
    assert!(parse_seek_head(&seek_head).iter().all(|e| e.id != TAGS));
}

#[test]
fn test_cluster_cannot_be_updated() {
    let fixture = metadata_file(50);
    let mut index = index(fixture.bytes.clone());
    let cluster = common::cluster(5);

    let err = index.update_element(&cluster, exact()).unwrap_err();
    assert!(matches!(err, UpdateError::NotIndexable { id: CLUSTER }));
    assert_eq!(index.into_inner().into_inner(), fixture.bytes);
}

#[test]
fn test_update_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.mkv");
    std::fs::write(&path, metadata_file(50).bytes).unwrap();

    {
        let mut index = ElementIndex::open(&path, ParseMode::Fast).unwrap();
        let mut info = index.read_all(mkvkit_matroska::elements::INFO).unwrap().unwrap();
        info.replace_child(Element::utf8(TITLE, "Night of the Living Bytes"));
        index.update_element(&info, UpdateOptions::default()).unwrap();
    }

    let mut index = ElementIndex::open(&path, ParseMode::Full).unwrap();
    let info = index.read_all(mkvkit_matroska::elements::INFO).unwrap().unwrap();
    assert_eq!(info.child_str(TITLE), Some("Night of the Living Bytes"));
    assert!(index.anomalies().is_empty());
}
