//! SeekHead entries.

use crate::ebml::encode_element_id;
use crate::element::Element;
use crate::elements::{SEEK, SEEK_HEAD, SEEK_ID, SEEK_POSITION};

/// One Seek entry: an element ID and its position relative to the segment
/// data start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeekEntry {
    /// Referenced element ID.
    pub id: u32,
    /// Position relative to the segment data start.
    pub position: u64,
}

impl SeekEntry {
    /// Create an entry.
    pub fn new(id: u32, position: u64) -> Self {
        Self { id, position }
    }

    /// Build the Seek element for this entry.
    pub fn to_element(&self) -> Element {
        let (id_bytes, id_len) = encode_element_id(self.id);
        Element::master(
            SEEK,
            vec![
                Element::binary(SEEK_ID, id_bytes[..id_len].to_vec()),
                Element::unsigned(SEEK_POSITION, self.position),
            ],
        )
    }
}

/// Decode the ID stored in a SeekID payload.
pub fn seek_id_from_bytes(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

/// Extract the well-formed entries of a SeekHead. Malformed Seek children
/// are skipped.
pub fn parse_seek_head(seek_head: &Element) -> Vec<SeekEntry> {
    seek_head
        .find_children(SEEK)
        .filter_map(|seek| {
            let id = seek.child_binary(SEEK_ID).and_then(seek_id_from_bytes)?;
            let position = seek.child_unsigned(SEEK_POSITION)?;
            Some(SeekEntry { id, position })
        })
        .collect()
}

/// Build a SeekHead holding `entries` in the given order.
pub fn build_seek_head(entries: &[SeekEntry]) -> Element {
    Element::master(
        SEEK_HEAD,
        entries.iter().map(SeekEntry::to_element).collect(),
    )
}

/// Build the canonical form of a set of entries: sorted by position, with
/// duplicates removed.
pub fn canonical_entries(entries: impl IntoIterator<Item = SeekEntry>) -> Vec<SeekEntry> {
    let mut entries: Vec<SeekEntry> = entries.into_iter().collect();
    entries.sort_by_key(|e| (e.position, e.id));
    entries.dedup();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{CUES, INFO, TAGS};

    #[test]
    fn test_build_and_parse() {
        let entries = vec![SeekEntry::new(INFO, 100), SeekEntry::new(TAGS, 4000)];
        let seek_head = build_seek_head(&entries);
        assert_eq!(parse_seek_head(&seek_head), entries);
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let seek_head = Element::master(
            SEEK_HEAD,
            vec![
                Element::master(SEEK, vec![Element::unsigned(SEEK_POSITION, 5)]),
                SeekEntry::new(CUES, 9000).to_element(),
            ],
        );
        assert_eq!(parse_seek_head(&seek_head), vec![SeekEntry::new(CUES, 9000)]);
    }

    #[test]
    fn test_canonical_entries() {
        let entries = canonical_entries(vec![
            SeekEntry::new(TAGS, 500),
            SeekEntry::new(INFO, 100),
            SeekEntry::new(TAGS, 500),
        ]);
        assert_eq!(entries, vec![SeekEntry::new(INFO, 100), SeekEntry::new(TAGS, 500)]);
    }

    #[test]
    fn test_seek_id_bytes() {
        assert_eq!(seek_id_from_bytes(&[0x12, 0x54, 0xC3, 0x67]), Some(TAGS));
        assert_eq!(seek_id_from_bytes(&[]), None);
        assert_eq!(seek_id_from_bytes(&[1, 2, 3, 4, 5]), None);
    }
}
