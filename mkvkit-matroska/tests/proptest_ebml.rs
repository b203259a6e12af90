//! Property-based tests for the EBML primitives.
//!
//! Uses proptest to check the size arithmetic the updater relies on:
//! VINT widths, EbmlVoid synthesis and re-encoding of decoded trees.

use mkvkit_matroska::ebml::{
    encode_vint_with_length, read_element_size, read_vint, vint_length, vint_max, void_header,
    write_void, ElementHeader, MAX_VINT_LENGTH,
};
use mkvkit_matroska::elements::{
    SIMPLE_TAG, TAG, TAGS, TAG_BINARY, TAG_NAME, TAG_STRING, TARGETS, TARGET_TYPE_VALUE, VOID,
};
use mkvkit_matroska::Element;
use proptest::prelude::*;
use std::io::Cursor;

// =============================================================================
// VINT Tests
// =============================================================================

proptest! {
    /// The minimal width is the smallest one whose all-ones pattern is
    /// larger than the value.
    #[test]
    fn vint_length_is_minimal(value in 0u64..(1u64 << 56) - 1) {
        let length = vint_length(value);
        prop_assert!(value < vint_max(length));
        if length > 1 {
            prop_assert!(value >= vint_max(length - 1));
        }
    }

    /// Any width at least as large as the minimal one decodes to the same
    /// value; narrower widths are rejected.
    #[test]
    fn vint_fixed_width(value in 0u64..(1u64 << 56) - 1, extra in 0usize..MAX_VINT_LENGTH) {
        let minimal = vint_length(value);
        let length = (minimal + extra).min(MAX_VINT_LENGTH);
        let (bytes, len) = encode_vint_with_length(value, length).unwrap();
        prop_assert_eq!(len, length);

        let (decoded, read) = read_vint(&mut Cursor::new(&bytes[..len])).unwrap();
        prop_assert_eq!((decoded, read), (value, length));
        if minimal > 1 {
            prop_assert!(encode_vint_with_length(value, minimal - 1).is_err());
        }
    }

    /// A known size never decodes as unknown.
    #[test]
    fn known_size_is_not_unknown(value in 0u64..(1u64 << 56) - 1) {
        let header = ElementHeader::encode(TAGS, Some(value)).unwrap();
        let (size, _) = read_element_size(&mut Cursor::new(&header[4..])).unwrap();
        prop_assert_eq!(size, Some(value));
    }
}

// =============================================================================
// EbmlVoid Tests
// =============================================================================

proptest! {
    /// A synthesised void occupies exactly the requested bytes and its
    /// header uses the narrowest size field that can describe the rest.
    #[test]
    fn void_fills_exactly(total in 2u64..200_000) {
        let header = void_header(total).unwrap();
        let parsed = ElementHeader::parse(&header).unwrap();
        prop_assert_eq!(parsed.id, VOID);
        prop_assert_eq!(parsed.total_size(), Some(total));
        if parsed.size_length > 1 {
            let narrower = parsed.size_length - 1;
            prop_assert!(total - 1 - narrower as u64 >= vint_max(narrower));
        }

        let mut out = Vec::new();
        write_void(&mut out, total).unwrap();
        prop_assert_eq!(out.len() as u64, total);
    }
}

// =============================================================================
// Element Tree Tests
// =============================================================================

fn tags_tree() -> impl Strategy<Value = Element> {
    let simple_tag = (
        "[A-Z_]{1,12}",
        prop::option::of("[a-zA-Z0-9 éß]{0,40}"),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(name, value, binary)| {
            let mut children = vec![Element::utf8(TAG_NAME, name)];
            if let Some(value) = value {
                children.push(Element::utf8(TAG_STRING, value));
            }
            if let Some(binary) = binary {
                children.push(Element::binary(TAG_BINARY, binary));
            }
            Element::master(SIMPLE_TAG, children)
        });
    let tag = (prop::option::of(0u64..100), prop::collection::vec(simple_tag, 1..6)).prop_map(
        |(target, simple_tags)| {
            let targets = match target {
                Some(value) => vec![Element::unsigned(TARGET_TYPE_VALUE, value)],
                None => Vec::new(),
            };
            let mut children = vec![Element::master(TARGETS, targets)];
            children.extend(simple_tags);
            Element::master(TAG, children)
        },
    );
    prop::collection::vec(tag, 0..5).prop_map(|tags| Element::master(TAGS, tags))
}

proptest! {
    /// Decoding the minimal encoding of a tree gives the tree back, and
    /// the encoded length is what `encoded_size` promised.
    #[test]
    fn element_tree_reencodes(tree in tags_tree()) {
        let bytes = tree.to_bytes().unwrap();
        prop_assert_eq!(bytes.len() as u64, tree.encoded_size());

        let mut anomalies = Vec::new();
        let decoded = Element::decode(&bytes, 0, &mut anomalies).unwrap();
        prop_assert!(anomalies.is_empty());
        prop_assert_eq!(&decoded, &tree);
        prop_assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    /// Widening the size field grows the element by exactly the extra bytes.
    #[test]
    fn wider_size_field(tree in tags_tree(), width in 1usize..=MAX_VINT_LENGTH) {
        let content = tree.content_size();
        let minimal = tree.encoded_size();
        match tree.to_bytes_with_size_length(width) {
            Ok(bytes) => {
                prop_assert!(width >= vint_length(content));
                prop_assert_eq!(bytes.len() as u64, minimal + (width - vint_length(content)) as u64);
            }
            Err(_) => prop_assert!(width < vint_length(content)),
        }
    }
}
