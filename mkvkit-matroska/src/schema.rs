//! Default values and mandatory children of the editable elements.
//!
//! Only the parts of the Matroska schema needed to normalise trees before
//! they are written back are covered: Info, Tracks, Chapters, Tags and
//! Attachments.

use crate::element::{Element, ElementValue};
use crate::elements::*;
use mkvkit_core::{MuxSession, UidKind};
use tracing::debug;

/// Options controlling how a tree is normalised before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Keep children whose value equals the schema default.
    pub write_defaults: bool,
    /// Add mandatory children that are missing.
    pub add_mandatory_if_missing: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            write_defaults: true,
            add_mandatory_if_missing: true,
        }
    }
}

/// Schema default of an element, if it has one.
pub fn default_value(id: u32) -> Option<ElementValue> {
    let value = match id {
        EBML_VERSION | EBML_READ_VERSION | DOC_TYPE_VERSION | DOC_TYPE_READ_VERSION => {
            ElementValue::Unsigned(1)
        }
        EBML_MAX_ID_LENGTH => ElementValue::Unsigned(4),
        EBML_MAX_SIZE_LENGTH => ElementValue::Unsigned(8),
        TIMESTAMP_SCALE => ElementValue::Unsigned(1_000_000),
        FLAG_ENABLED | FLAG_DEFAULT | FLAG_LACING | CODEC_DECODE_ALL => ElementValue::Unsigned(1),
        FLAG_FORCED | MIN_CACHE | MAX_BLOCK_ADDITION_ID | CODEC_DELAY | SEEK_PRE_ROLL => {
            ElementValue::Unsigned(0)
        }
        LANGUAGE | CHAP_LANGUAGE => ElementValue::String("eng".into()),
        TAG_LANGUAGE => ElementValue::String("und".into()),
        SAMPLING_FREQUENCY => ElementValue::Float(8000.0),
        CHANNELS => ElementValue::Unsigned(1),
        EDITION_FLAG_HIDDEN | EDITION_FLAG_DEFAULT | EDITION_FLAG_ORDERED
        | CHAPTER_FLAG_HIDDEN => ElementValue::Unsigned(0),
        CHAPTER_FLAG_ENABLED | TAG_DEFAULT => ElementValue::Unsigned(1),
        CHAPTER_TIME_START => ElementValue::Unsigned(0),
        TARGET_TYPE_VALUE => ElementValue::Unsigned(50),
        _ => return None,
    };
    Some(value)
}

/// Children a master must contain.
pub fn mandatory_children(id: u32) -> &'static [u32] {
    match id {
        INFO => &[TIMESTAMP_SCALE, MUXING_APP, WRITING_APP],
        TRACK_ENTRY => &[
            TRACK_NUMBER,
            TRACK_UID,
            TRACK_TYPE,
            FLAG_ENABLED,
            FLAG_DEFAULT,
            FLAG_FORCED,
            FLAG_LACING,
            CODEC_ID,
        ],
        EDITION_ENTRY => &[EDITION_UID, EDITION_FLAG_HIDDEN, EDITION_FLAG_DEFAULT],
        CHAPTER_ATOM => &[
            CHAPTER_UID,
            CHAPTER_TIME_START,
            CHAPTER_FLAG_HIDDEN,
            CHAPTER_FLAG_ENABLED,
        ],
        CHAPTER_DISPLAY => &[CHAP_STRING, CHAP_LANGUAGE],
        TAG => &[TARGETS],
        TARGETS => &[TARGET_TYPE_VALUE],
        SIMPLE_TAG => &[TAG_NAME, TAG_LANGUAGE, TAG_DEFAULT],
        ATTACHED_FILE => &[FILE_NAME, FILE_MEDIA_TYPE, FILE_DATA, FILE_UID],
        _ => &[],
    }
}

fn uid_kind(id: u32) -> Option<UidKind> {
    match id {
        TRACK_UID => Some(UidKind::Track),
        CHAPTER_UID => Some(UidKind::Chapter),
        EDITION_UID => Some(UidKind::Edition),
        FILE_UID => Some(UidKind::Attachment),
        _ => None,
    }
}

/// Value for a mandatory child that is missing.
fn synthesize(id: u32, session: &mut MuxSession) -> Option<Element> {
    if let Some(kind) = uid_kind(id) {
        return Some(Element::unsigned(id, session.uids().next(kind)));
    }
    if let Some(value) = default_value(id) {
        return Some(Element::new(id, value));
    }
    match id {
        MUXING_APP | WRITING_APP => Some(Element::utf8(id, crate::APP_NAME)),
        TARGETS => Some(Element::master(TARGETS, Vec::new())),
        _ => None,
    }
}

fn register_uids(element: &Element, session: &mut MuxSession) {
    if let (Some(kind), Some(uid)) = (uid_kind(element.id), element.as_unsigned()) {
        session.uids().register(kind, uid);
    }
    for child in element.children() {
        register_uids(child, session);
    }
}

/// Normalise a tree in place according to `options`.
///
/// UIDs already present in the tree are registered with the session's
/// generator before any new one is created, so generated UIDs never
/// collide with existing ones.
pub fn normalize(element: &mut Element, options: NormalizeOptions, session: &mut MuxSession) {
    register_uids(element, session);
    normalize_inner(element, options, session);
}

fn normalize_inner(element: &mut Element, options: NormalizeOptions, session: &mut MuxSession) {
    let id = element.id;
    let Some(children) = element.children_mut() else {
        return;
    };

    if options.add_mandatory_if_missing {
        for &mandatory in mandatory_children(id) {
            if children.iter().any(|c| c.id == mandatory) {
                continue;
            }
            match synthesize(mandatory, session) {
                Some(child) => {
                    debug!(
                        parent = format_args!("0x{:X}", id),
                        child = format_args!("0x{:X}", mandatory),
                        "adding missing mandatory element"
                    );
                    children.push(child);
                }
                None => debug!(
                    child = format_args!("0x{:X}", mandatory),
                    "mandatory element missing and has no default"
                ),
            }
        }
    }

    if !options.write_defaults {
        children.retain(|c| default_value(c.id).map_or(true, |d| d != c.value));
    }

    for child in children.iter_mut() {
        normalize_inner(child, options, session);
    }
}
