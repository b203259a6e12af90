//! Matroska element IDs and their value kinds.
//!
//! IDs include their VINT marker bits, exactly as they appear in a file.

// =============================================================================
// EBML Header Elements
// =============================================================================

/// EBML Header element.
pub const EBML: u32 = 0x1A45DFA3;
/// EBML Version.
pub const EBML_VERSION: u32 = 0x4286;
/// EBML Read Version.
pub const EBML_READ_VERSION: u32 = 0x42F7;
/// EBML Max ID Length.
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
/// EBML Max Size Length.
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
/// Document type ("matroska" or "webm").
pub const DOC_TYPE: u32 = 0x4282;
/// Document type version.
pub const DOC_TYPE_VERSION: u32 = 0x4287;
/// Document type read version.
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// =============================================================================
// Global Elements
// =============================================================================

/// Void (padding).
pub const VOID: u32 = 0xEC;
/// CRC-32.
pub const CRC32: u32 = 0xBF;

// =============================================================================
// Segment and Meta Seek
// =============================================================================

/// Segment (the root container for all Matroska data).
pub const SEGMENT: u32 = 0x18538067;
/// SeekHead (index of top-level elements).
pub const SEEK_HEAD: u32 = 0x114D9B74;
/// Seek entry.
pub const SEEK: u32 = 0x4DBB;
/// Seek ID (binary, the encoded ID of the referenced element).
pub const SEEK_ID: u32 = 0x53AB;
/// Seek position, relative to the segment data start.
pub const SEEK_POSITION: u32 = 0x53AC;

// =============================================================================
// Segment Information
// =============================================================================

/// Segment Info.
pub const INFO: u32 = 0x1549A966;
/// Segment UID.
pub const SEGMENT_UID: u32 = 0x73A4;
/// Segment filename.
pub const SEGMENT_FILENAME: u32 = 0x7384;
/// UID of the previous segment in a linked chain.
pub const PREV_UID: u32 = 0x3CB923;
/// Filename of the previous segment.
pub const PREV_FILENAME: u32 = 0x3C83AB;
/// UID of the next segment in a linked chain.
pub const NEXT_UID: u32 = 0x3EB923;
/// Filename of the next segment.
pub const NEXT_FILENAME: u32 = 0x3E83BB;
/// Segment family.
pub const SEGMENT_FAMILY: u32 = 0x4444;
/// Timestamp scale (nanoseconds per tick, default 1000000 = 1ms).
pub const TIMESTAMP_SCALE: u32 = 0x2AD7B1;
/// Duration (in ticks, as a float).
pub const DURATION: u32 = 0x4489;
/// Date UTC (nanoseconds since 2001-01-01).
pub const DATE_UTC: u32 = 0x4461;
/// Title.
pub const TITLE: u32 = 0x7BA9;
/// Muxing application.
pub const MUXING_APP: u32 = 0x4D80;
/// Writing application.
pub const WRITING_APP: u32 = 0x5741;

// =============================================================================
// Cluster Elements
// =============================================================================

/// Cluster (contains blocks of media data).
pub const CLUSTER: u32 = 0x1F43B675;
/// Cluster timestamp.
pub const TIMESTAMP: u32 = 0xE7;
/// Cluster position in the segment.
pub const POSITION: u32 = 0xA7;
/// Size of the previous cluster.
pub const PREV_SIZE: u32 = 0xAB;
/// SimpleBlock.
pub const SIMPLE_BLOCK: u32 = 0xA3;
/// BlockGroup (block with additional info).
pub const BLOCK_GROUP: u32 = 0xA0;
/// Block.
pub const BLOCK: u32 = 0xA1;
/// Block duration (ticks).
pub const BLOCK_DURATION: u32 = 0x9B;
/// Reference priority.
pub const REFERENCE_PRIORITY: u32 = 0xFA;
/// Reference block (relative ticks of a referenced frame).
pub const REFERENCE_BLOCK: u32 = 0xFB;
/// Codec state.
pub const CODEC_STATE: u32 = 0xA4;
/// Discard padding (nanoseconds).
pub const DISCARD_PADDING: u32 = 0x75A2;

// =============================================================================
// Track Elements
// =============================================================================

/// Tracks.
pub const TRACKS: u32 = 0x1654AE6B;
/// Track entry.
pub const TRACK_ENTRY: u32 = 0xAE;
/// Track number.
pub const TRACK_NUMBER: u32 = 0xD7;
/// Track UID.
pub const TRACK_UID: u32 = 0x73C5;
/// Track type.
pub const TRACK_TYPE: u32 = 0x83;
/// Track enabled flag.
pub const FLAG_ENABLED: u32 = 0xB9;
/// Default track flag.
pub const FLAG_DEFAULT: u32 = 0x88;
/// Forced track flag.
pub const FLAG_FORCED: u32 = 0x55AA;
/// Lacing allowed flag.
pub const FLAG_LACING: u32 = 0x9C;
/// Minimum cache.
pub const MIN_CACHE: u32 = 0x6DE7;
/// Default frame duration (nanoseconds).
pub const DEFAULT_DURATION: u32 = 0x23E383;
/// Maximum BlockAddID.
pub const MAX_BLOCK_ADDITION_ID: u32 = 0x55EE;
/// Track name.
pub const NAME: u32 = 0x536E;
/// Track language.
pub const LANGUAGE: u32 = 0x22B59C;
/// Codec ID.
pub const CODEC_ID: u32 = 0x86;
/// Codec private data.
pub const CODEC_PRIVATE: u32 = 0x63A2;
/// Codec name.
pub const CODEC_NAME: u32 = 0x258688;
/// Decode all frames flag.
pub const CODEC_DECODE_ALL: u32 = 0xAA;
/// Codec delay (nanoseconds).
pub const CODEC_DELAY: u32 = 0x56AA;
/// Seek pre-roll (nanoseconds).
pub const SEEK_PRE_ROLL: u32 = 0x56BB;
/// Video settings.
pub const VIDEO: u32 = 0xE0;
/// Pixel width.
pub const PIXEL_WIDTH: u32 = 0xB0;
/// Pixel height.
pub const PIXEL_HEIGHT: u32 = 0xBA;
/// Audio settings.
pub const AUDIO: u32 = 0xE1;
/// Sampling frequency.
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
/// Channel count.
pub const CHANNELS: u32 = 0x9F;

// =============================================================================
// Cueing Data
// =============================================================================

/// Cues.
pub const CUES: u32 = 0x1C53BB6B;
/// Cue point.
pub const CUE_POINT: u32 = 0xBB;
/// Cue time (ticks).
pub const CUE_TIME: u32 = 0xB3;
/// Cue track positions.
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
/// Cue track.
pub const CUE_TRACK: u32 = 0xF7;
/// Cluster position, relative to the segment data start.
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
/// Block position, relative to the cluster data start.
pub const CUE_RELATIVE_POSITION: u32 = 0xF0;
/// Cue duration (ticks).
pub const CUE_DURATION: u32 = 0xB2;
/// Block number within the cluster.
pub const CUE_BLOCK_NUMBER: u32 = 0x5378;

// =============================================================================
// Attachments
// =============================================================================

/// Attachments.
pub const ATTACHMENTS: u32 = 0x1941A469;
/// Attached file.
pub const ATTACHED_FILE: u32 = 0x61A7;
/// File description.
pub const FILE_DESCRIPTION: u32 = 0x467E;
/// File name.
pub const FILE_NAME: u32 = 0x466E;
/// File media type.
pub const FILE_MEDIA_TYPE: u32 = 0x4660;
/// File data.
pub const FILE_DATA: u32 = 0x465C;
/// File UID.
pub const FILE_UID: u32 = 0x46AE;

// =============================================================================
// Chapters
// =============================================================================

/// Chapters.
pub const CHAPTERS: u32 = 0x1043A770;
/// Edition entry.
pub const EDITION_ENTRY: u32 = 0x45B9;
/// Edition UID.
pub const EDITION_UID: u32 = 0x45BC;
/// Edition hidden flag.
pub const EDITION_FLAG_HIDDEN: u32 = 0x45BD;
/// Edition default flag.
pub const EDITION_FLAG_DEFAULT: u32 = 0x45DB;
/// Edition ordered flag.
pub const EDITION_FLAG_ORDERED: u32 = 0x45DD;
/// Chapter atom.
pub const CHAPTER_ATOM: u32 = 0xB6;
/// Chapter UID.
pub const CHAPTER_UID: u32 = 0x73C4;
/// Chapter string UID.
pub const CHAPTER_STRING_UID: u32 = 0x5654;
/// Chapter start (nanoseconds).
pub const CHAPTER_TIME_START: u32 = 0x91;
/// Chapter end (nanoseconds).
pub const CHAPTER_TIME_END: u32 = 0x92;
/// Chapter hidden flag.
pub const CHAPTER_FLAG_HIDDEN: u32 = 0x98;
/// Chapter enabled flag.
pub const CHAPTER_FLAG_ENABLED: u32 = 0x4598;
/// Chapter segment UID.
pub const CHAPTER_SEGMENT_UID: u32 = 0x6E67;
/// Chapter display.
pub const CHAPTER_DISPLAY: u32 = 0x80;
/// Chapter title.
pub const CHAP_STRING: u32 = 0x85;
/// Chapter language.
pub const CHAP_LANGUAGE: u32 = 0x437C;
/// Chapter country.
pub const CHAP_COUNTRY: u32 = 0x437E;

// =============================================================================
// Tags
// =============================================================================

/// Tags.
pub const TAGS: u32 = 0x1254C367;
/// Tag.
pub const TAG: u32 = 0x7373;
/// Targets.
pub const TARGETS: u32 = 0x63C0;
/// Target type value.
pub const TARGET_TYPE_VALUE: u32 = 0x68CA;
/// Target type.
pub const TARGET_TYPE: u32 = 0x63CA;
/// Target track UID.
pub const TAG_TRACK_UID: u32 = 0x63C5;
/// Target edition UID.
pub const TAG_EDITION_UID: u32 = 0x63C9;
/// Target chapter UID.
pub const TAG_CHAPTER_UID: u32 = 0x63C4;
/// Target attachment UID.
pub const TAG_ATTACHMENT_UID: u32 = 0x63C6;
/// Simple tag.
pub const SIMPLE_TAG: u32 = 0x67C8;
/// Tag name.
pub const TAG_NAME: u32 = 0x45A3;
/// Tag language.
pub const TAG_LANGUAGE: u32 = 0x447A;
/// Tag default flag.
pub const TAG_DEFAULT: u32 = 0x4484;
/// Tag string value.
pub const TAG_STRING: u32 = 0x4487;
/// Tag binary value.
pub const TAG_BINARY: u32 = 0x4485;

// =============================================================================
// Track Types
// =============================================================================

/// Track type: Video.
pub const TRACK_TYPE_VIDEO: u64 = 1;
/// Track type: Audio.
pub const TRACK_TYPE_AUDIO: u64 = 2;
/// Track type: Complex (combined audio/video).
pub const TRACK_TYPE_COMPLEX: u64 = 3;
/// Track type: Subtitle.
pub const TRACK_TYPE_SUBTITLE: u64 = 17;
/// Track type: Buttons.
pub const TRACK_TYPE_BUTTONS: u64 = 18;

/// Matroska codec IDs accepted in WebM documents.
pub mod codec_ids {
    /// VP8 video codec.
    pub const V_VP8: &str = "V_VP8";
    /// VP9 video codec.
    pub const V_VP9: &str = "V_VP9";
    /// AV1 video codec.
    pub const V_AV1: &str = "V_AV1";
    /// Opus audio codec.
    pub const A_OPUS: &str = "A_OPUS";
    /// Vorbis audio codec.
    pub const A_VORBIS: &str = "A_VORBIS";
    /// WebVTT subtitles.
    pub const S_TEXT_WEBVTT: &str = "S_TEXT/WEBVTT";
}

/// Check if a codec ID is WebM-compatible.
pub fn is_webm_compatible_codec(codec_id: &str) -> bool {
    matches!(
        codec_id,
        codec_ids::V_VP8
            | codec_ids::V_VP9
            | codec_ids::V_AV1
            | codec_ids::A_OPUS
            | codec_ids::A_VORBIS
            | codec_ids::S_TEXT_WEBVTT
    )
}

/// Value kind of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Master element (contains other elements).
    Master,
    /// Unsigned integer.
    Unsigned,
    /// Signed integer.
    Signed,
    /// Floating point.
    Float,
    /// ASCII string.
    String,
    /// UTF-8 string.
    Utf8,
    /// Date (nanoseconds since 2001-01-01).
    Date,
    /// Binary data.
    Binary,
    /// EbmlVoid padding.
    Void,
}

/// Get the kind of a known element, or `None` for unknown IDs.
pub fn element_kind(id: u32) -> Option<ElementKind> {
    match id {
        EBML | SEGMENT | SEEK_HEAD | SEEK | INFO | TRACKS | TRACK_ENTRY | VIDEO | AUDIO
        | CLUSTER | BLOCK_GROUP | CUES | CUE_POINT | CUE_TRACK_POSITIONS | CHAPTERS
        | EDITION_ENTRY | CHAPTER_ATOM | CHAPTER_DISPLAY | TAGS | TAG | TARGETS | SIMPLE_TAG
        | ATTACHMENTS | ATTACHED_FILE => Some(ElementKind::Master),

        EBML_VERSION | EBML_READ_VERSION | EBML_MAX_ID_LENGTH | EBML_MAX_SIZE_LENGTH
        | DOC_TYPE_VERSION | DOC_TYPE_READ_VERSION | TIMESTAMP_SCALE | TIMESTAMP | POSITION
        | PREV_SIZE | BLOCK_DURATION | REFERENCE_PRIORITY | TRACK_NUMBER | TRACK_UID
        | TRACK_TYPE | FLAG_ENABLED | FLAG_DEFAULT | FLAG_FORCED | FLAG_LACING | MIN_CACHE
        | DEFAULT_DURATION | MAX_BLOCK_ADDITION_ID | CODEC_DECODE_ALL | CODEC_DELAY
        | SEEK_PRE_ROLL | PIXEL_WIDTH | PIXEL_HEIGHT | CHANNELS | SEEK_POSITION | CUE_TIME
        | CUE_TRACK | CUE_CLUSTER_POSITION | CUE_RELATIVE_POSITION | CUE_DURATION
        | CUE_BLOCK_NUMBER | FILE_UID | EDITION_UID | EDITION_FLAG_HIDDEN
        | EDITION_FLAG_DEFAULT | EDITION_FLAG_ORDERED | CHAPTER_UID | CHAPTER_TIME_START
        | CHAPTER_TIME_END | CHAPTER_FLAG_HIDDEN | CHAPTER_FLAG_ENABLED | TARGET_TYPE_VALUE
        | TAG_TRACK_UID | TAG_EDITION_UID | TAG_CHAPTER_UID | TAG_ATTACHMENT_UID
        | TAG_DEFAULT => Some(ElementKind::Unsigned),

        REFERENCE_BLOCK | DISCARD_PADDING => Some(ElementKind::Signed),

        DURATION | SAMPLING_FREQUENCY => Some(ElementKind::Float),

        DOC_TYPE | CODEC_ID | LANGUAGE | CHAP_LANGUAGE | CHAP_COUNTRY | TARGET_TYPE
        | TAG_LANGUAGE | FILE_MEDIA_TYPE => Some(ElementKind::String),

        TITLE | MUXING_APP | WRITING_APP | SEGMENT_FILENAME | PREV_FILENAME | NEXT_FILENAME
        | NAME | CODEC_NAME | FILE_NAME | FILE_DESCRIPTION | CHAP_STRING | CHAPTER_STRING_UID
        | TAG_NAME | TAG_STRING => Some(ElementKind::Utf8),

        DATE_UTC => Some(ElementKind::Date),

        SEGMENT_UID | PREV_UID | NEXT_UID | SEGMENT_FAMILY | SEEK_ID | SIMPLE_BLOCK | BLOCK
        | CODEC_STATE | CODEC_PRIVATE | FILE_DATA | CHAPTER_SEGMENT_UID | TAG_BINARY
        | CRC32 => Some(ElementKind::Binary),

        VOID => Some(ElementKind::Void),

        _ => None,
    }
}

/// Check if an element is a master element (container).
pub fn is_master_element(id: u32) -> bool {
    element_kind(id) == Some(ElementKind::Master)
}

/// Elements that may appear as direct children of a Segment.
pub const TOP_LEVEL_IDS: [u32; 8] = [
    SEEK_HEAD,
    INFO,
    TRACKS,
    CLUSTER,
    CUES,
    ATTACHMENTS,
    CHAPTERS,
    TAGS,
];

/// Check if an ID is one of the Segment's level-1 children (Void excluded).
pub fn is_top_level(id: u32) -> bool {
    TOP_LEVEL_IDS.contains(&id)
}

/// Human-readable element name for diagnostics.
pub fn element_name(id: u32) -> &'static str {
    match id {
        EBML => "EBML",
        SEGMENT => "Segment",
        SEEK_HEAD => "SeekHead",
        INFO => "Info",
        TRACKS => "Tracks",
        CLUSTER => "Cluster",
        CUES => "Cues",
        ATTACHMENTS => "Attachments",
        CHAPTERS => "Chapters",
        TAGS => "Tags",
        VOID => "EbmlVoid",
        CRC32 => "CRC-32",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_kinds() {
        assert_eq!(element_kind(EBML), Some(ElementKind::Master));
        assert_eq!(element_kind(TRACK_NUMBER), Some(ElementKind::Unsigned));
        assert_eq!(element_kind(REFERENCE_BLOCK), Some(ElementKind::Signed));
        assert_eq!(element_kind(DURATION), Some(ElementKind::Float));
        assert_eq!(element_kind(CODEC_ID), Some(ElementKind::String));
        assert_eq!(element_kind(TITLE), Some(ElementKind::Utf8));
        assert_eq!(element_kind(CODEC_PRIVATE), Some(ElementKind::Binary));
        assert_eq!(element_kind(DATE_UTC), Some(ElementKind::Date));
        assert_eq!(element_kind(VOID), Some(ElementKind::Void));
        assert_eq!(element_kind(0x4321), None);
    }

    #[test]
    fn test_top_level() {
        assert!(is_top_level(TAGS));
        assert!(is_top_level(CLUSTER));
        assert!(!is_top_level(VOID));
        assert!(!is_top_level(SEGMENT));
        assert!(!is_top_level(TRACK_ENTRY));
    }

    #[test]
    fn test_webm_compatible_codecs() {
        assert!(is_webm_compatible_codec(codec_ids::V_VP9));
        assert!(is_webm_compatible_codec(codec_ids::A_OPUS));
        assert!(!is_webm_compatible_codec("V_MPEG4/ISO/AVC"));
        assert!(!is_webm_compatible_codec("A_AAC"));
    }

    #[test]
    fn test_element_names() {
        assert_eq!(element_name(TAGS), "Tags");
        assert_eq!(element_name(0x4321), "Unknown");
    }
}
