//! Output splitting rules.

use crate::element::Element;
use crate::elements::{
    CHAPTER_ATOM, CHAPTER_FLAG_ENABLED, CHAPTER_TIME_START, EDITION_ENTRY, EDITION_FLAG_DEFAULT,
};
use crate::error::{MkvError, Result};
use mkvkit_core::timestamp::parse_timestamp;
use serde::Serialize;

/// Gap between two packets of a track above which a new cluster is started
/// when gap detection is on. Matches the subtitle (SPU) packet cadence.
pub const SPU_GAP_THRESHOLD_NS: i64 = 2_000_000;

/// Chapter starts this close to the end of the input are not used as split
/// points.
pub const LAST_CHAPTER_TRIM_NS: i64 = 5_000_000_000;

/// What a split point measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitKind {
    /// Bytes per output file; repeats.
    Size,
    /// Nanoseconds per output file; repeats.
    Duration,
    /// Absolute timestamp in nanoseconds; one-shot.
    Timestamp,
    /// Frame number of the reference track; one-shot.
    Frame,
    /// Chapter start in nanoseconds; one-shot.
    Chapter,
}

/// A rule for switching to a new output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitPoint {
    /// Bytes, nanoseconds or a frame number depending on `kind`.
    pub value: i64,
    /// Kind of the split point.
    pub kind: SplitKind,
    /// Force a cue entry at the first block after the boundary.
    pub is_cue_point: bool,
}

impl SplitPoint {
    /// Create a split point.
    pub fn new(value: i64, kind: SplitKind) -> Self {
        Self {
            value,
            kind,
            is_cue_point: false,
        }
    }

    /// Mark the boundary as a cue point.
    pub fn with_cue_point(mut self, cue_point: bool) -> Self {
        self.is_cue_point = cue_point;
        self
    }

    /// `Size` and `Duration` apply again after each split.
    pub fn is_repeating(&self) -> bool {
        matches!(self.kind, SplitKind::Size | SplitKind::Duration)
    }

    /// Chapter split points from the starts of the top-level chapters of the
    /// default edition (or the first edition if none is flagged default).
    ///
    /// A chapter starting at zero does not produce a split point.
    pub fn from_chapters(chapters: &Element) -> Vec<SplitPoint> {
        let edition = chapters
            .find_children(EDITION_ENTRY)
            .find(|e| e.child_unsigned(EDITION_FLAG_DEFAULT) == Some(1))
            .or_else(|| chapters.find_child(EDITION_ENTRY));
        let Some(edition) = edition else {
            return Vec::new();
        };

        let mut starts: Vec<i64> = edition
            .find_children(CHAPTER_ATOM)
            .filter(|atom| atom.child_unsigned(CHAPTER_FLAG_ENABLED) != Some(0))
            .filter_map(|atom| atom.child_unsigned(CHAPTER_TIME_START))
            .filter_map(|start| i64::try_from(start).ok())
            .filter(|&start| start > 0)
            .collect();
        starts.sort_unstable();
        starts.dedup();
        starts
            .into_iter()
            .map(|start| SplitPoint::new(start, SplitKind::Chapter).with_cue_point(true))
            .collect()
    }

    /// Drop chapter split points within [`LAST_CHAPTER_TRIM_NS`] of the end.
    pub fn trim_chapters_near_end(points: &mut Vec<SplitPoint>, total_duration_ns: i64) {
        points.retain(|p| {
            p.kind != SplitKind::Chapter || p.value < total_duration_ns - LAST_CHAPTER_TRIM_NS
        });
    }

    /// Parse a split specification.
    ///
    /// Accepted forms: `size:100M` (or a bare size), `duration:300s`,
    /// `timestamps:10s,00:05:00`, `frames:250,500`. Chapter splitting needs
    /// the chapter tree and goes through [`SplitPoint::from_chapters`].
    pub fn parse(spec: &str) -> Result<Vec<SplitPoint>> {
        let spec = spec.trim();
        let (kind, value) = spec.split_once(':').unwrap_or(("size", spec));
        match kind.to_ascii_lowercase().as_str() {
            "size" => Ok(vec![SplitPoint::new(parse_size(value)?, SplitKind::Size)]),
            "duration" => {
                let duration = parse_positive_timestamp(value)?;
                Ok(vec![SplitPoint::new(duration, SplitKind::Duration)])
            }
            "timestamps" | "timecodes" => {
                let mut points = value
                    .split(',')
                    .map(|v| {
                        parse_positive_timestamp(v).map(|ts| SplitPoint::new(ts, SplitKind::Timestamp))
                    })
                    .collect::<Result<Vec<_>>>()?;
                points.sort_by_key(|p| p.value);
                Ok(points)
            }
            "frames" => {
                let mut points = value
                    .split(',')
                    .map(|v| {
                        v.trim()
                            .parse::<i64>()
                            .ok()
                            .filter(|&n| n > 0)
                            .map(|n| SplitPoint::new(n, SplitKind::Frame))
                            .ok_or_else(|| invalid(spec))
                    })
                    .collect::<Result<Vec<_>>>()?;
                points.sort_by_key(|p| p.value);
                Ok(points)
            }
            _ => Err(invalid(spec)),
        }
    }
}

fn invalid(spec: &str) -> MkvError {
    MkvError::Other(format!("invalid split specification {:?}", spec))
}

fn parse_positive_timestamp(value: &str) -> Result<i64> {
    parse_timestamp(value)
        .filter(|&ns| ns > 0)
        .ok_or_else(|| invalid(value))
}

fn parse_size(value: &str) -> Result<i64> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 1024),
        Some((i, 'm' | 'M')) => (&value[..i], 1024 * 1024),
        Some((i, 'g' | 'G')) => (&value[..i], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|&n| n > 0)
        .ok_or_else(|| invalid(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::CHAPTER_UID;

    fn atom(start: u64) -> Element {
        Element::master(
            CHAPTER_ATOM,
            vec![
                Element::unsigned(CHAPTER_UID, start + 1),
                Element::unsigned(CHAPTER_TIME_START, start),
            ],
        )
    }

    #[test]
    fn test_parse_size() {
        let points = SplitPoint::parse("size:100M").unwrap();
        assert_eq!(points, vec![SplitPoint::new(100 * 1024 * 1024, SplitKind::Size)]);
        assert_eq!(SplitPoint::parse("2048").unwrap()[0].value, 2048);
        assert!(SplitPoint::parse("size:lots").is_err());
        assert!(points[0].is_repeating());
    }

    #[test]
    fn test_parse_duration_and_timestamps() {
        let duration = SplitPoint::parse("duration:300s").unwrap();
        assert_eq!(duration[0].value, 300_000_000_000);
        assert_eq!(duration[0].kind, SplitKind::Duration);

        let stamps = SplitPoint::parse("timestamps:00:01:00,10s").unwrap();
        let values: Vec<i64> = stamps.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10_000_000_000, 60_000_000_000]);
        assert!(!stamps[0].is_repeating());
    }

    #[test]
    fn test_parse_frames() {
        let frames = SplitPoint::parse("frames:500,250").unwrap();
        assert_eq!(frames[0], SplitPoint::new(250, SplitKind::Frame));
        assert!(SplitPoint::parse("frames:0").is_err());
        assert!(SplitPoint::parse("bogus:1").is_err());
    }

    #[test]
    fn test_from_chapters() {
        let chapters = Element::master(
            crate::elements::CHAPTERS,
            vec![Element::master(
                EDITION_ENTRY,
                vec![atom(0), atom(90_000_000_000), atom(30_000_000_000)],
            )],
        );
        let mut points = SplitPoint::from_chapters(&chapters);
        let values: Vec<i64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![30_000_000_000, 90_000_000_000]);
        assert!(points.iter().all(|p| p.is_cue_point));

        SplitPoint::trim_chapters_near_end(&mut points, 93_000_000_000);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 30_000_000_000);
    }
}
