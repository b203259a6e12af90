//! Block lacing: several frames of one track in a single block.

use crate::ebml::{self, encode_signed_vint, encode_vint, signed_vint_length};
use crate::error::{MkvError, Result};
use serde::Serialize;
use std::io::Cursor;
use std::str::FromStr;

/// Most frames a single laced block carries.
pub const MAX_LACED_FRAMES: usize = 8;

/// Lacing found in a block's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LacingKind {
    /// One frame.
    None,
    /// Xiph lacing.
    Xiph,
    /// Fixed-size lacing.
    Fixed,
    /// EBML lacing.
    Ebml,
}

impl LacingKind {
    /// Lacing bits of the block flags byte.
    pub fn flag_bits(self) -> u8 {
        match self {
            LacingKind::None => 0x00,
            LacingKind::Xiph => 0x02,
            LacingKind::Fixed => 0x04,
            LacingKind::Ebml => 0x06,
        }
    }

    /// Decode the lacing bits of a block flags byte.
    pub fn from_flags(flags: u8) -> Self {
        match flags & 0x06 {
            0x02 => LacingKind::Xiph,
            0x04 => LacingKind::Fixed,
            0x06 => LacingKind::Ebml,
            _ => LacingKind::None,
        }
    }
}

/// Lacing a track is configured to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LacingMode {
    /// Xiph lacing.
    Xiph,
    /// EBML lacing.
    Ebml,
    /// Fixed-size lacing; only used when all frames have equal sizes.
    Fixed,
    /// Whichever of the above produces the smallest header.
    #[default]
    Auto,
}

impl FromStr for LacingMode {
    type Err = MkvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xiph" => Ok(LacingMode::Xiph),
            "ebml" => Ok(LacingMode::Ebml),
            "fixed" => Ok(LacingMode::Fixed),
            "auto" => Ok(LacingMode::Auto),
            other => Err(MkvError::InvalidLacing(format!("unknown lacing mode {:?}", other))),
        }
    }
}

fn xiph_sizes(sizes: &[usize]) -> Vec<u8> {
    let mut out = Vec::new();
    for &size in &sizes[..sizes.len() - 1] {
        let mut remaining = size;
        while remaining >= 255 {
            out.push(255);
            remaining -= 255;
        }
        out.push(remaining as u8);
    }
    out
}

fn ebml_sizes(sizes: &[usize]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let (first, len) = encode_vint(sizes[0] as u64)?;
    out.extend_from_slice(&first[..len]);
    for pair in sizes[..sizes.len() - 1].windows(2) {
        let delta = pair[1] as i64 - pair[0] as i64;
        let (bytes, len) = encode_signed_vint(delta, signed_vint_length(delta))?;
        out.extend_from_slice(&bytes[..len]);
    }
    Ok(out)
}

/// Build the lacing header (frame count and sizes) for `frames`.
///
/// Returns the lacing used and the header bytes; the frame payloads follow
/// the header unchanged.
pub fn lacing_header(frames: &[&[u8]], mode: LacingMode) -> Result<(LacingKind, Vec<u8>)> {
    if frames.len() < 2 {
        return Ok((LacingKind::None, Vec::new()));
    }
    if frames.len() > MAX_LACED_FRAMES {
        return Err(MkvError::InvalidLacing(format!(
            "{} frames exceed the limit of {}",
            frames.len(),
            MAX_LACED_FRAMES
        )));
    }

    let sizes: Vec<usize> = frames.iter().map(|f| f.len()).collect();
    let equal = sizes.iter().all(|&s| s == sizes[0]);

    let (kind, sizes_bytes) = match mode {
        LacingMode::Xiph => (LacingKind::Xiph, xiph_sizes(&sizes)),
        LacingMode::Ebml => (LacingKind::Ebml, ebml_sizes(&sizes)?),
        LacingMode::Fixed if equal => (LacingKind::Fixed, Vec::new()),
        LacingMode::Fixed => {
            return Err(MkvError::InvalidLacing(
                "fixed lacing needs frames of equal size".into(),
            ))
        }
        LacingMode::Auto if equal => (LacingKind::Fixed, Vec::new()),
        LacingMode::Auto => {
            let xiph = xiph_sizes(&sizes);
            let ebml = ebml_sizes(&sizes)?;
            if ebml.len() < xiph.len() {
                (LacingKind::Ebml, ebml)
            } else {
                (LacingKind::Xiph, xiph)
            }
        }
    };

    let mut header = Vec::with_capacity(1 + sizes_bytes.len());
    header.push((frames.len() - 1) as u8);
    header.extend_from_slice(&sizes_bytes);
    Ok((kind, header))
}

/// Split the payload of a laced block (everything after the block header)
/// into frames.
pub fn parse_laced_frames(data: &[u8], kind: LacingKind) -> Result<Vec<Vec<u8>>> {
    let (count, rest) = match (kind, data.split_first()) {
        (LacingKind::None, _) => return Ok(vec![data.to_vec()]),
        (_, Some((&count, rest))) => (count, rest),
        (_, None) => return Err(MkvError::InvalidLacing("no data after block header".into())),
    };
    let num_frames = count as usize + 1;

    let (sizes, frames_start) = match kind {
        LacingKind::Xiph => parse_xiph_lacing(rest, num_frames)?,
        LacingKind::Ebml => parse_ebml_lacing(rest, num_frames)?,
        LacingKind::Fixed | LacingKind::None => {
            if rest.len() % num_frames != 0 {
                return Err(MkvError::InvalidLacing(format!(
                    "fixed lacing: {} bytes not divisible into {} frames",
                    rest.len(),
                    num_frames
                )));
            }
            (vec![rest.len() / num_frames; num_frames - 1], 0)
        }
    };

    let payload = &rest[frames_start..];
    let used: usize = sizes.iter().sum();
    let last = payload.len().checked_sub(used).ok_or_else(|| {
        MkvError::InvalidLacing(format!(
            "frame sizes total {} but only {} bytes remain",
            used,
            payload.len()
        ))
    })?;

    let mut frames = Vec::with_capacity(num_frames);
    let mut offset = 0;
    for size in sizes.into_iter().chain(std::iter::once(last)) {
        frames.push(payload[offset..offset + size].to_vec());
        offset += size;
    }
    Ok(frames)
}

/// Sizes of all frames but the last, and the length of the size list.
fn parse_xiph_lacing(data: &[u8], num_frames: usize) -> Result<(Vec<usize>, usize)> {
    let mut sizes = Vec::with_capacity(num_frames);
    let mut offset = 0;

    for _ in 0..num_frames - 1 {
        let mut size = 0usize;
        loop {
            let byte = *data.get(offset).ok_or_else(|| {
                MkvError::InvalidLacing("xiph lacing: unexpected end of data".into())
            })? as usize;
            offset += 1;
            size += byte;
            if byte < 255 {
                break;
            }
        }
        sizes.push(size);
    }

    Ok((sizes, offset))
}

fn parse_ebml_lacing(data: &[u8], num_frames: usize) -> Result<(Vec<usize>, usize)> {
    if num_frames < 2 {
        return Ok((Vec::new(), 0));
    }
    let mut sizes = Vec::with_capacity(num_frames);
    let mut cursor = Cursor::new(data);

    let (first, _) = ebml::read_vint(&mut cursor)?;
    sizes.push(first as usize);
    let mut previous = first as i64;

    for _ in 1..num_frames - 1 {
        let (delta, _) = ebml::read_signed_vint(&mut cursor)?;
        previous += delta;
        if previous < 0 {
            return Err(MkvError::InvalidLacing("ebml lacing: negative frame size".into()));
        }
        sizes.push(previous as usize);
    }

    Ok((sizes, cursor.position() as usize))
}
