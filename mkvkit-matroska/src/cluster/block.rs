//! SimpleBlock and BlockGroup encoding.

use super::lacing::{lacing_header, LacingKind, LacingMode};
use crate::ebml::{encode_vint, read_vint};
use crate::element::Element;
use crate::elements::{
    BLOCK, BLOCK_DURATION, BLOCK_GROUP, DISCARD_PADDING, REFERENCE_BLOCK, SIMPLE_BLOCK,
};
use crate::error::{MkvError, Result};
use mkvkit_core::{Packet, PacketFlags, TimestampScale};

/// Key frame flag of a SimpleBlock.
pub const FLAG_KEY_FRAME: u8 = 0x80;
/// Invisible flag.
pub const FLAG_INVISIBLE: u8 = 0x08;
/// Discardable flag of a SimpleBlock.
pub const FLAG_DISCARDABLE: u8 = 0x01;

/// The fixed part of a Block or SimpleBlock payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Track number.
    pub track_number: u64,
    /// Timestamp relative to the cluster, in ticks.
    pub relative_timestamp: i16,
    /// Flags byte.
    pub flags: u8,
}

impl BlockHeader {
    /// Append the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let (track, len) = encode_vint(self.track_number)?;
        out.extend_from_slice(&track[..len]);
        out.extend_from_slice(&self.relative_timestamp.to_be_bytes());
        out.push(self.flags);
        Ok(())
    }

    /// Parse a header from the start of a block payload. Returns the header
    /// and its length.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = data;
        let (track_number, len) = read_vint(&mut cursor)
            .map_err(|_| MkvError::InvalidBlock("unreadable track number".into()))?;
        if data.len() < len + 3 {
            return Err(MkvError::InvalidBlock("block header too small".into()));
        }
        let relative_timestamp = i16::from_be_bytes([data[len], data[len + 1]]);
        Ok((
            Self {
                track_number,
                relative_timestamp,
                flags: data[len + 2],
            },
            len + 3,
        ))
    }

    /// Key frame flag (SimpleBlock only).
    pub fn is_key_frame(&self) -> bool {
        self.flags & FLAG_KEY_FRAME != 0
    }

    /// Invisible flag.
    pub fn is_invisible(&self) -> bool {
        self.flags & FLAG_INVISIBLE != 0
    }

    /// Discardable flag (SimpleBlock only).
    pub fn is_discardable(&self) -> bool {
        self.flags & FLAG_DISCARDABLE != 0
    }

    /// Lacing used by the block.
    pub fn lacing(&self) -> LacingKind {
        LacingKind::from_flags(self.flags)
    }
}

/// How a track's packets are rendered.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockStyle {
    pub default_duration: Option<i64>,
    pub lacing: Option<LacingMode>,
    pub simple_blocks: bool,
}

/// A block ready to be placed in a cluster.
#[derive(Debug, Clone)]
pub(crate) struct RenderedBlock {
    pub element: Element,
    pub track_number: u64,
    pub timestamp: i64,
    pub relative_ticks: i16,
    pub key_frame: bool,
    pub duration_ticks: Option<u64>,
    pub frames: usize,
}

impl RenderedBlock {
    pub fn encoded_size(&self) -> u64 {
        self.element.encoded_size()
    }
}

/// Whether `packet` may be laced on a track with `style`.
pub(crate) fn lacing_candidate(packet: &Packet, style: &BlockStyle) -> bool {
    style.lacing.is_some()
        && style.default_duration.is_some()
        && packet.is_key_frame()
        && packet.back_reference.is_none()
        && packet.forward_reference.is_none()
        && packet.discard_padding.is_none()
        && packet.duration.map_or(true, |d| Some(d) == style.default_duration)
}

fn needs_block_group(packet: &Packet, style: &BlockStyle) -> bool {
    let duration_differs = match (packet.duration, style.default_duration) {
        (Some(duration), Some(default)) => duration != default,
        (Some(_), None) => true,
        (None, _) => false,
    };
    let has_references = packet.back_reference.is_some() || packet.forward_reference.is_some();
    !style.simple_blocks
        || packet.discard_padding.is_some()
        || duration_differs
        || (!packet.is_key_frame() && has_references)
}

/// Render `packets` (one, or several to be laced) as a SimpleBlock or a
/// BlockGroup relative to a cluster starting at `cluster_ticks`.
pub(crate) fn render_block(
    packets: &[Packet],
    cluster_ticks: i64,
    scale: TimestampScale,
    style: &BlockStyle,
) -> Result<RenderedBlock> {
    let first = packets
        .first()
        .ok_or_else(|| MkvError::InvalidBlock("no packets to render".into()))?;
    let ticks = scale.to_ticks(first.timestamp);
    let relative_timestamp = i16::try_from(ticks - cluster_ticks).map_err(|_| {
        MkvError::InvalidBlock(format!(
            "relative timestamp {} out of range",
            ticks - cluster_ticks
        ))
    })?;

    let frames: Vec<&[u8]> = packets.iter().map(Packet::data).collect();
    let (lacing, lacing_bytes) = match style.lacing {
        Some(mode) if packets.len() > 1 => lacing_header(&frames, mode)?,
        _ if packets.len() > 1 => {
            return Err(MkvError::InvalidLacing("track does not allow lacing".into()))
        }
        _ => (LacingKind::None, Vec::new()),
    };

    let block_group = needs_block_group(first, style);
    let mut flags = lacing.flag_bits();
    if first.flags.contains(PacketFlags::INVISIBLE) {
        flags |= FLAG_INVISIBLE;
    }
    if !block_group {
        if first.is_key_frame() {
            flags |= FLAG_KEY_FRAME;
        }
        if first.is_discardable() {
            flags |= FLAG_DISCARDABLE;
        }
    }

    let payload_len: usize = frames.iter().map(|f| f.len()).sum();
    let mut payload = Vec::with_capacity(12 + lacing_bytes.len() + payload_len);
    BlockHeader {
        track_number: first.track_number,
        relative_timestamp,
        flags,
    }
    .encode(&mut payload)?;
    payload.extend_from_slice(&lacing_bytes);
    for frame in &frames {
        payload.extend_from_slice(frame);
    }

    let duration_ticks = first
        .duration
        .or(style.default_duration.map(|d| d * packets.len() as i64))
        .map(|d| scale.to_ticks_rounded(d).max(0) as u64);

    let element = if block_group {
        let mut children = vec![Element::binary(BLOCK, payload)];
        if let Some(duration) = first.duration.filter(|&d| Some(d) != style.default_duration) {
            children.push(Element::unsigned(
                BLOCK_DURATION,
                scale.to_ticks_rounded(duration).max(0) as u64,
            ));
        }
        for reference in [first.back_reference, first.forward_reference].into_iter().flatten() {
            children.push(Element::signed(
                REFERENCE_BLOCK,
                scale.to_ticks(reference) - ticks,
            ));
        }
        if let Some(padding) = first.discard_padding {
            children.push(Element::signed(DISCARD_PADDING, padding));
        }
        Element::master(BLOCK_GROUP, children)
    } else {
        Element::binary(SIMPLE_BLOCK, payload)
    };

    Ok(RenderedBlock {
        element,
        track_number: first.track_number,
        timestamp: first.timestamp,
        relative_ticks: relative_timestamp,
        key_frame: first.is_key_frame(),
        duration_ticks,
        frames: packets.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLE: BlockStyle = BlockStyle {
        default_duration: Some(20_000_000),
        lacing: Some(LacingMode::Auto),
        simple_blocks: true,
    };

    #[test]
    fn test_header_roundtrip() {
        let header = BlockHeader {
            track_number: 200,
            relative_timestamp: -5,
            flags: FLAG_KEY_FRAME | 0x06,
        };
        let mut out = Vec::new();
        header.encode(&mut out).unwrap();
        assert_eq!(out.len(), 5);
        let (parsed, len) = BlockHeader::parse(&out).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(len, 5);
        assert_eq!(parsed.lacing(), LacingKind::Ebml);
    }

    #[test]
    fn test_simple_block_key_frame() {
        let packet = Packet::new(1, 1_040_000_000, vec![9, 9]).with_key_frame(true);
        let block = render_block(&[packet], 1000, TimestampScale::DEFAULT, &STYLE).unwrap();
        assert_eq!(block.element.id, SIMPLE_BLOCK);
        assert_eq!(
            block.element.as_binary().unwrap(),
            &[0x81, 0x00, 0x28, 0x80, 9, 9]
        );
        assert_eq!(block.duration_ticks, Some(20));
    }

    #[test]
    fn test_block_group_for_references() {
        let packet = Packet::new(1, 80_000_000, vec![1])
            .with_back_reference(40_000_000)
            .with_forward_reference(120_000_000);
        let block = render_block(&[packet], 0, TimestampScale::DEFAULT, &STYLE).unwrap();
        assert_eq!(block.element.id, BLOCK_GROUP);
        let refs: Vec<i64> = block
            .element
            .find_children(REFERENCE_BLOCK)
            .filter_map(Element::as_signed)
            .collect();
        assert_eq!(refs, vec![-40, 40]);
        let (header, _) =
            BlockHeader::parse(block.element.child_binary(BLOCK).unwrap()).unwrap();
        assert!(!header.is_key_frame());
    }

    #[test]
    fn test_block_group_for_duration_and_padding() {
        let packet = Packet::new(2, 0, vec![1])
            .with_key_frame(true)
            .with_duration(13_000_000)
            .with_discard_padding(6_500_000);
        let block = render_block(&[packet], 0, TimestampScale::DEFAULT, &STYLE).unwrap();
        assert_eq!(block.element.child_unsigned(BLOCK_DURATION), Some(13));
        assert_eq!(block.element.child_signed(DISCARD_PADDING), Some(6_500_000));
    }

    #[test]
    fn test_relative_timestamp_overflow() {
        let packet = Packet::new(1, 40_000_000_000, vec![1]);
        assert!(render_block(&[packet], 0, TimestampScale::DEFAULT, &STYLE).is_err());
    }

    #[test]
    fn test_laced_block() {
        let packets: Vec<Packet> = (0..3)
            .map(|i| Packet::new(1, i * 20_000_000, vec![i as u8; 4]).with_key_frame(true))
            .collect();
        assert!(packets.iter().all(|p| lacing_candidate(p, &STYLE)));
        let block = render_block(&packets, 0, TimestampScale::DEFAULT, &STYLE).unwrap();
        let data = block.element.as_binary().unwrap();
        let (header, len) = BlockHeader::parse(data).unwrap();
        assert_eq!(header.lacing(), LacingKind::Fixed);
        assert_eq!(data[len], 2);
        assert_eq!(block.frames, 3);
        assert_eq!(block.duration_ticks, Some(60));
    }
}
