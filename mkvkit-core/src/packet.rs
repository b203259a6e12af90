//! Packet abstraction for timestamped frames travelling from packetizers
//! to the cluster assembler.

use crate::error::Result;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Flags for packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// The packet can be decoded without reference to other packets.
        const KEYFRAME = 0x0001;
        /// The packet may be dropped by a player under load.
        const DISCARDABLE = 0x0002;
        /// The frame is decoded but not displayed.
        const INVISIBLE = 0x0004;
    }
}

/// One encoded frame for one track.
///
/// All timestamps and durations are in nanoseconds. References are absolute
/// timestamps of the frames this one depends on.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Matroska track number this packet belongs to.
    pub track_number: u64,
    /// Presentation timestamp in nanoseconds.
    pub timestamp: i64,
    /// Duration in nanoseconds, when known.
    pub duration: Option<i64>,
    /// Packet flags.
    pub flags: PacketFlags,
    /// Timestamp of the previous frame this one references.
    pub back_reference: Option<i64>,
    /// Timestamp of the following frame this one references.
    pub forward_reference: Option<i64>,
    /// Nanoseconds of padding to discard at the end of the decoded frame.
    pub discard_padding: Option<i64>,
    data: Vec<u8>,
}

impl Packet {
    /// Create a packet for a track at a timestamp.
    pub fn new(track_number: u64, timestamp: i64, data: Vec<u8>) -> Self {
        Self {
            track_number,
            timestamp,
            duration: None,
            flags: PacketFlags::empty(),
            back_reference: None,
            forward_reference: None,
            discard_padding: None,
            data,
        }
    }

    /// Get the packet data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the packet data.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Get the size of the packet data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this packet carries no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this is a key frame.
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Set the key frame flag.
    pub fn set_key_frame(&mut self, key_frame: bool) {
        self.flags.set(PacketFlags::KEYFRAME, key_frame);
    }

    /// Check if the packet is discardable.
    pub fn is_discardable(&self) -> bool {
        self.flags.contains(PacketFlags::DISCARDABLE)
    }

    /// Timestamp at which this packet ends (start when the duration is unknown).
    pub fn end_timestamp(&self) -> i64 {
        self.timestamp + self.duration.unwrap_or(0)
    }

    /// Set the key frame flag (builder style).
    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.set_key_frame(key_frame);
        self
    }

    /// Set the duration (builder style).
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set flags (builder style).
    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the backward reference (builder style).
    pub fn with_back_reference(mut self, timestamp: i64) -> Self {
        self.back_reference = Some(timestamp);
        self
    }

    /// Set the forward reference (builder style).
    pub fn with_forward_reference(mut self, timestamp: i64) -> Self {
        self.forward_reference = Some(timestamp);
        self
    }

    /// Set the discard padding (builder style).
    pub fn with_discard_padding(mut self, padding: i64) -> Self {
        self.discard_padding = Some(padding);
        self
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("track_number", &self.track_number)
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("size", &self.size())
            .field("flags", &self.flags)
            .finish()
    }
}

/// A source of packets for one or more tracks.
///
/// Codec-specific packetizers and container readers implement this; the
/// muxing driver pulls from every packetizer and hands the packets to the
/// assembler.
pub trait Packetizer {
    /// Track numbers this packetizer produces packets for.
    fn track_numbers(&self) -> Vec<u64>;

    /// Produce the next packet, or `None` at end of stream.
    fn next_packet(&mut self) -> Result<Option<Packet>>;
}
