//! # mkvkit core
//!
//! Core types shared by the mkvkit crates.
//!
//! This crate provides the building blocks used by both the editing and the
//! muxing paths:
//! - Error handling types
//! - The [`Packet`] contract between packetizers and the cluster assembler
//! - Timestamp scale conversion
//! - The per-job [`MuxSession`] (hack flags, unique ID generation)
//! - Cooperative cancellation

pub mod cancel;
pub mod error;
pub mod packet;
pub mod session;
pub mod timestamp;

pub use cancel::CancellationToken;
pub use error::{ContainerError, Error, Result};
pub use packet::{Packet, PacketFlags, Packetizer};
pub use session::{HackFlags, MuxSession, UidGenerator, UidKind};
pub use timestamp::{FormattedTimestamp, TimestampScale};
