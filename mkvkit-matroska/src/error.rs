//! Matroska-specific error types.
//!
//! Structural errors carry the byte offset at which they were detected so
//! that tooling can point at the broken spot in the file.

use mkvkit_core::error::ContainerError;
use thiserror::Error;

/// Matroska error types.
#[derive(Error, Debug)]
pub enum MkvError {
    /// Invalid EBML header.
    #[error("Invalid EBML header: {0}")]
    InvalidEbmlHeader(String),

    /// The file does not start with an EBML header.
    #[error("Not a Matroska file: no EBML header at offset {offset}")]
    NotMatroska {
        /// Byte offset where the EBML header was expected.
        offset: u64,
    },

    /// Invalid element ID.
    #[error("Invalid element ID at offset {offset}")]
    InvalidElementId {
        /// Byte offset where the invalid ID was found.
        offset: u64,
    },

    /// Invalid element size.
    #[error("Invalid element size at offset {offset}: {message}")]
    InvalidElementSize {
        /// Byte offset where the invalid size was found.
        offset: u64,
        /// Description of the size error.
        message: String,
    },

    /// Invalid variable-length integer.
    #[error("Invalid VINT encoding at offset {offset}")]
    InvalidVint {
        /// Byte offset where the invalid VINT was found.
        offset: u64,
    },

    /// VINT overflow (value too large for the requested width).
    #[error("VINT overflow: value exceeds maximum representable size")]
    VintOverflow,

    /// Missing required element.
    #[error("Missing required element: {0}")]
    MissingElement(String),

    /// A top-level element cannot be decoded or runs past the segment end.
    #[error("Corrupt file at offset {offset}: {reason}")]
    CorruptFile {
        /// Byte offset of the offending element.
        offset: u64,
        /// What is wrong with it.
        reason: String,
    },

    /// An element's declared size disagrees with its decodable content.
    #[error("Corrupt element 0x{id:X} at offset {offset}: {reason}")]
    CorruptElement {
        /// Byte offset of the element.
        offset: u64,
        /// The element ID.
        id: u32,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid block structure.
    #[error("Invalid block structure: {0}")]
    InvalidBlock(String),

    /// Invalid lacing structure.
    #[error("Invalid lacing: {0}")]
    InvalidLacing(String),

    /// Cluster without timestamp.
    #[error("Cluster missing timestamp at offset {offset}")]
    ClusterMissingTimestamp {
        /// Byte offset of the cluster missing a timestamp.
        offset: u64,
    },

    /// Track not found.
    #[error("Track {track_number} not found")]
    TrackNotFound {
        /// The track number that was not found.
        track_number: u64,
    },

    /// A packet arrived below the already written watermark.
    #[error("Packet for track {track_number} at {timestamp_ns}ns arrived out of order")]
    OutOfOrder {
        /// Track of the rejected packet.
        track_number: u64,
        /// Timestamp of the rejected packet.
        timestamp_ns: i64,
    },

    /// Recursion limit exceeded.
    #[error("Recursion limit exceeded at depth {depth}")]
    RecursionLimit {
        /// The depth at which recursion was limited.
        depth: u32,
    },

    /// Invalid WebM file (non-WebM codecs used).
    #[error("Invalid WebM file: {0}")]
    InvalidWebM(String),

    /// The assembler is in a state that does not accept the call.
    #[error("Invalid assembler state: {0}")]
    InvalidState(String),

    /// Scan or job cancelled through a cancellation token.
    #[error("Operation aborted")]
    Aborted,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl From<String> for MkvError {
    fn from(s: String) -> Self {
        MkvError::Other(s)
    }
}

impl From<&str> for MkvError {
    fn from(s: &str) -> Self {
        MkvError::Other(s.to_string())
    }
}

impl MkvError {
    /// Replace a placeholder offset with the absolute position it refers to.
    ///
    /// The low-level VINT readers operate on bare `Read` streams and report
    /// offset 0; callers that know the absolute position patch it in.
    pub fn at_offset(self, position: u64) -> Self {
        match self {
            MkvError::InvalidVint { offset } => MkvError::InvalidVint {
                offset: offset + position,
            },
            MkvError::InvalidElementId { offset } => MkvError::InvalidElementId {
                offset: offset + position,
            },
            MkvError::InvalidElementSize { offset, message } => MkvError::InvalidElementSize {
                offset: offset + position,
                message,
            },
            other => other,
        }
    }
}

/// Result type for Matroska operations.
pub type Result<T> = std::result::Result<T, MkvError>;

/// Convert MkvError to mkvkit_core::Error.
impl From<MkvError> for mkvkit_core::Error {
    fn from(err: MkvError) -> Self {
        let container = match err {
            MkvError::Io(e) => return mkvkit_core::Error::Io(e),
            MkvError::Aborted => return mkvkit_core::Error::Cancelled,
            MkvError::NotMatroska { .. } => ContainerError::NotMatroska,
            MkvError::MissingElement(name) => ContainerError::MissingElement(name),
            MkvError::TrackNotFound { track_number } => ContainerError::TrackNotFound {
                track: track_number,
            },
            MkvError::OutOfOrder {
                track_number,
                timestamp_ns,
            } => ContainerError::OutOfOrder {
                track: track_number,
                timestamp_ns,
            },
            MkvError::InvalidEbmlHeader(_)
            | MkvError::InvalidElementId { .. }
            | MkvError::InvalidElementSize { .. }
            | MkvError::InvalidVint { .. }
            | MkvError::CorruptFile { .. }
            | MkvError::CorruptElement { .. }
            | MkvError::InvalidBlock(_)
            | MkvError::InvalidLacing(_)
            | MkvError::ClusterMissingTimestamp { .. }
            | MkvError::RecursionLimit { .. } => ContainerError::Malformed(err.to_string()),
            other => ContainerError::Other(other.to_string()),
        };
        mkvkit_core::Error::Container(container)
    }
}

/// Convert mkvkit_core::Error back into MkvError at packetizer boundaries.
impl From<mkvkit_core::Error> for MkvError {
    fn from(err: mkvkit_core::Error) -> Self {
        match err {
            mkvkit_core::Error::Io(e) => MkvError::Io(e),
            mkvkit_core::Error::Cancelled => MkvError::Aborted,
            mkvkit_core::Error::Container(ContainerError::TrackNotFound { track }) => {
                MkvError::TrackNotFound {
                    track_number: track,
                }
            }
            other => MkvError::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MkvError::InvalidElementId { offset: 100 };
        assert_eq!(err.to_string(), "Invalid element ID at offset 100");

        let err = MkvError::CorruptElement {
            offset: 40,
            id: 0x1254C367,
            reason: "child overruns parent".into(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt element 0x1254C367 at offset 40: child overruns parent"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: MkvError = "test error".into();
        assert!(matches!(err, MkvError::Other(_)));
    }

    #[test]
    fn test_at_offset() {
        let err = MkvError::InvalidVint { offset: 0 }.at_offset(512);
        assert!(matches!(err, MkvError::InvalidVint { offset: 512 }));
        let err = MkvError::Aborted.at_offset(512);
        assert!(matches!(err, MkvError::Aborted));
    }

    #[test]
    fn test_conversion_to_core_error() {
        let mkv_err = MkvError::TrackNotFound { track_number: 5 };
        let core_err: mkvkit_core::Error = mkv_err.into();
        assert!(matches!(
            core_err,
            mkvkit_core::Error::Container(ContainerError::TrackNotFound { track: 5 })
        ));

        let core_err: mkvkit_core::Error = MkvError::Aborted.into();
        assert!(core_err.is_cancelled());

        let core_err: mkvkit_core::Error = MkvError::CorruptFile {
            offset: 96,
            reason: "cluster runs past the segment".into(),
        }
        .into();
        assert!(matches!(
            core_err,
            mkvkit_core::Error::Container(ContainerError::Malformed(ref reason))
                if reason.contains("offset 96")
        ));
    }

    #[test]
    fn test_conversion_from_core_error() {
        let err: MkvError = mkvkit_core::Error::Cancelled.into();
        assert!(matches!(err, MkvError::Aborted));
    }
}
