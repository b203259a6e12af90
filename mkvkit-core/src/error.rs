//! Error types shared by every mkvkit crate.
//!
//! The Matroska crate reports structural problems with offsets in its own
//! error enum and folds them into [`Error`] at packetizer boundaries, where
//! a caller may be driving readers and writers of different origins.

use thiserror::Error;

/// Main error type for mkvkit.
#[derive(Error, Debug)]
pub enum Error {
    /// Container structure errors (parsing, placement, ordering).
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation was cancelled through a cancellation token.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Container errors that survive the trip across a crate boundary.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// The input is not Matroska or WebM.
    #[error("Not a Matroska file")]
    NotMatroska,

    /// A structural problem, described by the crate that found it.
    #[error("Malformed container: {0}")]
    Malformed(String),

    /// Missing required element.
    #[error("Missing required element: {0}")]
    MissingElement(String),

    /// Track not found in container.
    #[error("Track {track} not found")]
    TrackNotFound { track: u64 },

    /// A packet arrived after data it should precede was already written.
    #[error("Packet for track {track} at {timestamp_ns}ns arrived out of order")]
    OutOfOrder { track: u64, timestamp_ns: i64 },

    /// Anything else, as text.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error came from an explicit cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
