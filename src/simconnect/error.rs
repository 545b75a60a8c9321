//! Protocol status and error types for the simulator data-exchange codec.

use std::fmt;

/// Outcome of the last read or write of a packet.
///
/// Mirrors the status values peers report to each other in log messages.
/// Only `Ok` is non-terminal; every other status ends the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketStatus {
    #[default]
    Ok,
    InvalidMagicNumber,
    VersionMismatch,
    InsufficientWrite,
    WriteError,
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketStatus::Ok => "OK",
            PacketStatus::InvalidMagicNumber => "INVALID_MAGIC_NUMBER",
            PacketStatus::VersionMismatch => "VERSION_MISMATCH",
            PacketStatus::InsufficientWrite => "INSUFFICIENT_WRITE",
            PacketStatus::WriteError => "WRITE_ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Errors raised while encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame does not start with the magic number of the expected structure.
    #[error("invalid magic number {found:#010x} (expected {expected:#010x})")]
    InvalidMagicNumber { expected: u32, found: u32 },

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: received {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    /// The frame header announced fewer bytes than its body needs.
    #[error("malformed frame: needed {needed} bytes but only {available} remain")]
    Truncated { needed: usize, available: usize },

    /// The size field announces more than any valid frame can hold.
    #[error("frame of {size} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// The device accepted only part of the frame.
    #[error("short write: {written} of {expected} bytes written")]
    InsufficientWrite { written: usize, expected: usize },

    #[error("write error: {0}")]
    WriteError(#[source] std::io::Error),
}

impl ProtocolError {
    /// Status value matching this error.
    pub fn status(&self) -> PacketStatus {
        match self {
            ProtocolError::InvalidMagicNumber { .. }
            | ProtocolError::Truncated { .. }
            | ProtocolError::FrameTooLarge { .. } => PacketStatus::InvalidMagicNumber,
            ProtocolError::VersionMismatch { .. } => PacketStatus::VersionMismatch,
            ProtocolError::InsufficientWrite { .. } => PacketStatus::InsufficientWrite,
            ProtocolError::WriteError(_) => PacketStatus::WriteError,
        }
    }

    /// True for errors that indicate an incompatible peer rather than an I/O problem
    pub fn is_incompatible_peer(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidMagicNumber { .. }
                | ProtocolError::VersionMismatch { .. }
                | ProtocolError::Truncated { .. }
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}
