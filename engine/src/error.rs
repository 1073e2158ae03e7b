use std::fmt;
use std::io;

/// Torrent metadata was malformed, empty, or missing a required field.
/// Fails construction; surfaced to the caller.
#[derive(Debug)]
pub enum MetadataError {
    Bencode(String),
    MissingField(&'static str),
    MultipleFilesZeroLength,
    InvalidPieceLength,
    PieceHashLengthMismatch { expected: usize, found: usize },
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Bencode(msg) => write!(f, "malformed bencode: {}", msg),
            MetadataError::MissingField(name) => write!(f, "missing required field: {}", name),
            MetadataError::MultipleFilesZeroLength => {
                write!(f, "multi-file torrent has a zero-length file entry")
            }
            MetadataError::InvalidPieceLength => {
                write!(f, "piece length must be a positive multiple of the chunk size")
            }
            MetadataError::PieceHashLengthMismatch { expected, found } => write!(
                f,
                "pieces string length {} is not a multiple of 20 (expected {} pieces worth)",
                found, expected
            ),
        }
    }
}

impl std::error::Error for MetadataError {}

/// HTTP or bencode failure while talking to a tracker. Logged; the
/// announce is retried on the next scheduled attempt, never fatal.
#[derive(Debug)]
pub enum TrackerError {
    Connect(String),
    Io(String),
    MalformedResponse(String),
    FailureReason(String),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::Connect(msg) => write!(f, "could not connect to tracker: {}", msg),
            TrackerError::Io(msg) => write!(f, "tracker i/o error: {}", msg),
            TrackerError::MalformedResponse(msg) => {
                write!(f, "malformed tracker response: {}", msg)
            }
            TrackerError::FailureReason(msg) => write!(f, "tracker failure reason: {}", msg),
        }
    }
}

impl std::error::Error for TrackerError {}

/// A remote peer violated the wire protocol. The connection is closed;
/// the owning torrent is otherwise unaffected.
#[derive(Debug)]
pub enum ProtocolError {
    BadHandshake,
    UnknownInfoHash,
    SelfConnection,
    UnknownMessageId(u8),
    FrameTooLarge(usize),
    OutOfRangeIndex(u32),
    MisSizedBitfield { expected: usize, found: usize },
    BitfieldNotFirstMessage,
    MisalignedChunk { begin: u32 },
    OversizedChunk { length: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadHandshake => write!(f, "handshake did not validate"),
            ProtocolError::UnknownInfoHash => write!(f, "info_hash not registered with overseer"),
            ProtocolError::SelfConnection => write!(f, "peer_id matches our own"),
            ProtocolError::UnknownMessageId(id) => write!(f, "unknown message id {}", id),
            ProtocolError::FrameTooLarge(len) => write!(f, "frame of {} bytes exceeds receive buffer", len),
            ProtocolError::OutOfRangeIndex(i) => write!(f, "piece index {} out of range", i),
            ProtocolError::MisSizedBitfield { expected, found } => write!(
                f,
                "bitfield length {} does not match expected {}",
                found, expected
            ),
            ProtocolError::BitfieldNotFirstMessage => {
                write!(f, "bitfield received after the first post-handshake message")
            }
            ProtocolError::MisalignedChunk { begin } => {
                write!(f, "chunk begin {} is not chunk-aligned", begin)
            }
            ProtocolError::OversizedChunk { length } => {
                write!(f, "chunk length {} exceeds chunk_size", length)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// TCP connect to a pending peer failed or timed out. The pending peer
/// is discarded.
#[derive(Debug)]
pub enum ConnectError {
    Timeout,
    Refused(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Timeout => write!(f, "connect timed out"),
            ConnectError::Refused(msg) => write!(f, "connect failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectError {}

/// File system failure. Stops the affected torrent and surfaces via a
/// torrent-state transition.
#[derive(Debug)]
pub enum IoError {
    Open { path: String, cause: String },
    Seek { path: String, cause: String },
    ReadWrite { path: String, cause: String },
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Open { path, cause } => write!(f, "opening {}: {}", path, cause),
            IoError::Seek { path, cause } => write!(f, "seeking {}: {}", path, cause),
            IoError::ReadWrite { path, cause } => write!(f, "accessing {}: {}", path, cause),
        }
    }
}

impl std::error::Error for IoError {}

impl From<io::Error> for IoError {
    fn from(e: io::Error) -> Self {
        IoError::ReadWrite {
            path: String::from("<unknown>"),
            cause: e.to_string(),
        }
    }
}
