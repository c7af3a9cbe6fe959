use thiserror::Error;

use crate::update::ClientId;

/// Errors raised by a document engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocError {
    /// A text index past the end of the visible text.
    #[error("index {index} out of bounds for text of length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Visible text length at the time of the call.
        len: usize,
    },
    /// A text range extending past the end of the visible text.
    #[error("range {start}..{end} out of bounds for text of length {len}")]
    RangeOutOfBounds {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Visible text length at the time of the call.
        len: usize,
    },
    /// Adjusting a counter would leave the `i64` range.
    #[error("counter {key} overflows")]
    CounterOverflow {
        /// Counter key.
        key: String,
    },
    /// Data is too short to contain the envelope header.
    #[error("payload too short for envelope header")]
    TooShort,
    /// Missing or incorrect magic byte.
    #[error("invalid magic byte: 0x{0:02X}")]
    InvalidMagic(u8),
    /// Encoding version this build cannot read.
    #[error("unsupported encoding version: {0}")]
    UnsupportedVersion(u8),
    /// Envelope kind does not match what the caller expected.
    #[error("unexpected payload kind: {0}")]
    UnexpectedKind(u8),
    /// The postcard body failed to encode.
    #[error("encode error: {0}")]
    Encode(String),
    /// The postcard body failed to decode.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors raised by a [`SyncLink`](crate::SyncLink).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The name matches neither managed peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    /// Both replicas handed to the link carry the same name.
    #[error("duplicate peer name: {0}")]
    DuplicatePeer(String),
    /// Both replicas' engines report the same client id, so their
    /// operation ids would collide.
    #[error("duplicate client id: {0}")]
    DuplicateClient(ClientId),
    /// Reconciliation failed inside the document engine.
    #[error(transparent)]
    Document(#[from] DocError),
}
