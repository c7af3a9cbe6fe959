//! Wire encoding for operations and state vectors.
//!
//! Every payload carries a three-byte envelope so that a receiver can reject
//! foreign or future data before decoding the body:
//!
//! ```text
//! [MAGIC: 0xC5][VERSION: u8][KIND: u8][POSTCARD BODY: N bytes]
//! ```

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DocError;

/// Identifier assigned to each document (and so to each replica) by the engine.
pub type ClientId = u64;

/// Magic byte identifying replica-sync payloads.
pub const MAGIC_BYTE: u8 = 0xC5;

/// Current encoding version.
pub const ENCODING_VERSION: u8 = 1;

/// Size of the envelope header in bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 3;

/// Size of an encoded update carrying no operations: the header plus the
/// single varint byte of an empty sequence length.
pub const EMPTY_UPDATE_LEN: usize = ENVELOPE_HEADER_SIZE + 1;

/// Identifies what an envelope contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    /// A batch of operations.
    Update = 1,
    /// A state vector.
    StateVector = 2,
}

/// Unique operation id: the authoring client and its per-client clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    /// Author of the operation.
    pub client: ClientId,
    /// Dense per-client sequence number, starting at 0.
    pub clock: u64,
}

/// A single document operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    /// Unique id.
    pub id: OpId,
    /// Lamport timestamp; orders concurrent siblings and map writes.
    pub lamport: u64,
    /// What the operation does.
    pub kind: OpKind,
}

/// The mutation carried by an [`Op`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Insert `value` right after `parent` (at the head when `None`).
    Insert {
        /// Element this one was inserted after.
        parent: Option<OpId>,
        /// The inserted character.
        value: char,
    },
    /// Tombstone a previously inserted element.
    Delete {
        /// The insert operation being deleted.
        target: OpId,
    },
    /// Write a map entry.
    MapSet {
        /// Entry key.
        key: String,
        /// Entry value.
        value: i64,
    },
}

impl Op {
    /// Operation ids this one cannot be integrated without.
    pub fn dependency(&self) -> Option<OpId> {
        match &self.kind {
            OpKind::Insert { parent, .. } => *parent,
            OpKind::Delete { target } => Some(*target),
            OpKind::MapSet { .. } => None,
        }
    }
}

/// Per-client summary of how much history a document has seen.
///
/// Maps each client to the next clock value the document expects from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector {
    clocks: BTreeMap<ClientId, u64>,
}

impl StateVector {
    /// Create an empty state vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `client` has been seen up to (but excluding) `next_clock`.
    pub fn set(&mut self, client: ClientId, next_clock: u64) {
        self.clocks.insert(client, next_clock);
    }

    /// Next expected clock for `client`; 0 for a client never seen.
    #[must_use]
    pub fn get(&self, client: ClientId) -> u64 {
        self.clocks.get(&client).copied().unwrap_or(0)
    }

    /// Iterate `(client, next_clock)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, u64)> + '_ {
        self.clocks.iter().map(|(&c, &n)| (c, n))
    }

    /// Encode into an enveloped payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocError> {
        seal(PayloadKind::StateVector, self)
    }

    /// Decode an enveloped payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DocError> {
        open(PayloadKind::StateVector, data)
    }
}

/// Encode a batch of operations as an update payload.
pub fn encode_update(ops: &[Op]) -> Result<Vec<u8>, DocError> {
    seal(PayloadKind::Update, &ops)
}

/// Decode an update payload into its operations.
pub fn decode_update(data: &[u8]) -> Result<Vec<Op>, DocError> {
    open(PayloadKind::Update, data)
}

fn seal<T: Serialize>(kind: PayloadKind, body: &T) -> Result<Vec<u8>, DocError> {
    let payload = postcard::to_allocvec(body).map_err(|e| DocError::Encode(e.to_string()))?;
    let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    bytes.push(MAGIC_BYTE);
    bytes.push(ENCODING_VERSION);
    bytes.push(kind as u8);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn open<T: DeserializeOwned>(kind: PayloadKind, data: &[u8]) -> Result<T, DocError> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return Err(DocError::TooShort);
    }
    if data[0] != MAGIC_BYTE {
        return Err(DocError::InvalidMagic(data[0]));
    }
    if data[1] != ENCODING_VERSION {
        return Err(DocError::UnsupportedVersion(data[1]));
    }
    if data[2] != kind as u8 {
        return Err(DocError::UnexpectedKind(data[2]));
    }
    postcard::from_bytes(&data[ENVELOPE_HEADER_SIZE..]).map_err(|e| DocError::Decode(e.to_string()))
}
