use std::collections::BTreeMap;

use crate::error::DocError;
use crate::update::ClientId;

/// Where a change notification came from.
///
/// The sync layer only relays [`Local`](UpdateOrigin::Local) changes; a
/// [`Remote`](UpdateOrigin::Remote) notification is the echo of a delta it
/// imported itself, and relaying it would bounce it between the peers forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOrigin {
    /// Authored on this replica.
    Local,
    /// Imported with [`Replica::apply_remote_update`](crate::Replica::apply_remote_update).
    Remote,
}

/// The capability a replica needs from its CRDT document.
///
/// Implementations own the conflict-resolution algorithm. Deltas, state
/// vectors and their encodings are opaque bytes to everything above this
/// trait.
///
/// Merging must be idempotent and commutative: applying the same delta twice,
/// or the deltas of two replicas in either order, yields the same state.
pub trait DocumentEngine {
    /// Encoded size of a delta that carries no operations.
    ///
    /// The sync layer treats any delta of this size or smaller as empty.
    const EMPTY_UPDATE_LEN: usize;

    /// Identifier used to break ties between concurrent authors.
    fn client_id(&self) -> ClientId;

    /// Insert `text` at visible `index` of the shared text.
    ///
    /// Returns the delta describing the change, or `None` if nothing changed.
    fn insert_text(&mut self, index: usize, text: &str) -> Result<Option<Vec<u8>>, DocError>;

    /// Delete `len` visible characters starting at `index`.
    fn delete_text(&mut self, index: usize, len: usize) -> Result<Option<Vec<u8>>, DocError>;

    /// Write a map entry. Always produces a delta.
    fn set_entry(&mut self, key: &str, value: i64) -> Result<Vec<u8>, DocError>;

    /// Current visible text.
    fn text(&self) -> String;

    /// Number of visible characters.
    fn text_len(&self) -> usize;

    /// Current value of a map entry.
    fn entry(&self, key: &str) -> Option<i64>;

    /// Snapshot of all map entries.
    fn entries(&self) -> BTreeMap<String, i64>;

    /// Merge a delta produced by any document of the same engine type.
    ///
    /// Returns `true` if it integrated anything not seen before.
    fn apply_update(&mut self, update: &[u8]) -> Result<bool, DocError>;

    /// Summary of the history seen so far, per author.
    fn state_vector(&self) -> Result<Vec<u8>, DocError>;

    /// Everything this document has that the holder of `remote_state_vector` lacks.
    fn encode_state_as_update(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocError>;
}
