use std::collections::BTreeMap;

use tracing::trace;

use crate::engine::DocumentEngine;
use crate::error::DocError;
use crate::map::LwwMap;
use crate::sequence::Sequence;
use crate::update::{self, ClientId, Op, OpId, OpKind, StateVector, EMPTY_UPDATE_LEN};

/// An operation-based CRDT document holding one shared text and one map.
///
/// Every mutation becomes one or more [`Op`]s with a dense per-client clock,
/// which makes the state vector a plain `client -> next clock` map and lets
/// [`encode_state_as_update`](DocumentEngine::encode_state_as_update) slice
/// exactly the missing suffix of each client's history.
///
/// Remote operations whose predecessors have not arrived yet are parked and
/// integrated as soon as they become applicable.
///
/// # Example
///
/// ```
/// use replica_sync::{Document, DocumentEngine};
///
/// let mut a = Document::with_client_id(1);
/// let mut b = Document::with_client_id(2);
///
/// let delta = a.insert_text(0, "hi").unwrap().unwrap();
/// b.apply_update(&delta).unwrap();
/// assert_eq!(b.text(), "hi");
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    client_id: ClientId,
    lamport: u64,
    /// Integrated operations per client, indexed by clock.
    log: BTreeMap<ClientId, Vec<Op>>,
    /// Remote operations waiting on a missing predecessor.
    pending: Vec<Op>,
    text: Sequence<char>,
    map: LwwMap,
}

impl Document {
    /// Create a document with a random client id.
    pub fn new() -> Self {
        Self::with_client_id(rand::random::<u64>())
    }

    /// Create a document with an explicit client id.
    ///
    /// Two documents that exchange updates must not share a client id.
    pub fn with_client_id(client_id: ClientId) -> Self {
        Self {
            client_id,
            lamport: 0,
            log: BTreeMap::new(),
            pending: Vec::new(),
            text: Sequence::new(),
            map: LwwMap::new(),
        }
    }

    /// Number of remote operations parked on missing dependencies.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The document's current state vector.
    #[must_use]
    pub fn state(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (&client, ops) in &self.log {
            sv.set(client, ops.len() as u64);
        }
        sv
    }

    fn next_clock(&self, client: ClientId) -> u64 {
        self.log.get(&client).map_or(0, |ops| ops.len() as u64)
    }

    fn has(&self, id: &OpId) -> bool {
        id.clock < self.next_clock(id.client)
    }

    fn is_ready(&self, op: &Op) -> bool {
        op.id.clock == self.next_clock(op.id.client)
            && op.dependency().map_or(true, |dep| self.text.contains(&dep))
    }

    /// Stamp a local operation and integrate it.
    fn local_op(&mut self, kind: OpKind) -> Op {
        self.lamport += 1;
        let op = Op {
            id: OpId {
                client: self.client_id,
                clock: self.next_clock(self.client_id),
            },
            lamport: self.lamport,
            kind,
        };
        self.integrate(op.clone());
        op
    }

    fn integrate(&mut self, op: Op) {
        self.lamport = self.lamport.max(op.lamport);
        match &op.kind {
            OpKind::Insert { parent, value } => {
                self.text.insert(op.id, *parent, op.lamport, *value);
            }
            OpKind::Delete { target } => {
                self.text.remove(target);
            }
            OpKind::MapSet { key, value } => {
                self.map.apply(key, *value, (op.lamport, op.id.client));
            }
        }
        self.log.entry(op.id.client).or_default().push(op);
    }

    /// Integrate every parked operation that has become applicable.
    fn drain_pending(&mut self) -> bool {
        let mut progressed = false;
        loop {
            let mut made_progress = false;
            let mut i = 0;
            while i < self.pending.len() {
                if self.has(&self.pending[i].id) {
                    self.pending.remove(i);
                } else if self.is_ready(&self.pending[i]) {
                    let op = self.pending.remove(i);
                    self.integrate(op);
                    made_progress = true;
                } else {
                    i += 1;
                }
            }
            if !made_progress {
                return progressed;
            }
            progressed = true;
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentEngine for Document {
    const EMPTY_UPDATE_LEN: usize = EMPTY_UPDATE_LEN;

    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn insert_text(&mut self, index: usize, text: &str) -> Result<Option<Vec<u8>>, DocError> {
        let len = self.text.len();
        if index > len {
            return Err(DocError::IndexOutOfBounds { index, len });
        }
        if text.is_empty() {
            return Ok(None);
        }

        let mut parent = match index {
            0 => None,
            i => self.text.visible_ids().get(i - 1).copied(),
        };
        let mut ops = Vec::with_capacity(text.chars().count());
        for value in text.chars() {
            let op = self.local_op(OpKind::Insert { parent, value });
            parent = Some(op.id);
            ops.push(op);
        }
        self.text.rebuild();

        update::encode_update(&ops).map(Some)
    }

    fn delete_text(&mut self, index: usize, len: usize) -> Result<Option<Vec<u8>>, DocError> {
        let visible = self.text.visible_ids();
        let end = index.saturating_add(len);
        if end > visible.len() {
            return Err(DocError::RangeOutOfBounds {
                start: index,
                end,
                len: visible.len(),
            });
        }
        if len == 0 {
            return Ok(None);
        }

        let ops: Vec<Op> = visible[index..end]
            .iter()
            .map(|&target| self.local_op(OpKind::Delete { target }))
            .collect();
        self.text.rebuild();

        update::encode_update(&ops).map(Some)
    }

    fn set_entry(&mut self, key: &str, value: i64) -> Result<Vec<u8>, DocError> {
        let op = self.local_op(OpKind::MapSet {
            key: key.to_owned(),
            value,
        });
        update::encode_update(&[op])
    }

    fn text(&self) -> String {
        self.text.iter().collect()
    }

    fn text_len(&self) -> usize {
        self.text.len()
    }

    fn entry(&self, key: &str) -> Option<i64> {
        self.map.get(key)
    }

    fn entries(&self) -> BTreeMap<String, i64> {
        self.map.snapshot()
    }

    fn apply_update(&mut self, data: &[u8]) -> Result<bool, DocError> {
        let ops = update::decode_update(data)?;
        for op in ops {
            if self.has(&op.id) || self.pending.iter().any(|p| p.id == op.id) {
                continue;
            }
            self.pending.push(op);
        }

        let changed = self.drain_pending();
        if changed {
            self.text.rebuild();
        }
        trace!(
            client = self.client_id,
            changed,
            pending = self.pending.len(),
            "applied update"
        );
        Ok(changed)
    }

    fn state_vector(&self) -> Result<Vec<u8>, DocError> {
        self.state().to_bytes()
    }

    fn encode_state_as_update(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocError> {
        let remote = StateVector::from_bytes(remote_state_vector)?;
        let mut missing: Vec<&Op> = self
            .log
            .iter()
            .flat_map(|(&client, ops)| {
                let start = (remote.get(client) as usize).min(ops.len());
                ops[start..].iter()
            })
            .collect();
        missing.sort_by_key(|op| (op.lamport, op.id.client, op.id.clock));

        let ops: Vec<Op> = missing.into_iter().cloned().collect();
        update::encode_update(&ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Document, Document) {
        (Document::with_client_id(1), Document::with_client_id(2))
    }

    fn sync(from: &Document, to: &mut Document) {
        let sv = to.state_vector().unwrap();
        let delta = from.encode_state_as_update(&sv).unwrap();
        to.apply_update(&delta).unwrap();
    }

    #[test]
    fn insert_and_delete_locally() {
        let mut d = Document::with_client_id(1);
        d.insert_text(0, "hello").unwrap();
        d.insert_text(5, " world").unwrap();
        d.delete_text(0, 6).unwrap();
        assert_eq!(d.text(), "world");
        assert_eq!(d.text_len(), 5);
    }

    #[test]
    fn insert_in_middle() {
        let mut d = Document::with_client_id(1);
        d.insert_text(0, "hd").unwrap();
        d.insert_text(1, "ello worl").unwrap();
        assert_eq!(d.text(), "hello world");
    }

    #[test]
    fn noop_mutations_produce_no_delta() {
        let mut d = Document::with_client_id(1);
        assert_eq!(d.insert_text(0, "").unwrap(), None);
        assert_eq!(d.delete_text(0, 0).unwrap(), None);
        assert_eq!(d.state(), StateVector::new());
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let mut d = Document::with_client_id(1);
        assert_eq!(
            d.insert_text(1, "x"),
            Err(DocError::IndexOutOfBounds { index: 1, len: 0 })
        );
        d.insert_text(0, "abc").unwrap();
        assert_eq!(
            d.delete_text(2, 5),
            Err(DocError::RangeOutOfBounds {
                start: 2,
                end: 7,
                len: 3
            })
        );
    }

    #[test]
    fn apply_is_idempotent() {
        let (mut a, mut b) = pair();
        let delta = a.insert_text(0, "abc").unwrap().unwrap();
        assert!(b.apply_update(&delta).unwrap());
        assert!(!b.apply_update(&delta).unwrap());
        assert_eq!(b.text(), "abc");
    }

    #[test]
    fn apply_is_commutative() {
        let (mut a, mut b) = pair();
        let da = a.insert_text(0, "AAA").unwrap().unwrap();
        let db = b.insert_text(0, "BBB").unwrap().unwrap();

        let mut left = Document::with_client_id(3);
        left.apply_update(&da).unwrap();
        left.apply_update(&db).unwrap();

        let mut right = Document::with_client_id(4);
        right.apply_update(&db).unwrap();
        right.apply_update(&da).unwrap();

        assert_eq!(left.text(), right.text());
        assert!(left.text().contains("AAA"));
        assert!(left.text().contains("BBB"));
    }

    #[test]
    fn out_of_order_delivery_is_buffered() {
        let (mut a, mut b) = pair();
        let first = a.insert_text(0, "ab").unwrap().unwrap();
        let second = a.insert_text(2, "cd").unwrap().unwrap();

        assert!(!b.apply_update(&second).unwrap());
        assert_eq!(b.pending_len(), 2);
        assert_eq!(b.text(), "");

        assert!(b.apply_update(&first).unwrap());
        assert_eq!(b.pending_len(), 0);
        assert_eq!(b.text(), "abcd");
    }

    #[test]
    fn state_vector_tracks_clocks() {
        let (mut a, mut b) = pair();
        a.insert_text(0, "xyz").unwrap();
        a.set_entry("a", 3).unwrap();
        let delta = b.set_entry("b", 1).unwrap();
        a.apply_update(&delta).unwrap();

        let sv = a.state();
        assert_eq!(sv.get(1), 4);
        assert_eq!(sv.get(2), 1);
        assert_eq!(sv.get(99), 0);
        assert_eq!(sv.iter().count(), 2);
    }

    #[test]
    fn delta_since_is_minimal() {
        let (mut a, mut b) = pair();
        a.insert_text(0, "hello").unwrap();
        sync(&a, &mut b);

        let nothing = a
            .encode_state_as_update(&b.state_vector().unwrap())
            .unwrap();
        assert_eq!(nothing.len(), Document::EMPTY_UPDATE_LEN);

        a.insert_text(5, "!").unwrap();
        let delta = a
            .encode_state_as_update(&b.state_vector().unwrap())
            .unwrap();
        assert_eq!(update::decode_update(&delta).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_edits_converge_through_state_vectors() {
        let (mut a, mut b) = pair();
        a.insert_text(0, "base").unwrap();
        sync(&a, &mut b);

        a.insert_text(4, "!").unwrap();
        b.insert_text(0, ">").unwrap();
        b.delete_text(3, 1).unwrap();

        let delta_for_a = b.encode_state_as_update(&a.state_vector().unwrap()).unwrap();
        let delta_for_b = a.encode_state_as_update(&b.state_vector().unwrap()).unwrap();
        a.apply_update(&delta_for_a).unwrap();
        b.apply_update(&delta_for_b).unwrap();

        assert_eq!(a.text(), b.text());
        assert_eq!(a.text(), ">bae!");
    }

    #[test]
    fn concurrent_map_writes_converge() {
        let (mut a, mut b) = pair();
        let da = a.set_entry("k", 10).unwrap();
        let db = b.set_entry("k", 20).unwrap();
        a.apply_update(&db).unwrap();
        b.apply_update(&da).unwrap();

        assert_eq!(a.entry("k"), b.entry("k"));
        // Same lamport, higher client id wins.
        assert_eq!(a.entry("k"), Some(20));
    }

    #[test]
    fn insert_after_remote_text_lands_after_it() {
        let (mut a, mut b) = pair();
        let delta = a.insert_text(0, "hello").unwrap().unwrap();
        b.apply_update(&delta).unwrap();

        let delta = b.insert_text(5, " world").unwrap().unwrap();
        a.apply_update(&delta).unwrap();

        assert_eq!(a.text(), "hello world");
        assert_eq!(b.text(), "hello world");
    }

    #[test]
    fn delete_of_unknown_element_waits() {
        let (mut a, mut b) = pair();
        let ins = a.insert_text(0, "x").unwrap().unwrap();
        let del = a.delete_text(0, 1).unwrap().unwrap();

        assert!(!b.apply_update(&del).unwrap());
        assert!(b.apply_update(&ins).unwrap());
        assert_eq!(b.text(), "");
        assert_eq!(b.state(), a.state());
    }
}
