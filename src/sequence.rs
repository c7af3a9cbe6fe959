use std::collections::{BTreeMap, BTreeSet};

use crate::update::OpId;

/// Map from parent id to child ids used during sequence rebuild.
type ChildrenMap = BTreeMap<Option<OpId>, Vec<OpId>>;

/// A Replicated Growable Array keyed by operation ids.
///
/// Each element records the element it was inserted after (its parent) and
/// the Lamport timestamp of the inserting operation. The linear order is a
/// depth-first walk of that tree in which siblings are visited from the
/// highest `(lamport, client)` to the lowest, so a later insert at a given
/// position lands in front of older ones and concurrent inserts are ordered
/// identically on every replica. Deleted elements stay in the tree as
/// tombstones so that inserts referencing them still resolve.
///
/// Mutations do not reorder anything by themselves; call
/// [`rebuild`](Sequence::rebuild) once a batch has been integrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sequence<T: Clone> {
    nodes: BTreeMap<OpId, SeqNode<T>>,
    tombstones: BTreeSet<OpId>,
    /// Cached linear order of all ids, tombstones included.
    order: Vec<OpId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SeqNode<T: Clone> {
    value: T,
    parent: Option<OpId>,
    lamport: u64,
}

impl<T: Clone> Sequence<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            tombstones: BTreeSet::new(),
            order: Vec::new(),
        }
    }

    /// Whether an element with this id has ever been inserted.
    pub(crate) fn contains(&self, id: &OpId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Add an element. Returns `false` if the id is already present.
    pub(crate) fn insert(&mut self, id: OpId, parent: Option<OpId>, lamport: u64, value: T) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.nodes.insert(
            id,
            SeqNode {
                value,
                parent,
                lamport,
            },
        );
        true
    }

    /// Tombstone an element. Returns `true` if it was visible before.
    pub(crate) fn remove(&mut self, id: &OpId) -> bool {
        self.nodes.contains_key(id) && self.tombstones.insert(*id)
    }

    /// Ids of visible elements in order.
    pub(crate) fn visible_ids(&self) -> Vec<OpId> {
        self.order
            .iter()
            .filter(|id| !self.tombstones.contains(id))
            .copied()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len() - self.tombstones.len()
    }

    /// Iterate visible values in order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order
            .iter()
            .filter(|id| !self.tombstones.contains(id))
            .filter_map(|id| self.nodes.get(id))
            .map(|node| &node.value)
    }

    /// Recompute the linear order from the parent tree.
    pub(crate) fn rebuild(&mut self) {
        let mut children: ChildrenMap = BTreeMap::new();
        for (id, node) in &self.nodes {
            children.entry(node.parent).or_default().push(*id);
        }

        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| {
                let ka = (self.nodes[a].lamport, a.client);
                let kb = (self.nodes[b].lamport, b.client);
                kb.cmp(&ka)
            });
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<OpId> = Vec::new();

        if let Some(roots) = children.get(&None) {
            stack.extend(roots.iter().rev().copied());
        }

        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(kids) = children.get(&Some(id)) {
                stack.extend(kids.iter().rev().copied());
            }
        }

        self.order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(client: u64, clock: u64) -> OpId {
        OpId { client, clock }
    }

    fn text(seq: &Sequence<char>) -> String {
        seq.iter().collect()
    }

    #[test]
    fn new_sequence_is_empty() {
        let seq = Sequence::<char>::new();
        assert_eq!(seq.len(), 0);
        assert!(seq.visible_ids().is_empty());
    }

    #[test]
    fn chain_reads_in_insert_order() {
        let mut seq = Sequence::new();
        seq.insert(id(1, 0), None, 1, 'a');
        seq.insert(id(1, 1), Some(id(1, 0)), 2, 'b');
        seq.insert(id(1, 2), Some(id(1, 1)), 3, 'c');
        seq.rebuild();
        assert_eq!(text(&seq), "abc");
    }

    #[test]
    fn later_sibling_goes_first() {
        let mut seq = Sequence::new();
        seq.insert(id(1, 0), None, 1, 'a');
        seq.insert(id(1, 1), Some(id(1, 0)), 2, 'c');
        // Inserted at index 1, after 'a', once 'c' was already there.
        seq.insert(id(1, 2), Some(id(1, 0)), 3, 'b');
        seq.rebuild();
        assert_eq!(text(&seq), "abc");
    }

    #[test]
    fn concurrent_siblings_tie_break_by_client() {
        let mut left = Sequence::new();
        left.insert(id(1, 0), None, 1, 'x');
        left.insert(id(2, 0), None, 1, 'y');
        left.rebuild();

        let mut right = Sequence::new();
        right.insert(id(2, 0), None, 1, 'y');
        right.insert(id(1, 0), None, 1, 'x');
        right.rebuild();

        assert_eq!(text(&left), text(&right));
        assert_eq!(text(&left), "yx");
    }

    #[test]
    fn remove_tombstones_but_keeps_children() {
        let mut seq = Sequence::new();
        seq.insert(id(1, 0), None, 1, 'a');
        seq.insert(id(1, 1), Some(id(1, 0)), 2, 'b');
        seq.rebuild();

        assert!(seq.remove(&id(1, 0)));
        assert!(!seq.remove(&id(1, 0)));
        assert!(seq.contains(&id(1, 0)));

        seq.insert(id(2, 0), Some(id(1, 0)), 3, 'z');
        seq.rebuild();
        assert_eq!(text(&seq), "zb");
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut seq = Sequence::new();
        assert!(seq.insert(id(1, 0), None, 1, 'a'));
        assert!(!seq.insert(id(1, 0), None, 1, 'q'));
        seq.rebuild();
        assert_eq!(text(&seq), "a");
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut seq = Sequence::<char>::new();
        assert!(!seq.remove(&id(9, 9)));
        assert_eq!(seq.len(), 0);
    }
}
