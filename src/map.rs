use std::collections::BTreeMap;

use crate::update::ClientId;

/// Ordering stamp for map writes: `(lamport, client)`.
pub(crate) type Stamp = (u64, ClientId);

/// A map of last-writer-wins registers.
///
/// Each entry keeps the stamp of the write that produced it. A write only
/// replaces an entry when its stamp is strictly greater, so applying writes
/// in any order, any number of times, yields the same map. Ties on the
/// Lamport timestamp are broken by client id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LwwMap {
    entries: BTreeMap<String, LwwEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LwwEntry {
    value: i64,
    stamp: Stamp,
}

impl LwwMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply a write. Returns `true` if it won.
    pub(crate) fn apply(&mut self, key: &str, value: i64, stamp: Stamp) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.stamp >= stamp => false,
            Some(entry) => {
                entry.value = value;
                entry.stamp = stamp;
                true
            }
            None => {
                self.entries
                    .insert(key.to_owned(), LwwEntry { value, stamp });
                true
            }
        }
    }

    #[must_use]
    pub(crate) fn get(&self, key: &str) -> Option<i64> {
        self.entries.get(key).map(|e| e.value)
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, i64> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value))
            .collect()
    }
}
