use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::engine::DocumentEngine;

/// Tuning for a [`SyncLink`](crate::SyncLink).
///
/// ```
/// use replica_sync::SyncConfig;
///
/// let config: SyncConfig = serde_json::from_str("{}").unwrap();
/// assert_eq!(config, SyncConfig::default());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconciliation deltas no longer than this are treated as empty.
    ///
    /// An encoded delta without operations still carries a header, so this
    /// must match the engine's empty-update size rather than zero.
    pub min_delta_len: usize,
}

impl SyncConfig {
    /// Defaults for the given document engine.
    pub fn for_engine<D: DocumentEngine>() -> Self {
        Self {
            min_delta_len: D::EMPTY_UPDATE_LEN,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::for_engine::<Document>()
    }
}
