//! Convenient re-exports for common usage.
//!
//! ```
//! use replica_sync::prelude::*;
//! ```

pub use crate::Document;
pub use crate::DocumentEngine;
pub use crate::Replica;
pub use crate::SyncConfig;
pub use crate::SyncEvent;
pub use crate::SyncKind;
pub use crate::SyncLink;
pub use crate::UpdateOrigin;
