//! # replica-sync
//!
//! Convergence of two simulated peers sharing a CRDT document.
//!
//! Each peer is a [`Replica`]: a named owner of one document exposing a shared
//! text and a map of per-peer counters. A [`SyncLink`] joins two replicas and
//! plays the network between them:
//!
//! - while both peers are online, every local delta is applied to the other
//!   replica immediately;
//! - while either is offline, deltas are queued instead;
//! - when both are online again, the link exchanges state vectors and applies
//!   only what each side is missing, then discards the queues.
//!
//! Every relay, queue and reconciliation step is reported as a [`SyncEvent`].
//!
//! ## Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use replica_sync::prelude::*;
//!
//! let a = Rc::new(Replica::new("A"));
//! let b = Rc::new(Replica::new("B"));
//! let link = SyncLink::new(Rc::clone(&a), Rc::clone(&b)).unwrap();
//!
//! a.insert_text(0, "hello").unwrap();
//! assert_eq!(b.text(), "hello");
//!
//! link.set_online("A", false).unwrap();
//! a.increment_counter(2).unwrap();
//! b.increment_counter(3).unwrap();
//! link.set_online("A", true).unwrap();
//!
//! assert_eq!(a.counter_total(), 5);
//! assert_eq!(b.counter_total(), 5);
//! ```
//!
//! ## Document engines
//!
//! Replicas and links are generic over [`DocumentEngine`], the contract a CRDT
//! document must offer: local mutations that yield deltas, idempotent and
//! commutative delta merging, state vectors, and "delta since" encoding. The
//! bundled [`Document`] implements it with an RGA text and a last-writer-wins
//! map.

#![warn(missing_docs)]

mod config;
mod document;
mod engine;
mod error;
mod map;
mod replica;
mod sequence;
mod sync;

pub mod prelude;
pub mod update;

pub use config::SyncConfig;
pub use document::Document;
pub use engine::{DocumentEngine, UpdateOrigin};
pub use error::{DocError, SyncError};
pub use replica::{Replica, SubscriptionId};
pub use sync::{ObserverId, SyncEvent, SyncKind, SyncLink};
pub use update::ClientId;
