//! Simulated network link between two replicas.
//!
//! The link relays every locally authored delta from one replica to the
//! other. While either side is offline, deltas are queued instead of applied.
//! When both sides are online again the link does **not** replay the queues:
//! it exchanges state vectors and applies only the minimal missing deltas,
//! then discards the queues.
//!
//! ```text
//!            live: apply + Live event
//!   A ───────────────────────────────────▶ B
//!      offline: queue[B] + Queued event
//!
//!   set_online(.., true) reaching {Online, Online}:
//!      sv(A) ─▶ B.delta_since ─▶ A   (Reconnect event if non-empty)
//!      sv(B) ─▶ A.delta_since ─▶ B   (Reconnect event if non-empty)
//!      clear queue[A], queue[B]
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::document::Document;
use crate::engine::{DocumentEngine, UpdateOrigin};
use crate::error::SyncError;
use crate::replica::{Replica, SubscriptionId};

/// Why a sync event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    /// Delta relayed immediately.
    Live,
    /// Delta held back because the destination was offline.
    Queued,
    /// Missing delta applied during reconciliation.
    Reconnect,
}

/// Record of one relay, queue, or reconciliation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Name of the replica the delta came from.
    pub from: String,
    /// Name of the replica the delta was addressed to.
    pub to: String,
    /// Encoded size of the delta.
    pub bytes: usize,
    /// Wall-clock time of emission.
    pub timestamp: SystemTime,
    /// What happened to the delta.
    pub kind: SyncKind,
}

/// Handle returned by [`SyncLink::on_sync_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type SyncCallback = Rc<dyn Fn(&SyncEvent)>;

/// One of the two ends of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    A,
    B,
}

impl Slot {
    fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

#[derive(Debug)]
struct LinkState {
    online: [bool; 2],
    /// Deltas addressed to each slot while it was unreachable.
    queues: [Vec<Vec<u8>>; 2],
    /// Change subscriptions on each replica; `None` once torn down.
    subscriptions: Option<[SubscriptionId; 2]>,
}

impl LinkState {
    fn fully_online(&self) -> bool {
        self.online[0] && self.online[1]
    }
}

struct LinkCore<D: DocumentEngine> {
    peers: [Rc<Replica<D>>; 2],
    config: SyncConfig,
    state: RefCell<LinkState>,
    observers: RefCell<Vec<(ObserverId, SyncCallback)>>,
    next_observer: Cell<u64>,
}

/// A simulated two-peer network link.
///
/// The link holds shared handles to both replicas but never owns their
/// documents; [`destroy`](SyncLink::destroy) (or dropping the link) only
/// removes the link's own subscriptions and observers.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use replica_sync::prelude::*;
///
/// let a = Rc::new(Replica::new("A"));
/// let b = Rc::new(Replica::new("B"));
/// let link = SyncLink::new(Rc::clone(&a), Rc::clone(&b)).unwrap();
///
/// link.set_online("B", false).unwrap();
/// a.insert_text(0, "offline edit").unwrap();
/// assert_eq!(b.text(), "");
///
/// link.set_online("B", true).unwrap();
/// assert_eq!(b.text(), "offline edit");
/// ```
pub struct SyncLink<D: DocumentEngine + 'static = Document> {
    core: Rc<LinkCore<D>>,
}

impl<D: DocumentEngine + 'static> SyncLink<D> {
    /// Link two replicas with the engine's default configuration.
    pub fn new(a: Rc<Replica<D>>, b: Rc<Replica<D>>) -> Result<Self, SyncError> {
        Self::with_config(a, b, SyncConfig::for_engine::<D>())
    }

    /// Link two replicas with an explicit configuration.
    ///
    /// Both peers start online.
    pub fn with_config(
        a: Rc<Replica<D>>,
        b: Rc<Replica<D>>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        if a.name() == b.name() {
            return Err(SyncError::DuplicatePeer(a.name().to_owned()));
        }
        if a.client_id() == b.client_id() {
            return Err(SyncError::DuplicateClient(a.client_id()));
        }

        let core = Rc::new(LinkCore {
            peers: [a, b],
            config,
            state: RefCell::new(LinkState {
                online: [true, true],
                queues: [Vec::new(), Vec::new()],
                subscriptions: None,
            }),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
        });

        let subscriptions = [Slot::A, Slot::B].map(|slot| {
            let weak: Weak<LinkCore<D>> = Rc::downgrade(&core);
            core.peers[slot.index()].on_change(move |delta, origin| {
                if origin == UpdateOrigin::Remote {
                    return;
                }
                if let Some(core) = weak.upgrade() {
                    core.relay(slot, delta);
                }
            })
        });
        core.state.borrow_mut().subscriptions = Some(subscriptions);

        debug!(
            a = core.peers[0].name(),
            b = core.peers[1].name(),
            "sync link established"
        );
        Ok(Self { core })
    }

    /// Mark a peer online or offline.
    ///
    /// Reconciliation runs when this call makes both peers online.
    pub fn set_online(&self, peer: &str, online: bool) -> Result<(), SyncError> {
        let slot = self.core.slot_of(peer)?;
        let reconnect = {
            let mut state = self.core.state.borrow_mut();
            let was_online = state.fully_online();
            state.online[slot.index()] = online;
            !was_online && state.fully_online() && state.subscriptions.is_some()
        };
        info!(peer, online, "peer connectivity changed");

        if reconnect {
            self.core.reconcile()?;
        }
        Ok(())
    }

    /// Whether a peer is currently online.
    pub fn is_peer_online(&self, peer: &str) -> Result<bool, SyncError> {
        let slot = self.core.slot_of(peer)?;
        Ok(self.core.state.borrow().online[slot.index()])
    }

    /// Number of deltas queued for delivery to `peer`.
    pub fn queued_len(&self, peer: &str) -> Result<usize, SyncError> {
        let slot = self.core.slot_of(peer)?;
        Ok(self.core.state.borrow().queues[slot.index()].len())
    }

    /// The managed replica called `peer`.
    pub fn replica(&self, peer: &str) -> Result<&Rc<Replica<D>>, SyncError> {
        let slot = self.core.slot_of(peer)?;
        Ok(&self.core.peers[slot.index()])
    }

    /// Register an observer for sync events.
    pub fn on_sync_event<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&SyncEvent) + 'static,
    {
        let id = ObserverId(self.core.next_observer.get());
        self.core.next_observer.set(id.0 + 1);
        let callback: SyncCallback = Rc::new(callback);
        self.core.observers.borrow_mut().push((id, callback));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn off_sync_event(&self, id: ObserverId) -> bool {
        let mut observers = self.core.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(obs, _)| *obs != id);
        observers.len() != before
    }

    /// Detach from both replicas and drop every observer.
    ///
    /// Safe to call more than once. The replicas themselves are untouched.
    pub fn destroy(&self) {
        let subscriptions = self.core.state.borrow_mut().subscriptions.take();
        if let Some(subscriptions) = subscriptions {
            for (peer, id) in self.core.peers.iter().zip(subscriptions) {
                peer.off_change(id);
            }
            debug!(
                a = self.core.peers[0].name(),
                b = self.core.peers[1].name(),
                "sync link torn down"
            );
        }
        self.core.observers.borrow_mut().clear();
    }
}

impl<D: DocumentEngine + 'static> Drop for SyncLink<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<D: DocumentEngine + 'static> fmt::Debug for SyncLink<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncLink")
            .field("a", &self.core.peers[0].name())
            .field("b", &self.core.peers[1].name())
            .field("state", &self.core.state.borrow())
            .field("config", &self.core.config)
            .finish()
    }
}

impl<D: DocumentEngine> LinkCore<D> {
    fn slot_of(&self, peer: &str) -> Result<Slot, SyncError> {
        if self.peers[0].name() == peer {
            Ok(Slot::A)
        } else if self.peers[1].name() == peer {
            Ok(Slot::B)
        } else {
            Err(SyncError::UnknownPeer(peer.to_owned()))
        }
    }

    /// Forward a locally authored delta from `source` to the other peer.
    fn relay(&self, source: Slot, delta: &[u8]) {
        let dest = source.other();
        let live = {
            let mut state = self.state.borrow_mut();
            if state.fully_online() {
                true
            } else {
                state.queues[dest.index()].push(delta.to_vec());
                false
            }
        };

        let from = self.peers[source.index()].name();
        let to = self.peers[dest.index()].name();
        if live {
            if let Err(err) = self.peers[dest.index()].apply_remote_update(delta, UpdateOrigin::Remote) {
                error!(from, to, %err, "failed to apply relayed update");
                return;
            }
            debug!(from, to, bytes = delta.len(), "relayed update");
            self.emit(source, dest, delta.len(), SyncKind::Live);
        } else {
            debug!(from, to, bytes = delta.len(), "queued update for offline peer");
            self.emit(source, dest, delta.len(), SyncKind::Queued);
        }
    }

    /// Exchange state vectors and apply whatever each side is missing.
    ///
    /// The queues are discarded even when the exchange fails; the error is
    /// returned afterwards.
    fn reconcile(&self) -> Result<(), SyncError> {
        let outcome = self.exchange();

        let discarded = {
            let mut state = self.state.borrow_mut();
            let discarded = state.queues[0].len() + state.queues[1].len();
            state.queues.iter_mut().for_each(Vec::clear);
            discarded
        };

        let [a, b] = &self.peers;
        match &outcome {
            Ok(()) => info!(
                a = a.name(),
                b = b.name(),
                discarded,
                "reconciled after reconnect"
            ),
            Err(err) => error!(
                a = a.name(),
                b = b.name(),
                discarded,
                %err,
                "reconciliation failed"
            ),
        }
        outcome
    }

    fn exchange(&self) -> Result<(), SyncError> {
        let [a, b] = &self.peers;
        let sv_a = a.state_vector()?;
        let sv_b = b.state_vector()?;

        let for_a = b.delta_since(&sv_a)?;
        let for_b = a.delta_since(&sv_b)?;

        for (source, delta) in [(Slot::B, for_a), (Slot::A, for_b)] {
            if delta.len() <= self.config.min_delta_len {
                continue;
            }
            let dest = source.other();
            self.peers[dest.index()].apply_remote_update(&delta, UpdateOrigin::Remote)?;
            self.emit(source, dest, delta.len(), SyncKind::Reconnect);
        }
        Ok(())
    }

    fn emit(&self, source: Slot, dest: Slot, bytes: usize, kind: SyncKind) {
        let event = SyncEvent {
            from: self.peers[source.index()].name().to_owned(),
            to: self.peers[dest.index()].name().to_owned(),
            bytes,
            timestamp: SystemTime::now(),
            kind,
        };
        let observers: Vec<SyncCallback> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for observer in observers {
            observer(&event);
        }
    }
}
