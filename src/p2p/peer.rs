// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Peers as the reactors see them.
//!
//! A [`Peer`] is a live connection with bounded send queues and a typed
//! attribute bag. The consensus reactor parks its per-peer round state in the
//! bag at `InitPeer` time; the mempool reactor reads it back to learn the
//! peer's height without depending on reactor wiring order.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::p2p::Envelope;

/// Opaque stable peer identifier, assigned at handshake.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// Typed per-peer attributes, keyed by type.
///
/// Holds at most one value per type; values are shared behind `Arc`.
#[derive(Default)]
pub struct AttributeBag {
    attrs: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl AttributeBag {
    pub fn set<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.attrs
            .lock()
            .expect("attribute bag lock poisoned")
            .insert(TypeId::of::<T>(), value);
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.attrs
            .lock()
            .expect("attribute bag lock poisoned")
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }
}

/// A connected peer, as exposed to the reactors by the switch.
#[async_trait]
pub trait Peer: Send + Sync {
    fn id(&self) -> &PeerId;
    fn is_running(&self) -> bool;
    fn is_persistent(&self) -> bool;
    /// Cancelled when the peer disconnects or is stopped for an error.
    fn quit(&self) -> &CancellationToken;
    fn attributes(&self) -> &AttributeBag;
    /// Queues an envelope, waiting for queue space. `false` if the peer died.
    async fn send(&self, envelope: Envelope) -> bool;
    /// Queues an envelope only if space is immediately available.
    fn try_send(&self, envelope: Envelope) -> bool;
}

/// The set of currently connected peers.
#[derive(Clone, Default)]
pub struct PeerSet {
    inner: Arc<Mutex<HashMap<PeerId, Arc<dyn Peer>>>>,
}

impl PeerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer. Returns `false` if a peer with the same id is present.
    pub fn add(&self, peer: Arc<dyn Peer>) -> bool {
        let mut peers = self.inner.lock().expect("peer set lock poisoned");
        match peers.entry(peer.id().clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(peer);
                true
            }
        }
    }

    pub fn remove(&self, id: &PeerId) -> Option<Arc<dyn Peer>> {
        self.inner.lock().expect("peer set lock poisoned").remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<Arc<dyn Peer>> {
        self.inner.lock().expect("peer set lock poisoned").get(id).cloned()
    }

    #[must_use]
    pub fn has(&self, id: &PeerId) -> bool {
        self.inner.lock().expect("peer set lock poisoned").contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("peer set lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all connected peers.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Peer>> {
        self.inner
            .lock()
            .expect("peer set lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

/// In-process peer backed by a bounded queue.
///
/// The queue's receiving half models the remote node: whatever the reactors
/// send to this peer pops out there, in order.
pub struct ChannelPeer {
    id: PeerId,
    persistent: bool,
    quit: CancellationToken,
    outbound: mpsc::Sender<Envelope>,
    attributes: AttributeBag,
}

impl ChannelPeer {
    /// Creates a peer with the given send-queue capacity.
    ///
    /// Returns the peer and the receiving half of its queue.
    #[must_use]
    pub fn new(
        id: PeerId,
        persistent: bool,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        let peer = Arc::new(Self {
            id,
            persistent,
            quit: CancellationToken::new(),
            outbound: tx,
            attributes: AttributeBag::default(),
        });
        (peer, rx)
    }
}

#[async_trait]
impl Peer for ChannelPeer {
    fn id(&self) -> &PeerId {
        &self.id
    }

    fn is_running(&self) -> bool {
        !self.quit.is_cancelled() && !self.outbound.is_closed()
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn quit(&self) -> &CancellationToken {
        &self.quit
    }

    fn attributes(&self) -> &AttributeBag {
        &self.attributes
    }

    async fn send(&self, envelope: Envelope) -> bool {
        if self.quit.is_cancelled() {
            return false;
        }
        tokio::select! {
            res = self.outbound.send(envelope) => res.is_ok(),
            () = self.quit.cancelled() => false,
        }
    }

    fn try_send(&self, envelope: Envelope) -> bool {
        !self.quit.is_cancelled() && self.outbound.try_send(envelope).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_bag_is_typed() {
        let bag = AttributeBag::default();
        assert!(bag.get::<String>().is_none());
        bag.set(Arc::new("state".to_owned()));
        bag.set(Arc::new(7_u64));
        assert_eq!(*bag.get::<String>().unwrap(), "state");
        assert_eq!(*bag.get::<u64>().unwrap(), 7);
    }

    #[tokio::test]
    async fn send_fails_after_quit() {
        let (peer, _rx) = ChannelPeer::new(PeerId::from("p0"), false, 4);
        let envelope = Envelope {
            channel_id: crate::p2p::MEMPOOL_CHANNEL,
            payload: crate::p2p::Payload::Mempool(crate::mempool::MempoolMessage::Txs(vec![])),
        };
        assert!(peer.send(envelope.clone()).await);
        peer.quit().cancel();
        assert!(!peer.is_running());
        assert!(!peer.send(envelope.clone()).await);
        assert!(!peer.try_send(envelope));
    }

    #[test]
    fn peer_set_rejects_duplicates() {
        let set = PeerSet::new();
        let (peer, _rx) = ChannelPeer::new(PeerId::from("p0"), false, 1);
        assert!(set.add(peer.clone()));
        assert!(!set.add(peer));
        assert!(set.has(&PeerId::from("p0")));
        assert_eq!(set.len(), 1);
    }
}
