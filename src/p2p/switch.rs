// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The switch: fan-out, peer lookup, and peer-quality hooks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::p2p::{Envelope, Peer, PeerId, PeerSet};

/// What the reactors need from the process-wide switch.
pub trait Switch: Send + Sync {
    /// The set of currently connected peers.
    fn peers(&self) -> &PeerSet;

    /// Queues the envelope to every connected peer, without per-peer diffing.
    ///
    /// Delivery is best-effort per peer; a slow peer delays only itself.
    fn broadcast(&self, envelope: Envelope);

    /// Disconnects a peer that violated the protocol.
    fn stop_peer_for_error(&self, id: &PeerId, reason: &str);

    /// Credits a peer for sustained useful traffic.
    fn mark_peer_as_good(&self, id: &PeerId);
}

/// In-process switch over a [`PeerSet`].
#[derive(Default)]
pub struct MeshSwitch {
    peers: PeerSet,
    good_marks: Mutex<HashMap<PeerId, u64>>,
}

impl MeshSwitch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connected peer with the switch.
    pub fn add_peer(&self, peer: Arc<dyn Peer>) -> bool {
        self.peers.add(peer)
    }

    /// How often the given peer has been marked as good.
    #[must_use]
    pub fn good_marks(&self, id: &PeerId) -> u64 {
        self.good_marks
            .lock()
            .expect("good marks lock poisoned")
            .get(id)
            .copied()
            .unwrap_or(0)
    }
}

impl Switch for MeshSwitch {
    fn peers(&self) -> &PeerSet {
        &self.peers
    }

    fn broadcast(&self, envelope: Envelope) {
        for peer in self.peers.list() {
            let env = envelope.clone();
            tokio::spawn(async move {
                peer.send(env).await;
            });
        }
    }

    fn stop_peer_for_error(&self, id: &PeerId, reason: &str) {
        error!("stopping peer {id} for error: {reason}");
        if let Some(peer) = self.peers.remove(id) {
            peer.quit().cancel();
        }
    }

    fn mark_peer_as_good(&self, id: &PeerId) {
        debug!("marking peer {id} as good");
        *self
            .good_marks
            .lock()
            .expect("good marks lock poisoned")
            .entry(id.clone())
            .or_insert(0) += 1;
    }
}
