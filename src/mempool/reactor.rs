// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The mempool reactor: receive path and per-peer broadcast routines.
//!
//! Two sender maps drive suppression. `tx_senders` holds peers whose
//! transactions passed CheckTx; a peer in there never gets that transaction
//! back. `unchecked_senders` is set on first sight, before CheckTx resolves;
//! any connected peer in there suppresses relay of the transaction entirely
//! (the direct-broadcast discipline relies on the origin's full-mesh reach).
//! Unchecked entries decay after one visit per live broadcast routine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use tokio::sync::{Semaphore, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::consensus::PeerState;
use crate::mempool::pool::{Mempool, MempoolError};
use crate::mempool::tx_log::TxEntry;
use crate::mempool::MempoolMessage;
use crate::p2p::{Envelope, MEMPOOL_CHANNEL, Payload, Peer, PeerId, PeerSet, Switch};
use crate::types::TxKey;

/// Simple gauges for the mempool reactor.
#[derive(Debug, Default)]
pub struct MempoolMetrics {
    /// Broadcast routines currently holding a connection slot.
    pub active_outbound_connections: AtomicI64,
}

struct VisitCounter {
    count: u32,
    /// Live broadcast-routine count sampled when the counter was created.
    threshold: u32,
}

/// Handles mempool tx broadcasting amongst peers.
pub struct MempoolReactor {
    config: Arc<Config>,
    mempool: Arc<Mempool>,
    switch: Arc<dyn Switch>,

    wait_sync: AtomicBool,
    wait_sync_tx: watch::Sender<bool>,

    /// Peers whose copy of a tx passed CheckTx.
    tx_senders: Mutex<HashMap<TxKey, HashSet<PeerId>>>,
    /// Peers that sent a tx, recorded before CheckTx resolves.
    unchecked_senders: Mutex<HashMap<TxKey, HashSet<PeerId>>>,
    unchecked_visits: Mutex<HashMap<TxKey, VisitCounter>>,
    /// Keys whose tx was never admitted; routines sweep these so their
    /// unchecked entries decay like everyone else's.
    rejected_decay: Mutex<Vec<TxKey>>,

    broadcast_routines: AtomicU32,
    /// All peers this reactor knows, so "did a peer send this" is answerable.
    peers: PeerSet,

    persistent_slots: Option<Arc<Semaphore>>,
    non_persistent_slots: Option<Arc<Semaphore>>,

    pub metrics: MempoolMetrics,
    cancel: CancellationToken,
}

impl MempoolReactor {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        mempool: Arc<Mempool>,
        switch: Arc<dyn Switch>,
        wait_sync: bool,
    ) -> Arc<Self> {
        let cap_to_slots = |cap: usize| (cap > 0).then(|| Arc::new(Semaphore::new(cap)));
        let (wait_sync_tx, _) = watch::channel(wait_sync);
        Arc::new(Self {
            persistent_slots: cap_to_slots(config.max_gossip_connections_to_persistent_peers),
            non_persistent_slots: cap_to_slots(
                config.max_gossip_connections_to_non_persistent_peers,
            ),
            config,
            mempool,
            switch,
            wait_sync: AtomicBool::new(wait_sync),
            wait_sync_tx,
            tx_senders: Mutex::new(HashMap::new()),
            unchecked_senders: Mutex::new(HashMap::new()),
            unchecked_visits: Mutex::new(HashMap::new()),
            rejected_decay: Mutex::new(Vec::new()),
            broadcast_routines: AtomicU32::new(0),
            peers: PeerSet::new(),
            metrics: MempoolMetrics::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Starts the singleton tasks of the reactor.
    pub fn start(self: &Arc<Self>) {
        if self.wait_sync() {
            info!("starting mempool reactor in sync mode: tx propagation will start once sync completes");
        }
        if !self.config.broadcast {
            info!("tx broadcasting is disabled");
        }

        let reactor = Arc::clone(self);
        let mut removed = self.mempool.subscribe_removed();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    key = removed.recv() => match key {
                        Some(key) => reactor.remove_senders(&key),
                        None => return,
                    },
                    () = reactor.cancel.cancelled() => return,
                }
            }
        });
    }

    /// Stops all routines of this reactor.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn wait_sync(&self) -> bool {
        self.wait_sync.load(Ordering::Acquire)
    }

    /// Leaves sync mode, waking all parked broadcast routines exactly once.
    pub fn enable_in_out_txs(&self) {
        info!("enabling inbound and outbound transactions");
        if self
            .wait_sync
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if self.config.broadcast {
            let _ = self.wait_sync_tx.send(false);
        }
    }

    /// Registers the peer and spawns its broadcast routine.
    pub fn add_peer(self: &Arc<Self>, peer: Arc<dyn Peer>) {
        if !self.config.broadcast {
            return;
        }
        // register the peer and count its routine before it spawns, so
        // sender checks and decay thresholds already account for it
        self.peers.add(peer.clone());
        self.broadcast_routines.fetch_add(1, Ordering::Relaxed);

        let reactor = Arc::clone(self);
        tokio::spawn(async move {
            reactor.run_broadcast_routine(peer).await;
            reactor.broadcast_routines.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Holds a connection slot and the outbound gauge around the routine.
    async fn run_broadcast_routine(&self, peer: Arc<dyn Peer>) {
        let slots = if peer.is_persistent() {
            self.persistent_slots.clone()
        } else {
            self.non_persistent_slots.clone()
        };
        let _permit = match slots {
            None => None,
            Some(slots) => tokio::select! {
                permit = slots.acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                () = peer.quit().cancelled() => return,
                () = self.cancel.cancelled() => return,
            },
        };

        self.metrics
            .active_outbound_connections
            .fetch_add(1, Ordering::Relaxed);
        self.broadcast_tx_routine(peer).await;
        self.metrics
            .active_outbound_connections
            .fetch_sub(1, Ordering::Relaxed);
    }

    /// Forgets the peer. Its routine exits on the peer's quit signal.
    pub fn remove_peer(&self, peer: &dyn Peer) {
        self.peers.remove(peer.id());
    }

    /// Handles an envelope received from `src` on the mempool channel.
    pub async fn receive(&self, src: &Arc<dyn Peer>, envelope: Envelope) {
        let Payload::Mempool(MempoolMessage::Txs(txs)) = envelope.payload else {
            self.switch
                .stop_peer_for_error(src.id(), "mempool cannot handle this message type");
            return;
        };
        if self.wait_sync() {
            debug!("ignored txs received from {} while syncing", src.id());
            return;
        }
        if txs.is_empty() {
            error!("received empty txs batch from {}", src.id());
            return;
        }

        for tx in txs {
            let key = tx.key();
            self.add_sender_unchecked(key, src.id().clone());
            match self.mempool.check_tx(tx).await {
                Err(MempoolError::TxInCache) => debug!("tx {key} already exists in cache"),
                Err(err) => {
                    info!("could not check tx {key}: {err}");
                    self.schedule_unchecked_decay(key);
                }
                // Record the sender only when the transaction is valid and,
                // as a consequence, added to the mempool. Senders are stored
                // until the mempool removes the transaction.
                Ok(res) if res.is_ok() => self.add_sender(key, src.id().clone()),
                Ok(res) => {
                    debug!("application rejected tx {key} with code {}", res.code);
                    self.schedule_unchecked_decay(key);
                }
            }
        }
    }

    /// Pushes new mempool txs to the peer, one at a time, in admission order.
    async fn broadcast_tx_routine(&self, peer: Arc<dyn Peer>) {
        // If the node is catching up, don't start this routine immediately.
        if self.wait_sync() {
            let mut sync_rx = self.wait_sync_tx.subscribe();
            tokio::select! {
                res = sync_rx.wait_for(|syncing| !*syncing) => {
                    if res.is_err() {
                        return;
                    }
                }
                () = peer.quit().cancelled() => return,
                () = self.cancel.cancelled() => return,
            }
        }

        let mut cursor = self.mempool.cursor();
        let mut pending: Option<Arc<TxEntry>> = None;
        let mut swept: HashSet<TxKey> = HashSet::new();
        loop {
            if self.cancel.is_cancelled() || !peer.is_running() {
                return;
            }

            let entry = match pending.take() {
                Some(entry) => entry,
                None => tokio::select! {
                    entry = cursor.next_wait() => entry,
                    () = peer.quit().cancelled() => return,
                    () = self.cancel.cancelled() => return,
                },
            };

            // unchecked entries of never-admitted txs decay through the same
            // visit counter as everything else
            self.sweep_rejected(&mut swept);

            // The consensus reactor attaches peer state during InitPeer, but
            // reactor wiring order varies; wait for it to show up.
            let Some(peer_state) = peer.attributes().get::<PeerState>() else {
                sleep(self.config.peer_catchup_sleep_interval).await;
                pending = Some(entry);
                continue;
            };

            // A peer lagging more than one block gets the tx later; this
            // keeps its mempool small and its recheck rate low.
            if peer_state.height() < entry.height - 1 {
                sleep(self.config.peer_catchup_sleep_interval).await;
                pending = Some(entry);
                continue;
            }

            let from_peer = self.has_connected_unchecked_sender(&entry.key);
            let already_known = self.is_sender(&entry.key, peer.id());
            self.record_unchecked_visit(entry.key);

            if !already_known && !from_peer {
                let envelope = Envelope {
                    channel_id: MEMPOOL_CHANNEL,
                    payload: Payload::Mempool(MempoolMessage::Txs(vec![entry.tx.clone()])),
                };
                if !peer.send(envelope).await {
                    sleep(self.config.peer_catchup_sleep_interval).await;
                    pending = Some(entry);
                    continue;
                }
            }
        }
    }

    fn is_sender(&self, key: &TxKey, peer_id: &PeerId) -> bool {
        self.tx_senders
            .lock()
            .expect("tx senders lock poisoned")
            .get(key)
            .is_some_and(|senders| senders.contains(peer_id))
    }

    fn add_sender(&self, key: TxKey, sender: PeerId) {
        self.tx_senders
            .lock()
            .expect("tx senders lock poisoned")
            .entry(key)
            .or_default()
            .insert(sender);
    }

    fn remove_senders(&self, key: &TxKey) {
        self.tx_senders
            .lock()
            .expect("tx senders lock poisoned")
            .remove(key);
        // backstop for unchecked entries whose tx never got visited
        self.unchecked_senders
            .lock()
            .expect("unchecked senders lock poisoned")
            .remove(key);
        self.unchecked_visits
            .lock()
            .expect("unchecked visits lock poisoned")
            .remove(key);
    }

    fn add_sender_unchecked(&self, key: TxKey, sender: PeerId) {
        self.unchecked_senders
            .lock()
            .expect("unchecked senders lock poisoned")
            .entry(key)
            .or_default()
            .insert(sender);
    }

    /// `true` iff any unchecked sender of the tx is a connected peer.
    fn has_connected_unchecked_sender(&self, key: &TxKey) -> bool {
        self.unchecked_senders
            .lock()
            .expect("unchecked senders lock poisoned")
            .get(key)
            .is_some_and(|senders| senders.iter().any(|id| self.peers.has(id)))
    }

    /// Counts one dissemination-loop visit; the unchecked entry is dropped
    /// once every routine that was live at first visit has seen the tx.
    fn record_unchecked_visit(&self, key: TxKey) {
        let live_routines = self.broadcast_routines.load(Ordering::Relaxed).max(1);
        let mut visits = self
            .unchecked_visits
            .lock()
            .expect("unchecked visits lock poisoned");
        let counter = visits.entry(key).or_insert(VisitCounter {
            count: 0,
            threshold: live_routines,
        });
        counter.count += 1;
        if counter.count >= counter.threshold {
            visits.remove(&key);
            self.unchecked_senders
                .lock()
                .expect("unchecked senders lock poisoned")
                .remove(&key);
            self.rejected_decay
                .lock()
                .expect("rejected decay lock poisoned")
                .retain(|k| k != &key);
        }
    }

    /// Queues a never-admitted tx for decay through the visit counter.
    fn schedule_unchecked_decay(&self, key: TxKey) {
        let mut pending = self
            .rejected_decay
            .lock()
            .expect("rejected decay lock poisoned");
        if !pending.contains(&key) {
            pending.push(key);
        }
    }

    /// One visit per routine for every pending never-admitted tx.
    fn sweep_rejected(&self, swept: &mut HashSet<TxKey>) {
        let pending: Vec<TxKey> = self
            .rejected_decay
            .lock()
            .expect("rejected decay lock poisoned")
            .clone();
        for key in &pending {
            if swept.insert(*key) {
                self.record_unchecked_visit(*key);
            }
        }
        // forget keys that finished decaying so the set stays bounded
        swept.retain(|key| pending.contains(key));
    }

    #[cfg(test)]
    fn has_unchecked_senders(&self, key: &TxKey) -> bool {
        self.unchecked_senders
            .lock()
            .expect("unchecked senders lock poisoned")
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::pool::{CheckTxResponse, MockCheckTxOracle};
    use crate::p2p::{ChannelPeer, MeshSwitch};
    use crate::types::Tx;

    fn reactor_with(
        switch: Arc<MeshSwitch>,
        wait_sync: bool,
    ) -> (Arc<MempoolReactor>, Arc<Mempool>) {
        let mut oracle = MockCheckTxOracle::new();
        oracle.expect_check_tx().returning(|_| CheckTxResponse::ok());
        let mempool = Arc::new(Mempool::new(Arc::new(oracle), 1024));
        let reactor = MempoolReactor::new(
            Arc::new(Config::default()),
            mempool.clone(),
            switch,
            wait_sync,
        );
        (reactor, mempool)
    }

    fn txs_envelope(txs: Vec<Tx>) -> Envelope {
        Envelope {
            channel_id: MEMPOOL_CHANNEL,
            payload: Payload::Mempool(MempoolMessage::Txs(txs)),
        }
    }

    #[tokio::test]
    async fn receive_records_both_sender_sets() {
        let switch = Arc::new(MeshSwitch::new());
        let (reactor, mempool) = reactor_with(switch.clone(), false);
        let (src, _rx) = ChannelPeer::new(PeerId::from("sender"), false, 4);
        let src: Arc<dyn Peer> = src;

        let tx = Tx::new(vec![1, 2, 3]);
        reactor.receive(&src, txs_envelope(vec![tx.clone()])).await;

        assert_eq!(mempool.size(), 1);
        assert!(reactor.is_sender(&tx.key(), &PeerId::from("sender")));
        assert!(reactor.has_unchecked_senders(&tx.key()));
    }

    #[tokio::test]
    async fn receive_is_dropped_while_syncing() {
        let switch = Arc::new(MeshSwitch::new());
        let (reactor, mempool) = reactor_with(switch.clone(), true);
        let (src, _rx) = ChannelPeer::new(PeerId::from("sender"), false, 4);
        let src: Arc<dyn Peer> = src;

        reactor
            .receive(&src, txs_envelope(vec![Tx::new(vec![1])]))
            .await;
        assert_eq!(mempool.size(), 0);

        reactor.enable_in_out_txs();
        assert!(!reactor.wait_sync());
        reactor
            .receive(&src, txs_envelope(vec![Tx::new(vec![1])]))
            .await;
        assert_eq!(mempool.size(), 1);
    }

    #[tokio::test]
    async fn unknown_message_stops_the_peer() {
        let switch = Arc::new(MeshSwitch::new());
        let (reactor, _) = reactor_with(switch.clone(), false);
        let (src, _rx) = ChannelPeer::new(PeerId::from("bad"), false, 4);
        switch.add_peer(src.clone());
        let src: Arc<dyn Peer> = src;

        let envelope = Envelope {
            channel_id: MEMPOOL_CHANNEL,
            payload: Payload::Consensus(crate::consensus::ConsensusMessage::HasVote(
                crate::consensus::messages::HasVote {
                    height: 1,
                    round: 0,
                    vote_type: crate::types::SignedMsgType::Prevote,
                    index: 0,
                },
            )),
        };
        reactor.receive(&src, envelope).await;
        assert!(!switch.peers().has(&PeerId::from("bad")));
    }

    #[tokio::test]
    async fn unchecked_senders_decay_after_threshold_visits() {
        let switch = Arc::new(MeshSwitch::new());
        let (reactor, _) = reactor_with(switch.clone(), false);
        // three live routines
        reactor.broadcast_routines.store(3, Ordering::Relaxed);

        let key = Tx::new(vec![9]).key();
        reactor.add_sender_unchecked(key, PeerId::from("origin"));

        reactor.record_unchecked_visit(key);
        reactor.record_unchecked_visit(key);
        assert!(reactor.has_unchecked_senders(&key));
        reactor.record_unchecked_visit(key);
        assert!(!reactor.has_unchecked_senders(&key));
    }

    #[tokio::test]
    async fn rejected_tx_unchecked_entry_decays_via_sweep() {
        let switch = Arc::new(MeshSwitch::new());
        let mut oracle = MockCheckTxOracle::new();
        oracle
            .expect_check_tx()
            .returning(|_| CheckTxResponse::error(1, "bad"));
        let mempool = Arc::new(Mempool::new(Arc::new(oracle), 1024));
        let reactor =
            MempoolReactor::new(Arc::new(Config::default()), mempool, switch, false);
        reactor.broadcast_routines.store(3, Ordering::Relaxed);
        let (src, _rx) = ChannelPeer::new(PeerId::from("origin"), false, 4);
        let src: Arc<dyn Peer> = src;

        let tx = Tx::new(vec![0xbb]);
        reactor.receive(&src, txs_envelope(vec![tx.clone()])).await;
        assert!(reactor.has_unchecked_senders(&tx.key()));
        assert!(!reactor.is_sender(&tx.key(), &PeerId::from("origin")));

        // three routines each sweep once; the third visit erases the entry
        let (mut a, mut b, mut c) = (HashSet::new(), HashSet::new(), HashSet::new());
        reactor.sweep_rejected(&mut a);
        reactor.sweep_rejected(&mut b);
        assert!(reactor.has_unchecked_senders(&tx.key()));
        reactor.sweep_rejected(&mut c);
        assert!(!reactor.has_unchecked_senders(&tx.key()));
        // later sweeps find nothing left to decay
        reactor.sweep_rejected(&mut a);
        assert!(a.is_empty());
    }

    #[tokio::test]
    async fn removal_erases_sender_attribution() {
        let switch = Arc::new(MeshSwitch::new());
        let (reactor, mempool) = reactor_with(switch.clone(), false);
        reactor.start();
        let (src, _rx) = ChannelPeer::new(PeerId::from("sender"), false, 4);
        let src: Arc<dyn Peer> = src;

        let tx = Tx::new(vec![4, 5]);
        reactor.receive(&src, txs_envelope(vec![tx.clone()])).await;
        assert!(reactor.is_sender(&tx.key(), &PeerId::from("sender")));

        mempool.remove_tx(&tx.key());
        // the removal consumer runs on the spawned singleton task
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!reactor.is_sender(&tx.key(), &PeerId::from("sender")));
        assert!(!reactor.has_unchecked_senders(&tx.key()));
        reactor.stop();
    }
}
