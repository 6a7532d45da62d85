// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The consensus reactor: peer lifecycle, receive paths, and fan-out.
//!
//! Three singleton tasks run next to the per-peer loops: the round-state
//! cache ticker (so gossip iterations never contend on the state machine's
//! lock), the event fan-out task (turning state-machine events into State
//! channel hints), and the peer-statistics task.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, trace, warn};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::consensus::messages::{
    ConsensusMessage, HasProposalBlockPart, HasVote, NewValidBlock, VoteSetBits,
};
use crate::consensus::peer_state::PeerState;
use crate::consensus::state::{ConsensusState, PeerMessage, RoundState, StateEvent, Step};
use crate::p2p::{
    DATA_CHANNEL, Envelope, Payload, Peer, STATE_CHANNEL, Switch, VOTE_CHANNEL,
    VOTE_SET_BITS_CHANNEL,
};
use crate::store::BlockStore;

/// Votes a peer must contribute before it is acked to the switch.
pub const VOTES_TO_MARK_PEER_GOOD: u64 = 10_000;
/// Block parts a peer must contribute before it is acked to the switch.
pub const BLOCK_PARTS_TO_MARK_PEER_GOOD: u64 = 10_000;

/// Reactor for the consensus service.
pub struct ConsensusReactor {
    pub(crate) state: Arc<ConsensusState>,
    pub(crate) store: Arc<dyn BlockStore>,
    pub(crate) switch: Arc<dyn Switch>,
    pub(crate) config: Arc<Config>,
    wait_sync: AtomicBool,
    /// Cached snapshot refreshed by the ticker task.
    rs_cache: Mutex<RoundState>,
    pub(crate) cancel: CancellationToken,
}

impl ConsensusReactor {
    #[must_use]
    pub fn new(
        state: Arc<ConsensusState>,
        store: Arc<dyn BlockStore>,
        switch: Arc<dyn Switch>,
        config: Arc<Config>,
        wait_sync: bool,
    ) -> Arc<Self> {
        let rs_cache = Mutex::new(state.get_round_state());
        Arc::new(Self {
            state,
            store,
            switch,
            config,
            wait_sync: AtomicBool::new(wait_sync),
            rs_cache,
            cancel: CancellationToken::new(),
        })
    }

    /// Starts the singleton tasks and, unless block-syncing, the state
    /// machine itself.
    ///
    /// # Errors
    ///
    /// Fails if the consensus state cannot be started.
    pub fn start(self: &Arc<Self>) -> color_eyre::Result<()> {
        if self.wait_sync() {
            info!("starting consensus reactor in sync mode: consensus will start once sync completes");
        }

        if let Some(stats) = self.state.take_stats_queue() {
            let reactor = Arc::clone(self);
            tokio::spawn(reactor.peer_stats_routine(stats));
        }

        let reactor = Arc::clone(self);
        let events = self.state.subscribe_events();
        tokio::spawn(reactor.broadcast_events_routine(events));

        let reactor = Arc::clone(self);
        tokio::spawn(reactor.update_round_state_routine());

        if !self.wait_sync() {
            self.state.start()?;
        }
        Ok(())
    }

    /// Stops all routines and the state machine.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.state.stop();
    }

    #[must_use]
    pub fn wait_sync(&self) -> bool {
        self.wait_sync.load(Ordering::Acquire)
    }

    /// Switches from block sync to consensus mode.
    ///
    /// # Panics
    ///
    /// Panics if the consensus state fails to start; nothing useful can run
    /// beyond this point.
    pub fn switch_to_consensus(&self) {
        info!("switching to consensus");
        self.wait_sync.store(false, Ordering::Release);
        if let Err(err) = self.state.start() {
            panic!(
                "failed to start consensus state: {err}\n\nround state:\n{:#?}",
                self.state.get_round_state()
            );
        }
        // announce our step so peers prime their view of us
        let msg = self.round_state().new_round_step();
        self.switch.broadcast(Envelope {
            channel_id: STATE_CHANNEL,
            payload: Payload::Consensus(ConsensusMessage::NewRoundStep(msg)),
        });
    }

    /// Attaches the per-peer state before the peer goes live.
    pub fn init_peer(&self, peer: &Arc<dyn Peer>) {
        let peer_state = Arc::new(PeerState::new(peer.clone()));
        peer.attributes().set(peer_state);
    }

    /// Spawns the three dissemination loops for the peer.
    ///
    /// # Panics
    ///
    /// Panics if [`ConsensusReactor::init_peer`] did not run for this peer.
    pub fn add_peer(self: &Arc<Self>, peer: Arc<dyn Peer>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let peer_state = peer
            .attributes()
            .get::<PeerState>()
            .unwrap_or_else(|| panic!("peer {} has no state", peer.id()));

        let reactor = Arc::clone(self);
        tokio::spawn(reactor.gossip_data_routine(peer.clone(), peer_state.clone()));
        let reactor = Arc::clone(self);
        tokio::spawn(reactor.gossip_votes_routine(peer.clone(), peer_state.clone()));
        let reactor = Arc::clone(self);
        tokio::spawn(reactor.query_maj23_routine(peer.clone(), peer_state));

        // prime the new peer with our state; when block-syncing this happens
        // later, in switch_to_consensus
        if !self.wait_sync() {
            let msg = self.round_state().new_round_step();
            tokio::spawn(async move {
                peer.send(Envelope {
                    channel_id: STATE_CHANNEL,
                    payload: Payload::Consensus(ConsensusMessage::NewRoundStep(msg)),
                })
                .await;
            });
        }
    }

    /// The per-peer loops exit on the peer's quit signal; nothing to do.
    pub fn remove_peer(&self, _peer: &dyn Peer) {}

    /// Current cached round-state snapshot.
    pub(crate) fn round_state(&self) -> RoundState {
        self.rs_cache.lock().expect("round state cache lock poisoned").clone()
    }

    /// Handles an envelope received from `src` on any consensus channel.
    pub async fn receive(&self, src: &Arc<dyn Peer>, envelope: Envelope) {
        let Payload::Consensus(msg) = envelope.payload else {
            self.switch
                .stop_peer_for_error(src.id(), "consensus cannot handle this message type");
            return;
        };
        if let Err(err) = msg.validate() {
            error!("peer {} sent an invalid {} message: {err}", src.id(), msg.kind());
            self.switch.stop_peer_for_error(src.id(), &err.to_string());
            return;
        }
        let peer_state = src
            .attributes()
            .get::<PeerState>()
            .unwrap_or_else(|| panic!("peer {} has no state", src.id()));

        match envelope.channel_id {
            // state-channel messages keep peer bookkeeping alive even while
            // we block-sync
            STATE_CHANNEL => self.receive_state(src, &peer_state, msg).await,
            DATA_CHANNEL => {
                if self.wait_sync() {
                    info!("ignoring {} received during sync", msg.kind());
                    return;
                }
                self.receive_data(src, &peer_state, msg).await;
            }
            VOTE_CHANNEL => {
                if self.wait_sync() {
                    info!("ignoring {} received during sync", msg.kind());
                    return;
                }
                self.receive_vote(src, &peer_state, msg).await;
            }
            VOTE_SET_BITS_CHANNEL => {
                if self.wait_sync() {
                    info!("ignoring {} received during sync", msg.kind());
                    return;
                }
                self.receive_vote_set_bits(&peer_state, msg);
            }
            channel => error!("unknown channel {channel}"),
        }
    }

    async fn receive_state(
        &self,
        src: &Arc<dyn Peer>,
        peer_state: &PeerState,
        msg: ConsensusMessage,
    ) {
        match msg {
            ConsensusMessage::NewRoundStep(msg) => {
                let initial_height = self.state.initial_height();
                if let Err(err) = msg.validate_height(initial_height) {
                    error!("peer {} sent an invalid NewRoundStep: {err}", src.id());
                    self.switch.stop_peer_for_error(src.id(), &err.to_string());
                    return;
                }
                peer_state.apply_new_round_step(&msg);
            }
            ConsensusMessage::NewValidBlock(msg) => peer_state.apply_new_valid_block(&msg),
            ConsensusMessage::HasVote(msg) => peer_state.apply_has_vote(&msg),
            ConsensusMessage::HasProposalBlockPart(msg) => {
                peer_state.apply_has_proposal_block_part(&msg);
            }
            ConsensusMessage::VoteSetMaj23(msg) => {
                let height = self.state.height();
                if height != msg.height {
                    return;
                }
                let claim = self.state.with_round_state_mut(|rs| {
                    rs.votes.set_peer_maj23(
                        msg.round,
                        msg.vote_type,
                        src.id().clone(),
                        msg.block_id.clone(),
                    )
                });
                if let Err(err) = claim {
                    self.switch.stop_peer_for_error(src.id(), &err.to_string());
                    return;
                }
                // respond with our mask for the claimed block, so the peer
                // can fill our gaps symmetrically
                let our_votes = self.state.with_round_state(|rs| {
                    rs.votes
                        .bit_array_by_block_id(msg.round, msg.vote_type, &msg.block_id)
                });
                let reply = VoteSetBits {
                    height: msg.height,
                    round: msg.round,
                    vote_type: msg.vote_type,
                    block_id: msg.block_id,
                    votes: our_votes.unwrap_or_else(|| crate::types::BitArray::new(0)),
                };
                src.try_send(Envelope {
                    channel_id: VOTE_SET_BITS_CHANNEL,
                    payload: Payload::Consensus(ConsensusMessage::VoteSetBits(reply)),
                });
            }
            other => error!("unexpected {} on the state channel", other.kind()),
        }
    }

    async fn receive_data(
        &self,
        src: &Arc<dyn Peer>,
        peer_state: &PeerState,
        msg: ConsensusMessage,
    ) {
        match msg {
            ConsensusMessage::Proposal(proposal) => {
                peer_state.set_has_proposal(&proposal);
                self.forward_to_state(src, ConsensusMessage::Proposal(proposal)).await;
            }
            ConsensusMessage::ProposalPol(msg) => {
                peer_state.apply_proposal_pol(&msg);
                self.forward_to_state(src, ConsensusMessage::ProposalPol(msg)).await;
            }
            ConsensusMessage::BlockPart(msg) => {
                peer_state.set_has_proposal_block_part(
                    msg.height,
                    msg.round,
                    msg.part.index as usize,
                );
                self.forward_to_state(src, ConsensusMessage::BlockPart(msg)).await;
            }
            other => error!("unexpected {} on the data channel", other.kind()),
        }
    }

    async fn receive_vote(
        &self,
        src: &Arc<dyn Peer>,
        peer_state: &PeerState,
        msg: ConsensusMessage,
    ) {
        match msg {
            ConsensusMessage::Vote(vote) => {
                let height = self.state.height();
                let validators = self.state.validators_size();
                let last_commit_size = self.state.last_commit_size();
                peer_state.ensure_vote_bit_arrays(height, validators);
                peer_state.ensure_vote_bit_arrays(height - 1, last_commit_size);
                peer_state.set_has_vote(&vote);
                self.forward_to_state(src, ConsensusMessage::Vote(vote)).await;
            }
            other => error!("unexpected {} on the vote channel", other.kind()),
        }
    }

    fn receive_vote_set_bits(&self, peer_state: &PeerState, msg: ConsensusMessage) {
        match msg {
            ConsensusMessage::VoteSetBits(msg) => {
                let our_votes = self.state.with_round_state(|rs| {
                    if rs.height == msg.height {
                        rs.votes
                            .bit_array_by_block_id(msg.round, msg.vote_type, &msg.block_id)
                    } else {
                        None
                    }
                });
                peer_state.apply_vote_set_bits(&msg, our_votes.as_ref());
            }
            other => error!("unexpected {} on the vote-set-bits channel", other.kind()),
        }
    }

    /// Enqueues the message to the state machine's inbox and stats queue.
    async fn forward_to_state(&self, src: &Arc<dyn Peer>, message: ConsensusMessage) {
        let peer_message = PeerMessage {
            peer_id: src.id().clone(),
            message,
        };
        if self
            .state
            .stats_sender()
            .try_send(peer_message.clone())
            .is_err()
        {
            trace!("stats queue full, dropping sample");
        }
        if self.state.peer_msg_sender().send(peer_message).await.is_err() {
            trace!("peer message queue closed");
        }
    }

    /// Consumes the stats queue, acking consistently useful peers.
    async fn peer_stats_routine(self: Arc<Self>, mut stats: mpsc::Receiver<PeerMessage>) {
        loop {
            let msg = tokio::select! {
                msg = stats.recv() => msg,
                () = self.cancel.cancelled() => return,
            };
            let Some(PeerMessage { peer_id, message }) = msg else {
                info!("stopping peer stats routine");
                return;
            };
            let Some(peer) = self.switch.peers().get(&peer_id) else {
                debug!("attempt to update stats for non-existent peer {peer_id}");
                continue;
            };
            let Some(peer_state) = peer.attributes().get::<PeerState>() else {
                continue;
            };
            match message {
                ConsensusMessage::Vote(_) => {
                    if peer_state.record_vote() % VOTES_TO_MARK_PEER_GOOD == 0 {
                        self.switch.mark_peer_as_good(&peer_id);
                    }
                }
                ConsensusMessage::BlockPart(_) => {
                    if peer_state.record_block_part() % BLOCK_PARTS_TO_MARK_PEER_GOOD == 0 {
                        self.switch.mark_peer_as_good(&peer_id);
                    }
                }
                _ => {}
            }
        }
    }

    /// Turns state-machine events into State-channel hints for all peers.
    async fn broadcast_events_routine(
        self: Arc<Self>,
        mut events: broadcast::Receiver<StateEvent>,
    ) {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                () = self.cancel.cancelled() => return,
            };
            let msg = match event {
                Ok(StateEvent::NewRoundStep(rs)) => ConsensusMessage::NewRoundStep(rs.new_round_step()),
                Ok(StateEvent::ValidBlock(rs)) => {
                    let Some(parts) = &rs.proposal_block_parts else {
                        continue;
                    };
                    ConsensusMessage::NewValidBlock(NewValidBlock {
                        height: rs.height,
                        round: rs.round,
                        block_part_set_header: parts.header().clone(),
                        block_parts: parts.bit_array(),
                        is_commit: rs.step == Step::Commit,
                    })
                }
                Ok(StateEvent::Vote(vote)) => ConsensusMessage::HasVote(HasVote {
                    height: vote.height,
                    round: vote.round,
                    vote_type: vote.vote_type,
                    index: vote.validator_index,
                }),
                Ok(StateEvent::ProposalBlockPart { height, round, index }) => {
                    ConsensusMessage::HasProposalBlockPart(HasProposalBlockPart {
                        height,
                        round,
                        index: i32::try_from(index).unwrap_or(i32::MAX),
                    })
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("event stream lagged, {missed} events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            self.switch.broadcast(Envelope {
                channel_id: STATE_CHANNEL,
                payload: Payload::Consensus(msg),
            });
        }
    }

    /// Periodically refreshes the cached round-state snapshot.
    async fn update_round_state_routine(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.round_state_refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let rs = self.state.get_round_state();
                    *self.rs_cache.lock().expect("round state cache lock poisoned") = rs;
                }
                () = self.cancel.cancelled() => return,
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::messages::NewRoundStep;
    use crate::consensus::state::RoundState;
    use crate::p2p::{ChannelPeer, MeshSwitch, PeerId};
    use crate::store::InMemoryBlockStore;
    use crate::types::{BitArray, BlockId, SignedMsgType, Vote};
    use std::time::Duration;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            peer_gossip_sleep_duration: Duration::from_millis(5),
            peer_query_maj23_sleep_duration: Duration::from_millis(10),
            peer_catchup_sleep_interval: Duration::from_millis(5),
            round_state_refresh_interval: Duration::from_millis(1),
            ..Config::default()
        })
    }

    fn reactor_at(
        height: crate::Height,
        validators: usize,
    ) -> (Arc<ConsensusReactor>, Arc<ConsensusState>, Arc<MeshSwitch>) {
        let state = Arc::new(ConsensusState::new(
            RoundState::new(height, validators),
            1,
            validators,
        ));
        let switch = Arc::new(MeshSwitch::new());
        let store = Arc::new(InMemoryBlockStore::new());
        let reactor = ConsensusReactor::new(
            state.clone(),
            store,
            switch.clone(),
            test_config(),
            false,
        );
        (reactor, state, switch)
    }

    fn connected_peer(
        reactor: &Arc<ConsensusReactor>,
        switch: &MeshSwitch,
        id: &str,
    ) -> (Arc<dyn Peer>, tokio::sync::mpsc::Receiver<Envelope>) {
        let (peer, rx) = ChannelPeer::new(PeerId::from(id), false, 64);
        let peer: Arc<dyn Peer> = peer;
        reactor.init_peer(&peer);
        switch.add_peer(peer.clone());
        (peer, rx)
    }

    #[tokio::test]
    async fn invalid_message_stops_the_peer() {
        let (reactor, _state, switch) = reactor_at(5, 4);
        let (peer, _rx) = connected_peer(&reactor, &switch, "p0");

        let bad = ConsensusMessage::NewRoundStep(NewRoundStep {
            height: -1,
            round: 0,
            step: Step::Propose,
            seconds_since_start_time: 0,
            last_commit_round: 0,
        });
        reactor
            .receive(
                &peer,
                Envelope {
                    channel_id: STATE_CHANNEL,
                    payload: Payload::Consensus(bad),
                },
            )
            .await;
        assert!(!switch.peers().has(&PeerId::from("p0")));
    }

    #[tokio::test]
    async fn height_below_initial_stops_the_peer() {
        let (reactor, _state, switch) = reactor_at(5, 4);
        let (peer, _rx) = connected_peer(&reactor, &switch, "p0");

        // initial height is 1, so height 0 is a protocol violation
        let msg = ConsensusMessage::NewRoundStep(NewRoundStep {
            height: 0,
            round: 0,
            step: Step::Propose,
            seconds_since_start_time: 0,
            last_commit_round: -1,
        });
        reactor
            .receive(
                &peer,
                Envelope {
                    channel_id: STATE_CHANNEL,
                    payload: Payload::Consensus(msg),
                },
            )
            .await;
        assert!(!switch.peers().has(&PeerId::from("p0")));
    }

    #[tokio::test]
    async fn vote_receive_updates_peer_state_and_forwards() {
        let (reactor, state, switch) = reactor_at(5, 4);
        let (peer, _rx) = connected_peer(&reactor, &switch, "p0");
        let peer_state = peer.attributes().get::<PeerState>().unwrap();
        peer_state.apply_new_round_step(&NewRoundStep {
            height: 5,
            round: 0,
            step: Step::Prevote,
            seconds_since_start_time: 0,
            last_commit_round: 0,
        });

        let vote = Vote {
            vote_type: SignedMsgType::Prevote,
            height: 5,
            round: 0,
            block_id: None,
            validator_index: 2,
            signature: vec![1; 64],
            extension: Vec::new(),
        };
        reactor
            .receive(
                &peer,
                Envelope {
                    channel_id: VOTE_CHANNEL,
                    payload: Payload::Consensus(ConsensusMessage::Vote(vote.clone())),
                },
            )
            .await;

        // the bit is recorded even though the mask was never allocated before
        assert!(peer_state.get_round_state().prevotes.unwrap().get(2));
        // and the vote reached the state machine's inbox
        let mut inbox = state.take_peer_msg_queue().unwrap();
        let forwarded = inbox.recv().await.unwrap();
        assert_eq!(forwarded.peer_id, PeerId::from("p0"));
        assert_eq!(forwarded.message, ConsensusMessage::Vote(vote));
    }

    #[tokio::test]
    async fn vote_set_maj23_gets_a_bits_reply() {
        let (reactor, state, switch) = reactor_at(5, 4);
        let (peer, mut rx) = connected_peer(&reactor, &switch, "p0");

        let block = BlockId {
            hash: vec![3; 32],
            part_set_header: crate::types::PartSetHeader {
                total: 1,
                hash: vec![3; 32],
            },
        };
        // we hold two prevotes for that block
        state.with_round_state_mut(|rs| {
            for index in 0..2 {
                rs.votes
                    .add_vote(Vote {
                        vote_type: SignedMsgType::Prevote,
                        height: 5,
                        round: 0,
                        block_id: Some(block.clone()),
                        validator_index: index,
                        signature: vec![1; 64],
                        extension: Vec::new(),
                    })
                    .unwrap();
            }
        });

        let claim = ConsensusMessage::VoteSetMaj23(crate::consensus::messages::VoteSetMaj23 {
            height: 5,
            round: 0,
            vote_type: SignedMsgType::Prevote,
            block_id: block,
        });
        reactor
            .receive(
                &peer,
                Envelope {
                    channel_id: STATE_CHANNEL,
                    payload: Payload::Consensus(claim),
                },
            )
            .await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.channel_id, VOTE_SET_BITS_CHANNEL);
        let Payload::Consensus(ConsensusMessage::VoteSetBits(bits)) = reply.payload else {
            panic!("expected a VoteSetBits reply");
        };
        assert!(bits.votes.get(0) && bits.votes.get(1) && !bits.votes.get(2));
    }

    #[tokio::test]
    async fn data_messages_are_dropped_during_sync() {
        let state = Arc::new(ConsensusState::new(RoundState::new(5, 4), 1, 4));
        let switch = Arc::new(MeshSwitch::new());
        let store = Arc::new(InMemoryBlockStore::new());
        let reactor = ConsensusReactor::new(
            state.clone(),
            store,
            switch.clone(),
            test_config(),
            true,
        );
        let (peer, _rx) = connected_peer(&reactor, &switch, "p0");
        let peer_state = peer.attributes().get::<PeerState>().unwrap();

        reactor
            .receive(
                &peer,
                Envelope {
                    channel_id: DATA_CHANNEL,
                    payload: Payload::Consensus(ConsensusMessage::ProposalPol(
                        crate::consensus::messages::ProposalPol {
                            height: 5,
                            proposal_pol_round: 0,
                            proposal_pol: BitArray::new(4),
                        },
                    )),
                },
            )
            .await;
        // dropped: no state change, peer not stopped
        assert_eq!(peer_state.get_round_state().proposal_pol, None);
        assert!(switch.peers().has(&PeerId::from("p0")));
    }

    #[tokio::test]
    async fn stats_routine_marks_peer_good_on_threshold() {
        let (reactor, state, switch) = reactor_at(5, 4);
        let (peer, _rx) = connected_peer(&reactor, &switch, "p0");
        let peer_state = peer.attributes().get::<PeerState>().unwrap();
        // pre-load the counter right below the threshold
        for _ in 0..VOTES_TO_MARK_PEER_GOOD - 1 {
            peer_state.record_vote();
        }
        reactor.start().unwrap();

        state
            .stats_sender()
            .send(PeerMessage {
                peer_id: PeerId::from("p0"),
                message: ConsensusMessage::Vote(Vote {
                    vote_type: SignedMsgType::Prevote,
                    height: 5,
                    round: 0,
                    block_id: None,
                    validator_index: 0,
                    signature: vec![1; 64],
                    extension: Vec::new(),
                }),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(switch.good_marks(&PeerId::from("p0")), 1);
        reactor.stop();
    }

    #[tokio::test]
    async fn proposal_pol_validation_rejects_empty_mask() {
        let (reactor, _state, switch) = reactor_at(5, 4);
        let (peer, _rx) = connected_peer(&reactor, &switch, "p0");
        reactor
            .receive(
                &peer,
                Envelope {
                    channel_id: DATA_CHANNEL,
                    payload: Payload::Consensus(ConsensusMessage::ProposalPol(
                        crate::consensus::messages::ProposalPol {
                            height: 5,
                            proposal_pol_round: 0,
                            proposal_pol: BitArray::new(0),
                        },
                    )),
                },
            )
            .await;
        assert!(!switch.peers().has(&PeerId::from("p0")));
    }
}
