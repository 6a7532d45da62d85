// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The three per-peer dissemination loops.
//!
//! Each iteration compares our cached round state against the peer's and
//! sends at most one thing: a block part (current round or catch-up), the
//! proposal, one missing vote, or a +2/3 announcement. Transient misses
//! (block-store races, part-set-header mismatches, send backpressure) turn
//! into short sleeps, never into a peer stop.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace};
use rand::Rng;
use tokio::time::sleep;

use crate::consensus::messages::{BlockPart, ConsensusMessage, ProposalPol, VoteSetMaj23};
use crate::consensus::peer_state::{PeerRoundState, PeerState};
use crate::consensus::reactor::ConsensusReactor;
use crate::consensus::state::{RoundState, Step};
use crate::p2p::{DATA_CHANNEL, Envelope, Payload, Peer, STATE_CHANNEL};
use crate::types::{BitArray, ExtendedCommit, SignedMsgType};
use crate::Height;

impl ConsensusReactor {
    /// Sleeps between loop iterations; `false` means the loop should exit.
    async fn gossip_sleep(&self, peer: &dyn Peer, duration: Duration) -> bool {
        tokio::select! {
            () = sleep(duration) => true,
            () = peer.quit().cancelled() => false,
            () = self.cancel.cancelled() => false,
        }
    }

    /// Random jitter before each iteration, spreading load across peers.
    async fn intraloop_jitter(&self) {
        let bound = self.config.peer_gossip_intraloop_sleep_duration;
        if bound > Duration::ZERO {
            let nanos = rand::rng().random_range(0..bound.as_nanos().max(1));
            sleep(Duration::from_nanos(nanos as u64)).await;
        }
    }

    fn keeps_running(&self, peer: &dyn Peer) -> bool {
        peer.is_running() && !self.cancel.is_cancelled()
    }

    /// Drives proposal, block-part, and catch-up data towards one peer.
    pub(crate) async fn gossip_data_routine(
        self: Arc<Self>,
        peer: Arc<dyn Peer>,
        peer_state: Arc<PeerState>,
    ) {
        loop {
            if !self.keeps_running(peer.as_ref()) {
                trace!("peer or reactor stopped, exiting data gossip for {}", peer.id());
                return;
            }
            self.intraloop_jitter().await;

            let rs = self.round_state();
            let prs = peer_state.get_round_state();

            // send a proposal block part the peer is missing?
            if let Some(parts) = &rs.proposal_block_parts
                && parts.has_header(&prs.proposal_block_part_set_header)
            {
                let peer_mask = prs
                    .proposal_block_parts
                    .clone()
                    .unwrap_or_else(|| BitArray::new(0));
                if let Some(index) = parts.bit_array().sub(&peer_mask).pick_random() {
                    let Some(part) = parts.get_part(index) else {
                        continue;
                    };
                    debug!("sending block part {index} to {}", peer.id());
                    let sent = peer
                        .send(Envelope {
                            channel_id: DATA_CHANNEL,
                            payload: Payload::Consensus(ConsensusMessage::BlockPart(BlockPart {
                                height: rs.height,
                                round: rs.round,
                                part: part.clone(),
                            })),
                        })
                        .await;
                    if sent {
                        peer_state.set_has_proposal_block_part(prs.height, prs.round, index);
                    } else {
                        debug!("failed to send block part {index} to {}", peer.id());
                    }
                    continue;
                }
            }

            // serve an older height from the block store?
            let block_store_base = self.store.base();
            if block_store_base > 0
                && prs.height > 0
                && prs.height < rs.height
                && prs.height >= block_store_base
            {
                if prs.proposal_block_parts.is_none() {
                    // one-shot init of the peer's part mask at that height
                    match self.store.load_block_meta(prs.height) {
                        Some(meta) => {
                            peer_state.init_proposal_block_parts(meta.block_id.part_set_header);
                        }
                        None => {
                            error!(
                                "failed to load block meta at height {} (store {}..={})",
                                prs.height,
                                block_store_base,
                                self.store.height()
                            );
                            if !self
                                .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                                .await
                            {
                                return;
                            }
                        }
                    }
                    continue;
                }
                self.gossip_data_for_catchup(&prs, &peer_state, &peer).await;
                continue;
            }

            // different height or round: nothing useful to send right now
            if rs.height != prs.height || rs.round != prs.round {
                if !self
                    .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                    .await
                {
                    return;
                }
                continue;
            }

            // share the proposal metadata, then its proof-of-lock
            if let Some(proposal) = &rs.proposal
                && !prs.proposal
            {
                debug!("sending proposal {}/{} to {}", prs.height, prs.round, peer.id());
                let sent = peer
                    .send(Envelope {
                        channel_id: DATA_CHANNEL,
                        payload: Payload::Consensus(ConsensusMessage::Proposal(proposal.clone())),
                    })
                    .await;
                if sent {
                    peer_state.set_has_proposal(proposal);
                }
                if proposal.pol_round >= 0
                    && let Some(pol_prevotes) = rs.votes.prevotes(proposal.pol_round)
                {
                    use crate::types::VoteSetReader;
                    debug!("sending POL {}/{} to {}", prs.height, proposal.pol_round, peer.id());
                    peer.send(Envelope {
                        channel_id: DATA_CHANNEL,
                        payload: Payload::Consensus(ConsensusMessage::ProposalPol(ProposalPol {
                            height: rs.height,
                            proposal_pol_round: proposal.pol_round,
                            proposal_pol: pol_prevotes.bit_array(),
                        })),
                    })
                    .await;
                }
                continue;
            }

            if !self
                .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                .await
            {
                return;
            }
        }
    }

    /// One catch-up iteration: send one stored part the peer is missing.
    async fn gossip_data_for_catchup(
        &self,
        prs: &PeerRoundState,
        peer_state: &PeerState,
        peer: &Arc<dyn Peer>,
    ) {
        let peer_mask = prs
            .proposal_block_parts
            .clone()
            .unwrap_or_else(|| BitArray::new(0));
        if let Some(index) = peer_mask.not().pick_random() {
            // the peer may lag on an orphaned part set; verify the header
            let Some(meta) = self.store.load_block_meta(prs.height) else {
                error!(
                    "failed to load block meta for catch-up at height {} (store {}..={})",
                    prs.height,
                    self.store.base(),
                    self.store.height()
                );
                let _ = self
                    .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                    .await;
                return;
            };
            if meta.block_id.part_set_header != prs.proposal_block_part_set_header {
                info!(
                    "peer {} part-set header mismatch at height {}, sleeping",
                    peer.id(),
                    prs.height
                );
                let _ = self
                    .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                    .await;
                return;
            }
            let Some(part) = self.store.load_block_part(prs.height, index) else {
                error!("could not load part {index} at height {}", prs.height);
                let _ = self
                    .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                    .await;
                return;
            };

            debug!("sending catch-up block part {index} to {}", peer.id());
            let sent = peer
                .send(Envelope {
                    channel_id: DATA_CHANNEL,
                    payload: Payload::Consensus(ConsensusMessage::BlockPart(BlockPart {
                        height: prs.height,
                        round: prs.round,
                        part,
                    })),
                })
                .await;
            if sent {
                peer_state.set_has_proposal_block_part(prs.height, prs.round, index);
            } else {
                debug!("sending catch-up block part to {} failed", peer.id());
                let _ = self
                    .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                    .await;
            }
            return;
        }

        let _ = self
            .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
            .await;
    }

    /// Drives one missing vote at a time towards the peer.
    pub(crate) async fn gossip_votes_routine(
        self: Arc<Self>,
        peer: Arc<dyn Peer>,
        peer_state: Arc<PeerState>,
    ) {
        // damps the "no votes to send" log across idle iterations
        let mut sleeping = 0_u8;

        loop {
            if !self.keeps_running(peer.as_ref()) {
                return;
            }
            self.intraloop_jitter().await;

            let rs = self.round_state();
            let prs = peer_state.get_round_state();

            match sleeping {
                1 => sleeping = 2,
                2 => sleeping = 0,
                _ => {}
            }

            // same height: pick from the live vote sets
            if rs.height == prs.height
                && self.gossip_votes_for_height(&rs, &prs, &peer_state).await
            {
                continue;
            }

            // peer one height behind us: our last commit fills its gap
            if prs.height != 0
                && rs.height == prs.height + 1
                && let Some(last_commit) = &rs.last_commit
                && peer_state.pick_send_vote(last_commit).await
            {
                debug!("picked our last commit to send to {}", peer.id());
                continue;
            }

            // peer in the block-store window: serve the stored commit
            let block_store_base = self.store.base();
            if block_store_base > 0
                && prs.height != 0
                && rs.height >= prs.height + 2
                && prs.height >= block_store_base
                && let Some(commit) = self.load_commit_for_catchup(prs.height)
                && peer_state.pick_send_vote(&commit).await
            {
                debug!("picked catch-up commit at height {} to send to {}", prs.height, peer.id());
                continue;
            }

            if sleeping == 0 {
                sleeping = 1;
                debug!(
                    "no votes to send to {}, sleeping (rs {}/{}, prs {}/{})",
                    peer.id(),
                    rs.height,
                    rs.round,
                    prs.height,
                    prs.round
                );
            } else if sleeping == 2 {
                sleeping = 1;
            }

            if !self
                .gossip_sleep(peer.as_ref(), self.config.peer_gossip_sleep_duration)
                .await
            {
                return;
            }
        }
    }

    /// Tries the vote sources for a peer at our height, most urgent first.
    async fn gossip_votes_for_height(
        &self,
        rs: &RoundState,
        prs: &PeerRoundState,
        peer_state: &PeerState,
    ) -> bool {
        // the peer just entered a new height: send our last commit first
        if prs.step == Step::NewHeight
            && let Some(last_commit) = &rs.last_commit
            && peer_state.pick_send_vote(last_commit).await
        {
            debug!("picked our last commit to send");
            return true;
        }

        // the peer sits before the proposal and lacks proof-of-lock evidence
        if prs.step <= Step::Propose
            && prs.round != -1
            && prs.round <= rs.round
            && prs.proposal_pol_round != -1
            && let Some(pol_prevotes) = rs.votes.prevotes(prs.proposal_pol_round)
            && peer_state.pick_send_vote(pol_prevotes).await
        {
            debug!("picked POL prevotes at round {} to send", prs.proposal_pol_round);
            return true;
        }

        if prs.step <= Step::PrevoteWait && prs.round != -1 && prs.round <= rs.round {
            if let Some(prevotes) = rs.votes.prevotes(prs.round)
                && peer_state.pick_send_vote(prevotes).await
            {
                debug!("picked prevotes at round {} to send", prs.round);
                return true;
            }
        }

        if prs.step <= Step::PrecommitWait && prs.round != -1 && prs.round <= rs.round {
            if let Some(precommits) = rs.votes.precommits(prs.round)
                && peer_state.pick_send_vote(precommits).await
            {
                debug!("picked precommits at round {} to send", prs.round);
                return true;
            }
        }

        // catch-alls for peers in later steps
        if prs.round != -1 && prs.round <= rs.round {
            if let Some(prevotes) = rs.votes.prevotes(prs.round)
                && peer_state.pick_send_vote(prevotes).await
            {
                debug!("picked prevotes at round {} to send", prs.round);
                return true;
            }
        }

        if prs.proposal_pol_round != -1
            && let Some(pol_prevotes) = rs.votes.prevotes(prs.proposal_pol_round)
            && peer_state.pick_send_vote(pol_prevotes).await
        {
            debug!("picked POL prevotes at round {} to send", prs.proposal_pol_round);
            return true;
        }

        false
    }

    /// The stored commit for a height, extended when extensions were enabled.
    fn load_commit_for_catchup(&self, height: Height) -> Option<ExtendedCommit> {
        if self.state.vote_extensions_enabled(height) {
            self.store.load_block_extended_commit(height)
        } else {
            Some(self.store.load_block_commit(height)?.wrapped_extended_commit())
        }
    }

    /// Periodically announces our +2/3 majorities so the peer can answer
    /// with a `VoteSetBits` diff.
    pub(crate) async fn query_maj23_routine(
        self: Arc<Self>,
        peer: Arc<dyn Peer>,
        peer_state: Arc<PeerState>,
    ) {
        loop {
            if !self.keeps_running(peer.as_ref()) {
                return;
            }

            let rs = self.round_state();
            let prs = peer_state.get_round_state();

            if rs.height == prs.height {
                if let Some(maj23) = rs
                    .votes
                    .prevotes(prs.round)
                    .and_then(|votes| votes.two_thirds_majority())
                {
                    peer.try_send(maj23_envelope(VoteSetMaj23 {
                        height: prs.height,
                        round: prs.round,
                        vote_type: SignedMsgType::Prevote,
                        block_id: maj23,
                    }));
                }
                if let Some(maj23) = rs
                    .votes
                    .precommits(prs.round)
                    .and_then(|votes| votes.two_thirds_majority())
                {
                    peer.try_send(maj23_envelope(VoteSetMaj23 {
                        height: prs.height,
                        round: prs.round,
                        vote_type: SignedMsgType::Precommit,
                        block_id: maj23,
                    }));
                }
                if prs.proposal_pol_round >= 0
                    && let Some(maj23) = rs
                        .votes
                        .prevotes(prs.proposal_pol_round)
                        .and_then(|votes| votes.two_thirds_majority())
                {
                    peer.try_send(maj23_envelope(VoteSetMaj23 {
                        height: prs.height,
                        round: prs.proposal_pol_round,
                        vote_type: SignedMsgType::Prevote,
                        block_id: maj23,
                    }));
                }
            }

            // a catching-up peer learns the committed block's majority
            if prs.catchup_commit_round != -1
                && prs.height > 0
                && prs.height <= self.store.height()
                && prs.height >= self.store.base()
                && let Some(commit) = self.store.load_block_commit(prs.height)
            {
                peer.try_send(maj23_envelope(VoteSetMaj23 {
                    height: prs.height,
                    round: commit.round,
                    vote_type: SignedMsgType::Precommit,
                    block_id: commit.block_id,
                }));
            }

            if !self
                .gossip_sleep(peer.as_ref(), self.config.peer_query_maj23_sleep_duration)
                .await
            {
                return;
            }
        }
    }
}

fn maj23_envelope(msg: VoteSetMaj23) -> Envelope {
    Envelope {
        channel_id: STATE_CHANNEL,
        payload: Payload::Consensus(ConsensusMessage::VoteSetMaj23(msg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::Config;
    use crate::consensus::messages::NewRoundStep;
    use crate::consensus::reactor::ConsensusReactor;
    use crate::consensus::state::{ConsensusState, HeightVoteSet, RoundState};
    use crate::p2p::{ChannelPeer, MeshSwitch, PeerId};
    use crate::store::{InMemoryBlockStore, StoredBlock};
    use crate::types::{
        BlockId, BlockIdFlag, BlockMeta, Commit, CommitSig, Part, PartSet, PartSetHeader,
        Proposal, Vote,
    };

    fn fast_config() -> Arc<Config> {
        Arc::new(Config {
            peer_gossip_sleep_duration: Duration::from_millis(5),
            peer_query_maj23_sleep_duration: Duration::from_millis(10),
            peer_catchup_sleep_interval: Duration::from_millis(5),
            round_state_refresh_interval: Duration::from_millis(1),
            ..Config::default()
        })
    }

    fn header_at(tag: u8, total: u32) -> PartSetHeader {
        PartSetHeader {
            total,
            hash: vec![tag; 32],
        }
    }

    fn stored_block(height: crate::Height, total: u32) -> StoredBlock {
        let header = header_at(height as u8, total);
        StoredBlock {
            meta: BlockMeta {
                height,
                block_id: BlockId {
                    hash: vec![height as u8; 32],
                    part_set_header: header,
                },
            },
            parts: (0..total)
                .map(|index| Part {
                    index,
                    bytes: vec![index as u8 + 1; 8],
                })
                .collect(),
            commit: Some(Commit {
                height,
                round: 0,
                block_id: BlockId {
                    hash: vec![height as u8; 32],
                    part_set_header: header_at(height as u8, total),
                },
                signatures: (0..4)
                    .map(|_| CommitSig {
                        flag: BlockIdFlag::Commit,
                        signature: vec![1; 64],
                    })
                    .collect(),
            }),
            extended_commit: None,
        }
    }

    struct Harness {
        reactor: Arc<ConsensusReactor>,
        state: Arc<ConsensusState>,
        switch: Arc<MeshSwitch>,
        store: Arc<InMemoryBlockStore>,
    }

    fn harness(round_state: RoundState) -> Harness {
        crate::logging::init();
        let state = Arc::new(ConsensusState::new(round_state, 1, 4));
        let switch = Arc::new(MeshSwitch::new());
        let store = Arc::new(InMemoryBlockStore::new());
        let reactor = ConsensusReactor::new(
            state.clone(),
            store.clone(),
            switch.clone(),
            fast_config(),
            false,
        );
        Harness {
            reactor,
            state,
            switch,
            store,
        }
    }

    fn join_peer(h: &Harness, id: &str) -> (Arc<dyn Peer>, tokio::sync::mpsc::Receiver<Envelope>) {
        let (peer, rx) = ChannelPeer::new(PeerId::from(id), false, 64);
        let peer: Arc<dyn Peer> = peer;
        h.reactor.init_peer(&peer);
        h.switch.add_peer(peer.clone());
        h.reactor.add_peer(peer.clone());
        (peer, rx)
    }

    fn prime_peer(peer: &Arc<dyn Peer>, height: crate::Height, round: crate::Round, step: Step) {
        let peer_state = peer
            .attributes()
            .get::<crate::consensus::PeerState>()
            .unwrap();
        peer_state.apply_new_round_step(&NewRoundStep {
            height,
            round,
            step,
            seconds_since_start_time: 0,
            last_commit_round: if height > 1 { 0 } else { -1 },
        });
    }

    async fn next_on_channel(
        rx: &mut tokio::sync::mpsc::Receiver<Envelope>,
        channel: crate::p2p::ChannelId,
    ) -> ConsensusMessage {
        loop {
            let envelope = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("peer queue closed");
            if envelope.channel_id == channel {
                let Payload::Consensus(msg) = envelope.payload else {
                    panic!("non-consensus payload");
                };
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn data_loop_sends_missing_block_parts() {
        let mut rs = RoundState::new(5, 4);
        rs.round = 0;
        rs.step = Step::Propose;
        let header = header_at(9, 3);
        let mut parts = PartSet::new_from_header(header.clone());
        for index in 0..3 {
            parts
                .add_part(Part {
                    index,
                    bytes: vec![7; 8],
                })
                .unwrap();
        }
        rs.proposal_block_parts = Some(parts);
        let h = harness(rs);
        h.reactor.start().unwrap();

        let (peer, mut rx) = join_peer(&h, "p0");
        prime_peer(&peer, 5, 0, Step::Propose);
        // the peer announced the same part-set header, holding nothing yet
        let peer_state = peer
            .attributes()
            .get::<crate::consensus::PeerState>()
            .unwrap();
        peer_state.apply_new_valid_block(&crate::consensus::messages::NewValidBlock {
            height: 5,
            round: 0,
            block_part_set_header: header,
            block_parts: BitArray::new(3),
            is_commit: false,
        });

        let mut received = std::collections::BTreeSet::new();
        while received.len() < 3 {
            let msg = next_on_channel(&mut rx, DATA_CHANNEL).await;
            if let ConsensusMessage::BlockPart(bp) = msg {
                assert_eq!(bp.height, 5);
                received.insert(bp.part.index);
            }
        }
        // all three parts arrived, and the peer mask is now full
        let mask = peer_state.get_round_state().proposal_block_parts.unwrap();
        assert_eq!(mask.count_ones(), 3);
        h.reactor.stop();
    }

    #[tokio::test]
    async fn data_loop_serves_catchup_from_the_store() {
        // we are at height 10, the peer at 5, store holds 1..=9
        let h = harness(RoundState::new(10, 4));
        for height in 1..10 {
            h.store.add_block(stored_block(height, 2));
        }
        h.reactor.start().unwrap();

        let (peer, mut rx) = join_peer(&h, "lagger");
        prime_peer(&peer, 5, 0, Step::Propose);

        let mut received = std::collections::BTreeSet::new();
        while received.len() < 2 {
            let msg = next_on_channel(&mut rx, DATA_CHANNEL).await;
            if let ConsensusMessage::BlockPart(bp) = msg {
                assert_eq!(bp.height, 5);
                received.insert(bp.part.index);
            }
        }
        // the one-shot init picked up the header from the stored meta
        let peer_state = peer
            .attributes()
            .get::<crate::consensus::PeerState>()
            .unwrap();
        let prs = peer_state.get_round_state();
        assert_eq!(prs.proposal_block_part_set_header, header_at(5, 2));
        assert_eq!(prs.proposal_block_parts.unwrap().count_ones(), 2);
        h.reactor.stop();
    }

    #[tokio::test]
    async fn data_loop_sends_proposal_and_pol() {
        let mut rs = RoundState::new(5, 4);
        rs.round = 2;
        rs.step = Step::Propose;
        rs.proposal = Some(Proposal {
            height: 5,
            round: 2,
            pol_round: 1,
            block_id: BlockId {
                hash: vec![8; 32],
                part_set_header: header_at(8, 2),
            },
            signature: vec![1; 64],
        });
        // our prevotes for the POL round
        rs.votes = HeightVoteSet::new(5, 4);
        rs.votes
            .add_vote(Vote {
                vote_type: SignedMsgType::Prevote,
                height: 5,
                round: 1,
                block_id: None,
                validator_index: 3,
                signature: vec![1; 64],
                extension: Vec::new(),
            })
            .unwrap();
        let h = harness(rs);
        h.reactor.start().unwrap();

        let (peer, mut rx) = join_peer(&h, "p0");
        prime_peer(&peer, 5, 2, Step::Propose);

        let msg = next_on_channel(&mut rx, DATA_CHANNEL).await;
        let ConsensusMessage::Proposal(proposal) = msg else {
            panic!("expected the proposal first, got {msg}");
        };
        assert_eq!((proposal.height, proposal.round, proposal.pol_round), (5, 2, 1));

        let msg = next_on_channel(&mut rx, DATA_CHANNEL).await;
        let ConsensusMessage::ProposalPol(pol) = msg else {
            panic!("expected the POL after the proposal, got {msg}");
        };
        assert_eq!(pol.proposal_pol_round, 1);
        assert!(pol.proposal_pol.get(3));

        assert!(
            peer.attributes()
                .get::<crate::consensus::PeerState>()
                .unwrap()
                .get_round_state()
                .proposal
        );
        h.reactor.stop();
    }

    #[tokio::test]
    async fn votes_loop_fills_peer_prevote_gaps() {
        let mut rs = RoundState::new(5, 4);
        rs.round = 0;
        rs.step = Step::Prevote;
        for index in 0..3 {
            rs.votes
                .add_vote(Vote {
                    vote_type: SignedMsgType::Prevote,
                    height: 5,
                    round: 0,
                    block_id: None,
                    validator_index: index,
                    signature: vec![1; 64],
                    extension: Vec::new(),
                })
                .unwrap();
        }
        let h = harness(rs);
        h.reactor.start().unwrap();

        let (peer, mut rx) = join_peer(&h, "p0");
        prime_peer(&peer, 5, 0, Step::Prevote);

        let mut got = std::collections::BTreeSet::new();
        while got.len() < 3 {
            let msg = next_on_channel(&mut rx, crate::p2p::VOTE_CHANNEL).await;
            if let ConsensusMessage::Vote(vote) = msg {
                // the mask discipline forbids duplicates
                assert!(got.insert(vote.validator_index));
            }
        }
        h.reactor.stop();
    }

    #[tokio::test]
    async fn votes_loop_serves_stored_commit_to_lagging_peer() {
        // scenario: our height 12, peer at 10, extensions disabled at 10
        let h = harness(RoundState::new(12, 4));
        for height in 1..12 {
            h.store.add_block(stored_block(height, 1));
        }
        h.reactor.start().unwrap();

        let (peer, mut rx) = join_peer(&h, "lagger");
        prime_peer(&peer, 10, 0, Step::Prevote);

        let mut got = std::collections::BTreeSet::new();
        while got.len() < 4 {
            let msg = next_on_channel(&mut rx, crate::p2p::VOTE_CHANNEL).await;
            if let ConsensusMessage::Vote(vote) = msg {
                assert_eq!(vote.height, 10);
                assert_eq!(vote.vote_type, SignedMsgType::Precommit);
                // wrapped from the plain commit: no extension data
                assert!(vote.extension.is_empty());
                assert!(got.insert(vote.validator_index));
            }
        }
        h.reactor.stop();
    }

    #[tokio::test]
    async fn maj23_loop_announces_majorities() {
        let mut rs = RoundState::new(5, 4);
        rs.round = 0;
        rs.step = Step::Prevote;
        let block = BlockId {
            hash: vec![6; 32],
            part_set_header: header_at(6, 1),
        };
        for index in 0..3 {
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
        let h = harness(rs);
        h.reactor.start().unwrap();

        let (peer, mut rx) = join_peer(&h, "p0");
        prime_peer(&peer, 5, 0, Step::Prevote);

        loop {
            let msg = next_on_channel(&mut rx, STATE_CHANNEL).await;
            if let ConsensusMessage::VoteSetMaj23(maj) = msg {
                assert_eq!(maj.height, 5);
                assert_eq!(maj.vote_type, SignedMsgType::Prevote);
                assert_eq!(maj.block_id, block);
                break;
            }
        }
        h.reactor.stop();
    }
}
