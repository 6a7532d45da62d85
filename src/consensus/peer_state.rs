// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-peer view of the consensus protocol.
//!
//! [`PeerState`] mirrors what one peer is believed to know: its round
//! coordinates, which proposal parts it holds, and bit masks of the votes it
//! has seen. The receive path applies the peer's own announcements; the send
//! path records what we successfully delivered. Both funnel through one
//! mutex, and [`PeerState::get_round_state`] hands out defensive copies.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::trace;

use crate::consensus::messages::{
    HasProposalBlockPart, HasVote, NewRoundStep, NewValidBlock, ProposalPol, VoteSetBits,
};
use crate::consensus::state::Step;
use crate::p2p::{Envelope, Payload, Peer, VOTE_CHANNEL};
use crate::types::{BitArray, PartSetHeader, Proposal, SignedMsgType, Vote, VoteSetReader};
use crate::{Height, Round, ValidatorIndex};

use crate::consensus::ConsensusMessage;

/// Orders two (height, round, step) triples.
#[must_use]
pub fn compare_hrs(
    h1: Height,
    r1: Round,
    s1: Step,
    h2: Height,
    r2: Round,
    s2: Step,
) -> Ordering {
    (h1, r1, s1).cmp(&(h2, r2, s2))
}

/// What we know about a peer's consensus state.
#[derive(Clone, Debug)]
pub struct PeerRoundState {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    /// Estimate of when the peer entered its current round.
    pub start_time: Option<Instant>,
    /// Whether the peer holds the proposal for (height, round).
    pub proposal: bool,
    pub proposal_block_part_set_header: PartSetHeader,
    pub proposal_block_parts: Option<BitArray>,
    /// Proposal's proof-of-lock round, `-1` if none.
    pub proposal_pol_round: Round,
    /// `None` until a `ProposalPol` message arrives.
    pub proposal_pol: Option<BitArray>,
    pub prevotes: Option<BitArray>,
    pub precommits: Option<BitArray>,
    pub last_commit_round: Round,
    /// Peer's precommits from the previous height.
    pub last_commit: Option<BitArray>,
    /// Round we believe a commit exists for, if the peer is catching up.
    pub catchup_commit_round: Round,
    pub catchup_commit: Option<BitArray>,
}

impl Default for PeerRoundState {
    fn default() -> Self {
        Self {
            height: 0,
            round: -1,
            step: Step::NewHeight,
            start_time: None,
            proposal: false,
            proposal_block_part_set_header: PartSetHeader::zero(),
            proposal_block_parts: None,
            proposal_pol_round: -1,
            proposal_pol: None,
            prevotes: None,
            precommits: None,
            last_commit_round: -1,
            last_commit: None,
            catchup_commit_round: -1,
            catchup_commit: None,
        }
    }
}

impl PeerRoundState {
    /// The bit mask tracking the peer's votes for (height, round, type).
    ///
    /// Returns `None` for combinations we keep no mask for; callers treat
    /// that as a no-op.
    fn vote_bit_array_mut(
        &mut self,
        height: Height,
        round: Round,
        vote_type: SignedMsgType,
    ) -> Option<&mut BitArray> {
        if self.height == height {
            if self.round == round {
                return match vote_type {
                    SignedMsgType::Prevote => self.prevotes.as_mut(),
                    SignedMsgType::Precommit => self.precommits.as_mut(),
                };
            }
            if self.catchup_commit_round == round {
                return match vote_type {
                    SignedMsgType::Prevote => None,
                    SignedMsgType::Precommit => self.catchup_commit.as_mut(),
                };
            }
            if self.proposal_pol_round == round {
                return match vote_type {
                    SignedMsgType::Prevote => self.proposal_pol.as_mut(),
                    SignedMsgType::Precommit => None,
                };
            }
            return None;
        }
        if self.height == height + 1 {
            if self.last_commit_round == round {
                return match vote_type {
                    SignedMsgType::Prevote => None,
                    SignedMsgType::Precommit => self.last_commit.as_mut(),
                };
            }
            return None;
        }
        None
    }

    fn set_has_vote(&mut self, height: Height, round: Round, vote_type: SignedMsgType, index: ValidatorIndex) {
        trace!(
            "set_has_vote: peer at {}/{}, vote {height}/{round}/{vote_type} index {index}",
            self.height, self.round
        );
        // some masks may be unallocated, in which case this is a no-op
        if let Some(mask) = self.vote_bit_array_mut(height, round, vote_type)
            && let Ok(index) = usize::try_from(index)
        {
            mask.set(index, true);
        }
    }

    fn set_has_proposal_block_part(&mut self, height: Height, round: Round, index: usize) {
        if self.height != height || self.round != round {
            return;
        }
        if let Some(parts) = self.proposal_block_parts.as_mut() {
            parts.set(index, true);
        }
    }

    /// Lazily allocates the vote bit masks for `height`.
    ///
    /// Must run before recording any vote bit for that height; the caller is
    /// responsible for `num_validators` matching the height's validator set.
    fn ensure_vote_bit_arrays(&mut self, height: Height, num_validators: usize) {
        if self.height == height {
            self.prevotes
                .get_or_insert_with(|| BitArray::new(num_validators));
            self.precommits
                .get_or_insert_with(|| BitArray::new(num_validators));
            self.catchup_commit
                .get_or_insert_with(|| BitArray::new(num_validators));
            self.proposal_pol
                .get_or_insert_with(|| BitArray::new(num_validators));
        } else if self.height == height + 1 {
            self.last_commit
                .get_or_insert_with(|| BitArray::new(num_validators));
        }
    }

    /// Records the round we have a +2/3 commit for at the peer's height.
    fn ensure_catchup_commit_round(&mut self, height: Height, round: Round, num_validators: usize) {
        if self.height != height {
            return;
        }
        if self.catchup_commit_round == round {
            return;
        }
        self.catchup_commit_round = round;
        if round == self.round {
            self.catchup_commit = self.precommits.clone();
        } else {
            self.catchup_commit = Some(BitArray::new(num_validators));
        }
    }
}

/// Running totals of useful traffic received from the peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub votes: u64,
    pub block_parts: u64,
}

struct PeerStateInner {
    prs: PeerRoundState,
    stats: PeerStats,
}

/// A peer's round state plus statistics, shared between all loops.
pub struct PeerState {
    peer: Arc<dyn Peer>,
    inner: Mutex<PeerStateInner>,
}

impl PeerState {
    #[must_use]
    pub fn new(peer: Arc<dyn Peer>) -> Self {
        Self {
            peer,
            inner: Mutex::new(PeerStateInner {
                prs: PeerRoundState::default(),
                stats: PeerStats::default(),
            }),
        }
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    /// Defensive copy of the peer's round state.
    #[must_use]
    pub fn get_round_state(&self) -> PeerRoundState {
        self.inner.lock().expect("peer state lock poisoned").prs.clone()
    }

    #[must_use]
    pub fn height(&self) -> Height {
        self.inner.lock().expect("peer state lock poisoned").prs.height
    }

    /// Marks the proposal as known to the peer after a successful send.
    pub fn set_has_proposal(&self, proposal: &Proposal) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;
        if prs.height != proposal.height || prs.round != proposal.round {
            return;
        }
        if prs.proposal {
            return;
        }
        prs.proposal = true;

        // already set by a NewValidBlock announcement
        if prs.proposal_block_parts.is_some() {
            return;
        }
        prs.proposal_block_part_set_header = proposal.block_id.part_set_header.clone();
        prs.proposal_block_parts =
            Some(BitArray::new(proposal.block_id.part_set_header.total as usize));
        prs.proposal_pol_round = proposal.pol_round;
        prs.proposal_pol = None; // until a ProposalPol message arrives
    }

    /// One-shot initialization of the peer's part mask during catch-up.
    pub fn init_proposal_block_parts(&self, header: PartSetHeader) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;
        if prs.proposal_block_parts.is_some() {
            return;
        }
        prs.proposal_block_parts = Some(BitArray::new(header.total as usize));
        prs.proposal_block_part_set_header = header;
    }

    /// Marks a block part as held by the peer (sent by us or announced).
    pub fn set_has_proposal_block_part(&self, height: Height, round: Round, index: usize) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        inner.prs.set_has_proposal_block_part(height, round, index);
    }

    /// Picks one vote the peer is missing and sends it.
    ///
    /// Returns `true` iff a vote was sent; the peer's mask is updated on
    /// success only.
    pub async fn pick_send_vote(&self, votes: &dyn VoteSetReader) -> bool {
        let Some(vote) = self.pick_vote_to_send(votes) else {
            return false;
        };
        trace!("sending vote {}/{} to {}", vote.height, vote.round, self.peer.id());
        let envelope = Envelope {
            channel_id: VOTE_CHANNEL,
            payload: Payload::Consensus(ConsensusMessage::Vote(vote.clone())),
        };
        if self.peer.send(envelope).await {
            self.set_has_vote(&vote);
            return true;
        }
        false
    }

    fn pick_vote_to_send(&self, votes: &dyn VoteSetReader) -> Option<Vote> {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;
        if votes.is_empty() {
            return None;
        }
        let (height, round, vote_type, size) =
            (votes.height(), votes.round(), votes.vote_type(), votes.len());

        // lazily set data using the vote set's coordinates
        if votes.is_commit() {
            prs.ensure_catchup_commit_round(height, round, size);
        }
        prs.ensure_vote_bit_arrays(height, size);

        let peer_mask = prs.vote_bit_array_mut(height, round, vote_type)?;
        let index = votes.bit_array().sub(peer_mask).pick_random()?;
        votes.get_by_index(ValidatorIndex::try_from(index).ok()?)
    }

    /// Lazily allocates vote bit masks for `height`, sized to its validators.
    pub fn ensure_vote_bit_arrays(&self, height: Height, num_validators: usize) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        inner.prs.ensure_vote_bit_arrays(height, num_validators);
    }

    /// Marks a vote as known to the peer.
    pub fn set_has_vote(&self, vote: &Vote) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        inner
            .prs
            .set_has_vote(vote.height, vote.round, vote.vote_type, vote.validator_index);
    }

    /// Counts one received vote; returns the running total.
    pub fn record_vote(&self) -> u64 {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        inner.stats.votes += 1;
        inner.stats.votes
    }

    #[must_use]
    pub fn votes_sent(&self) -> u64 {
        self.inner.lock().expect("peer state lock poisoned").stats.votes
    }

    /// Counts one received block part; returns the running total.
    pub fn record_block_part(&self) -> u64 {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        inner.stats.block_parts += 1;
        inner.stats.block_parts
    }

    #[must_use]
    pub fn block_parts_sent(&self) -> u64 {
        self.inner.lock().expect("peer state lock poisoned").stats.block_parts
    }

    /// Applies the peer's own height/round/step announcement.
    pub fn apply_new_round_step(&self, msg: &NewRoundStep) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;

        // ignore duplicates and decreases
        if compare_hrs(msg.height, msg.round, msg.step, prs.height, prs.round, prs.step)
            != Ordering::Greater
        {
            return;
        }

        let ps_height = prs.height;
        let ps_round = prs.round;
        let ps_catchup_commit_round = prs.catchup_commit_round;
        let ps_catchup_commit = prs.catchup_commit.clone();
        let last_precommits = prs.precommits.clone();

        prs.height = msg.height;
        prs.round = msg.round;
        prs.step = msg.step;
        prs.start_time = if msg.seconds_since_start_time >= 0 {
            now.checked_sub(Duration::from_secs(msg.seconds_since_start_time as u64))
        } else {
            now.checked_add(Duration::from_secs(msg.seconds_since_start_time.unsigned_abs()))
        };

        if ps_height != msg.height || ps_round != msg.round {
            prs.proposal = false;
            prs.proposal_block_part_set_header = PartSetHeader::zero();
            prs.proposal_block_parts = None;
            prs.proposal_pol_round = -1;
            prs.proposal_pol = None;
            // bit mask capacities are re-ensured later
            prs.prevotes = None;
            prs.precommits = None;
        }
        if ps_height == msg.height && ps_round != msg.round && msg.round == ps_catchup_commit_round
        {
            // the peer caught up to the round we hold a commit for; its
            // precommit mask is exactly the catch-up commit mask
            prs.precommits = ps_catchup_commit;
        }
        if ps_height != msg.height {
            // shift precommits to last commit
            if ps_height + 1 == msg.height && ps_round == msg.last_commit_round {
                prs.last_commit_round = msg.last_commit_round;
                prs.last_commit = last_precommits;
            } else {
                prs.last_commit_round = msg.last_commit_round;
                prs.last_commit = None;
            }
            prs.catchup_commit_round = -1;
            prs.catchup_commit = None;
        }
    }

    /// Applies a peer's announcement of a valid block.
    pub fn apply_new_valid_block(&self, msg: &NewValidBlock) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;
        if prs.height != msg.height {
            return;
        }
        if prs.round != msg.round && !msg.is_commit {
            return;
        }
        prs.proposal_block_part_set_header = msg.block_part_set_header.clone();
        prs.proposal_block_parts = Some(msg.block_parts.clone());
    }

    /// Applies the peer's prevote mask for the proposal's POL round.
    pub fn apply_proposal_pol(&self, msg: &ProposalPol) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;
        if prs.height != msg.height {
            return;
        }
        if prs.proposal_pol_round != msg.proposal_pol_round {
            return;
        }
        // TODO: merge onto the existing mask? we might have sent prevotes
        prs.proposal_pol = Some(msg.proposal_pol.clone());
    }

    /// Applies a peer's announcement that it holds a vote.
    pub fn apply_has_vote(&self, msg: &HasVote) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;
        if prs.height != msg.height {
            return;
        }
        prs.set_has_vote(msg.height, msg.round, msg.vote_type, msg.index);
    }

    /// Applies a peer's announcement that it holds a block part.
    pub fn apply_has_proposal_block_part(&self, msg: &HasProposalBlockPart) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let prs = &mut inner.prs;
        if prs.height != msg.height {
            return;
        }
        let Ok(index) = usize::try_from(msg.index) else {
            return;
        };
        prs.set_has_proposal_block_part(msg.height, msg.round, index);
    }

    /// Merges a peer's vote mask reply into our view of it.
    ///
    /// With `our_votes` given (heights matched), the stored mask becomes
    /// `(mask − ours) ∪ msg.votes`; otherwise the reply replaces it.
    pub fn apply_vote_set_bits(&self, msg: &VoteSetBits, our_votes: Option<&BitArray>) {
        let mut inner = self.inner.lock().expect("peer state lock poisoned");
        let Some(mask) = inner
            .prs
            .vote_bit_array_mut(msg.height, msg.round, msg.vote_type)
        else {
            return;
        };
        match our_votes {
            None => mask.update(&msg.votes),
            Some(ours) => {
                let other_votes = mask.sub(ours);
                let has_votes = other_votes.or(&msg.votes);
                mask.update(&has_votes);
            }
        }
    }
}
