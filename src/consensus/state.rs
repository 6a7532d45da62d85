// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The consensus state machine as the reactor consumes it.
//!
//! The state machine itself (height/round/step transitions, proposal
//! creation, commit rules) lives outside this crate. [`ConsensusState`] is
//! the seam: a lockable [`RoundState`] snapshot, an inbox for peer messages,
//! a stats queue, and an event bus the reactor fans out to all peers.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use color_eyre::eyre::eyre;
use log::trace;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::consensus::messages::{ConsensusMessage, NewRoundStep};
use crate::p2p::PeerId;
use crate::types::{BitArray, BlockId, PartSet, Proposal, SignedMsgType, Vote, VoteSet};
use crate::types::vote::VoteSetError;
use crate::{Height, Round};

/// Phase within a consensus round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Step {
    NewHeight,
    NewRound,
    Propose,
    Prevote,
    PrevoteWait,
    Precommit,
    PrecommitWait,
    Commit,
}

/// Votes for one height, organized per round.
#[derive(Clone, Debug)]
pub struct HeightVoteSet {
    height: Height,
    num_validators: usize,
    rounds: BTreeMap<Round, RoundVotes>,
}

#[derive(Clone, Debug)]
struct RoundVotes {
    prevotes: VoteSet,
    precommits: VoteSet,
}

impl HeightVoteSet {
    #[must_use]
    pub fn new(height: Height, num_validators: usize) -> Self {
        Self {
            height,
            num_validators,
            rounds: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn height(&self) -> Height {
        self.height
    }

    #[must_use]
    pub fn prevotes(&self, round: Round) -> Option<&VoteSet> {
        self.rounds.get(&round).map(|r| &r.prevotes)
    }

    #[must_use]
    pub fn precommits(&self, round: Round) -> Option<&VoteSet> {
        self.rounds.get(&round).map(|r| &r.precommits)
    }

    /// Allocates the vote sets for `round` if missing.
    pub fn ensure_round(&mut self, round: Round) {
        if round < 0 {
            return;
        }
        let (height, n) = (self.height, self.num_validators);
        self.rounds.entry(round).or_insert_with(|| RoundVotes {
            prevotes: VoteSet::new(height, round, SignedMsgType::Prevote, n),
            precommits: VoteSet::new(height, round, SignedMsgType::Precommit, n),
        });
    }

    /// Adds one of our observed votes.
    ///
    /// # Errors
    ///
    /// Propagates [`VoteSetError`] from the underlying vote set.
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool, VoteSetError> {
        if vote.height != self.height || vote.round < 0 {
            return Err(VoteSetError::WrongSet);
        }
        self.ensure_round(vote.round);
        let round = self
            .rounds
            .get_mut(&vote.round)
            .expect("round just ensured");
        match vote.vote_type {
            SignedMsgType::Prevote => round.prevotes.add_vote(vote),
            SignedMsgType::Precommit => round.precommits.add_vote(vote),
        }
    }

    /// Records a peer's +2/3 claim on the given (round, type, block).
    ///
    /// # Errors
    ///
    /// Returns [`VoteSetError::ConflictingMaj23`] if the peer contradicted an
    /// earlier claim of its own.
    pub fn set_peer_maj23(
        &mut self,
        round: Round,
        vote_type: SignedMsgType,
        peer: PeerId,
        block_id: BlockId,
    ) -> Result<(), VoteSetError> {
        if round < 0 {
            return Ok(());
        }
        self.ensure_round(round);
        let votes = self.rounds.get_mut(&round).expect("round just ensured");
        match vote_type {
            SignedMsgType::Prevote => votes.prevotes.set_peer_maj23(peer, block_id),
            SignedMsgType::Precommit => votes.precommits.set_peer_maj23(peer, block_id),
        }
    }

    /// Our vote mask for (round, type) restricted to one block id.
    #[must_use]
    pub fn bit_array_by_block_id(
        &self,
        round: Round,
        vote_type: SignedMsgType,
        block_id: &BlockId,
    ) -> Option<BitArray> {
        let votes = self.rounds.get(&round)?;
        match vote_type {
            SignedMsgType::Prevote => votes.prevotes.bit_array_by_block_id(block_id),
            SignedMsgType::Precommit => votes.precommits.bit_array_by_block_id(block_id),
        }
    }
}

/// Snapshot of the consensus state machine's current round.
#[derive(Clone, Debug)]
pub struct RoundState {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    /// When this height started, for `NewRoundStep` announcements.
    pub start_time: Instant,
    pub proposal: Option<Proposal>,
    pub proposal_block_parts: Option<PartSet>,
    pub votes: HeightVoteSet,
    /// Precommits that sealed the previous height.
    pub last_commit: Option<VoteSet>,
}

impl RoundState {
    /// A fresh round state at the given height.
    #[must_use]
    pub fn new(height: Height, num_validators: usize) -> Self {
        Self {
            height,
            round: 0,
            step: Step::NewHeight,
            start_time: Instant::now(),
            proposal: None,
            proposal_block_parts: None,
            votes: HeightVoteSet::new(height, num_validators),
            last_commit: None,
        }
    }

    /// Round of our last commit, `-1` at the initial height.
    #[must_use]
    pub fn last_commit_round(&self) -> Round {
        use crate::types::VoteSetReader;
        self.last_commit.as_ref().map_or(-1, VoteSetReader::round)
    }

    /// The `NewRoundStep` announcement describing this state.
    #[must_use]
    pub fn new_round_step(&self) -> NewRoundStep {
        NewRoundStep {
            height: self.height,
            round: self.round,
            step: self.step,
            seconds_since_start_time: i64::try_from(self.start_time.elapsed().as_secs())
                .unwrap_or(i64::MAX),
            last_commit_round: self.last_commit_round(),
        }
    }
}

/// Events published by the consensus machine for reactor fan-out.
#[derive(Clone, Debug)]
pub enum StateEvent {
    NewRoundStep(Box<RoundState>),
    ValidBlock(Box<RoundState>),
    Vote(Vote),
    ProposalBlockPart {
        height: Height,
        round: Round,
        index: u32,
    },
}

/// A consensus message attributed to the peer that sent it.
#[derive(Clone, Debug)]
pub struct PeerMessage {
    pub peer_id: PeerId,
    pub message: ConsensusMessage,
}

struct StateInner {
    round_state: RoundState,
    initial_height: Height,
    num_validators: usize,
    /// Height from which vote extensions are enabled, if ever.
    vote_extensions_from: Option<Height>,
}

/// Handle to the external consensus state machine.
pub struct ConsensusState {
    inner: Mutex<StateInner>,
    peer_msg_tx: mpsc::Sender<PeerMessage>,
    peer_msg_rx: Mutex<Option<mpsc::Receiver<PeerMessage>>>,
    stats_tx: mpsc::Sender<PeerMessage>,
    stats_rx: Mutex<Option<mpsc::Receiver<PeerMessage>>>,
    events: broadcast::Sender<StateEvent>,
    running: AtomicBool,
}

impl ConsensusState {
    #[must_use]
    pub fn new(round_state: RoundState, initial_height: Height, num_validators: usize) -> Self {
        let (peer_msg_tx, peer_msg_rx) = mpsc::channel(1024);
        let (stats_tx, stats_rx) = mpsc::channel(1024);
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(StateInner {
                round_state,
                initial_height,
                num_validators,
                vote_extensions_from: None,
            }),
            peer_msg_tx,
            peer_msg_rx: Mutex::new(Some(peer_msg_rx)),
            stats_tx,
            stats_rx: Mutex::new(Some(stats_rx)),
            events,
            running: AtomicBool::new(false),
        }
    }

    /// Defensive copy of the current round state.
    #[must_use]
    pub fn get_round_state(&self) -> RoundState {
        self.inner.lock().expect("state lock poisoned").round_state.clone()
    }

    /// Write side of the round state, for the state machine (and tests).
    pub fn set_round_state(&self, round_state: RoundState) {
        self.inner.lock().expect("state lock poisoned").round_state = round_state;
    }

    /// Reads parts of the round state under the state lock.
    pub fn with_round_state<R>(&self, f: impl FnOnce(&RoundState) -> R) -> R {
        f(&self.inner.lock().expect("state lock poisoned").round_state)
    }

    /// Mutates parts of the round state under the state lock.
    pub fn with_round_state_mut<R>(&self, f: impl FnOnce(&mut RoundState) -> R) -> R {
        f(&mut self.inner.lock().expect("state lock poisoned").round_state)
    }

    #[must_use]
    pub fn height(&self) -> Height {
        self.inner.lock().expect("state lock poisoned").round_state.height
    }

    #[must_use]
    pub fn initial_height(&self) -> Height {
        self.inner.lock().expect("state lock poisoned").initial_height
    }

    #[must_use]
    pub fn validators_size(&self) -> usize {
        self.inner.lock().expect("state lock poisoned").num_validators
    }

    /// Cardinality of the validator set that produced our last commit.
    #[must_use]
    pub fn last_commit_size(&self) -> usize {
        use crate::types::VoteSetReader;
        let inner = self.inner.lock().expect("state lock poisoned");
        inner
            .round_state
            .last_commit
            .as_ref()
            .map_or(inner.num_validators, VoteSetReader::len)
    }

    /// Whether vote extensions are enabled at the given height.
    #[must_use]
    pub fn vote_extensions_enabled(&self, height: Height) -> bool {
        self.inner
            .lock()
            .expect("state lock poisoned")
            .vote_extensions_from
            .is_some_and(|from| height >= from)
    }

    pub fn set_vote_extensions_from(&self, height: Option<Height>) {
        self.inner.lock().expect("state lock poisoned").vote_extensions_from = height;
    }

    /// Publishes an event to all reactor subscribers.
    pub fn publish(&self, event: StateEvent) {
        if self.events.send(event).is_err() {
            trace!("no subscribers for consensus event");
        }
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Inbox for Proposal/ProposalPol/BlockPart/Vote messages from peers.
    #[must_use]
    pub fn peer_msg_sender(&self) -> mpsc::Sender<PeerMessage> {
        self.peer_msg_tx.clone()
    }

    /// The receiving half of the peer inbox; the state machine takes it once.
    pub fn take_peer_msg_queue(&self) -> Option<mpsc::Receiver<PeerMessage>> {
        self.peer_msg_rx.lock().expect("state lock poisoned").take()
    }

    /// Queue of received messages feeding the peer-statistics task.
    #[must_use]
    pub fn stats_sender(&self) -> mpsc::Sender<PeerMessage> {
        self.stats_tx.clone()
    }

    pub fn take_stats_queue(&self) -> Option<mpsc::Receiver<PeerMessage>> {
        self.stats_rx.lock().expect("state lock poisoned").take()
    }

    /// Starts the state machine.
    ///
    /// # Errors
    ///
    /// Fails when the machine is already running.
    pub fn start(&self) -> color_eyre::Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(eyre!("consensus state already running"));
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
