// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Votes, vote sets, and stored commits.
//!
//! [`VoteSetReader`] is the seam the vote-dissemination loop works against:
//! live [`VoteSet`]s and stored [`ExtendedCommit`]s expose the same bit-mask
//! view, so picking "one vote the peer is missing" is uniform across the
//! current height and catch-up.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::p2p::PeerId;
use crate::types::{BitArray, BlockId, ValidationError};
use crate::{Height, Round, ValidatorIndex};

/// Upper bound on the validator-set cardinality, and thus on vote bit-arrays.
pub const MAX_VOTES_COUNT: usize = 10_000;
/// Upper bound on signature size.
pub const MAX_SIGNATURE_SIZE: usize = 64;

/// The two signed vote kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignedMsgType {
    Prevote,
    Precommit,
}

impl fmt::Display for SignedMsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prevote => write!(f, "prevote"),
            Self::Precommit => write!(f, "precommit"),
        }
    }
}

/// A signed vote as produced by a validator.
///
/// Signature verification belongs to the consensus state machine; this layer
/// only moves votes around and checks structure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_type: SignedMsgType,
    pub height: Height,
    pub round: Round,
    /// `None` encodes the nil vote.
    pub block_id: Option<BlockId>,
    pub validator_index: ValidatorIndex,
    pub signature: Vec<u8>,
    /// Vote extension, empty when extensions are disabled.
    pub extension: Vec<u8>,
}

impl Vote {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        if self.validator_index < 0 {
            return Err(ValidationError::Negative("validator_index"));
        }
        if self.signature.is_empty() {
            return Err(ValidationError::Required("signature"));
        }
        if self.signature.len() > MAX_SIGNATURE_SIZE {
            return Err(ValidationError::invalid(
                "signature",
                format!("{} bytes exceed the maximum {MAX_SIGNATURE_SIZE}", self.signature.len()),
            ));
        }
        if let Some(block_id) = &self.block_id {
            block_id.validate()?;
        }
        Ok(())
    }
}

/// Uniform read access over anything that collects votes by validator index.
pub trait VoteSetReader: Send + Sync {
    fn height(&self) -> Height;
    fn round(&self) -> Round;
    fn vote_type(&self) -> SignedMsgType;
    /// Validator-set cardinality this collection is sized to.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Mask of validator indices that have voted.
    fn bit_array(&self) -> BitArray;
    fn get_by_index(&self, index: ValidatorIndex) -> Option<Vote>;
    /// `true` for commits and vote sets that reached a +2/3 majority.
    fn is_commit(&self) -> bool;
}

/// Errors adding votes or majority claims to a [`VoteSet`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VoteSetError {
    #[error("vote does not match this set's (height, round, type)")]
    WrongSet,
    #[error("validator index out of range")]
    IndexOutOfRange,
    #[error("conflicting vote from validator {0}")]
    ConflictingVote(ValidatorIndex),
    #[error("peer {0} announced conflicting +2/3 majorities")]
    ConflictingMaj23(PeerId),
}

/// Collection of votes for one (height, round, type).
#[derive(Clone, Debug)]
pub struct VoteSet {
    height: Height,
    round: Round,
    vote_type: SignedMsgType,
    num_validators: usize,
    votes: Vec<Option<Vote>>,
    votes_mask: BitArray,
    /// Votes per block id; nil votes tally under [`BlockId::zero`].
    by_block: HashMap<BlockId, BitArray>,
    maj23: Option<BlockId>,
    peer_maj23s: HashMap<PeerId, BlockId>,
}

impl VoteSet {
    #[must_use]
    pub fn new(
        height: Height,
        round: Round,
        vote_type: SignedMsgType,
        num_validators: usize,
    ) -> Self {
        Self {
            height,
            round,
            vote_type,
            num_validators,
            votes: vec![None; num_validators],
            votes_mask: BitArray::new(num_validators),
            by_block: HashMap::new(),
            maj23: None,
            peer_maj23s: HashMap::new(),
        }
    }

    /// Adds a vote. Returns `false` for exact duplicates.
    ///
    /// # Errors
    ///
    /// Rejects votes for a different (height, round, type), out-of-range
    /// validator indices, and conflicting votes from the same validator.
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool, VoteSetError> {
        if vote.height != self.height || vote.round != self.round || vote.vote_type != self.vote_type
        {
            return Err(VoteSetError::WrongSet);
        }
        let index = vote.validator_index;
        if index < 0 || index as usize >= self.num_validators {
            return Err(VoteSetError::IndexOutOfRange);
        }
        if let Some(existing) = &self.votes[index as usize] {
            if existing.block_id == vote.block_id {
                return Ok(false);
            }
            return Err(VoteSetError::ConflictingVote(index));
        }

        let block_key = vote.block_id.clone().unwrap_or_else(BlockId::zero);
        self.votes[index as usize] = Some(vote);
        self.votes_mask.set(index as usize, true);
        let tally = self
            .by_block
            .entry(block_key.clone())
            .or_insert_with(|| BitArray::new(self.num_validators));
        tally.set(index as usize, true);
        if self.maj23.is_none() && tally.count_ones() * 3 > self.num_validators * 2 {
            self.maj23 = Some(block_key);
        }
        Ok(true)
    }

    /// The block id that gathered a +2/3 majority, if any.
    #[must_use]
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        self.maj23.clone()
    }

    /// Mask of validators that voted for the given block id.
    #[must_use]
    pub fn bit_array_by_block_id(&self, block_id: &BlockId) -> Option<BitArray> {
        self.by_block.get(block_id).cloned()
    }

    /// Records a peer's claim that `block_id` has a +2/3 majority.
    ///
    /// # Errors
    ///
    /// Returns [`VoteSetError::ConflictingMaj23`] if the same peer claimed a
    /// different block id before.
    pub fn set_peer_maj23(&mut self, peer: PeerId, block_id: BlockId) -> Result<(), VoteSetError> {
        if let Some(existing) = self.peer_maj23s.get(&peer) {
            if *existing == block_id {
                return Ok(());
            }
            return Err(VoteSetError::ConflictingMaj23(peer));
        }
        self.peer_maj23s.insert(peer, block_id);
        Ok(())
    }
}

impl VoteSetReader for VoteSet {
    fn height(&self) -> Height {
        self.height
    }

    fn round(&self) -> Round {
        self.round
    }

    fn vote_type(&self) -> SignedMsgType {
        self.vote_type
    }

    fn len(&self) -> usize {
        self.num_validators
    }

    fn bit_array(&self) -> BitArray {
        self.votes_mask.clone()
    }

    fn get_by_index(&self, index: ValidatorIndex) -> Option<Vote> {
        self.votes.get(usize::try_from(index).ok()?)?.clone()
    }

    fn is_commit(&self) -> bool {
        self.vote_type == SignedMsgType::Precommit && self.maj23.is_some()
    }
}

/// Whether a commit signature voted for the block, nil, or not at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockIdFlag {
    Absent,
    Commit,
    Nil,
}

/// One validator's slot in a stored commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    pub flag: BlockIdFlag,
    pub signature: Vec<u8>,
}

/// The +2/3 precommits that sealed a block, as persisted in the block store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub height: Height,
    pub round: Round,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// Wraps this commit as an [`ExtendedCommit`] with empty extensions,
    /// for heights where vote extensions are disabled.
    #[must_use]
    pub fn wrapped_extended_commit(&self) -> ExtendedCommit {
        ExtendedCommit {
            height: self.height,
            round: self.round,
            block_id: self.block_id.clone(),
            signatures: self
                .signatures
                .iter()
                .map(|sig| ExtendedCommitSig {
                    flag: sig.flag,
                    signature: sig.signature.clone(),
                    extension: Vec::new(),
                })
                .collect(),
        }
    }
}

/// One validator's slot in an extended commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedCommitSig {
    pub flag: BlockIdFlag,
    pub signature: Vec<u8>,
    pub extension: Vec<u8>,
}

/// A stored commit including vote extensions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedCommit {
    pub height: Height,
    pub round: Round,
    pub block_id: BlockId,
    pub signatures: Vec<ExtendedCommitSig>,
}

impl VoteSetReader for ExtendedCommit {
    fn height(&self) -> Height {
        self.height
    }

    fn round(&self) -> Round {
        self.round
    }

    fn vote_type(&self) -> SignedMsgType {
        SignedMsgType::Precommit
    }

    fn len(&self) -> usize {
        self.signatures.len()
    }

    fn bit_array(&self) -> BitArray {
        let mut mask = BitArray::new(self.signatures.len());
        for (i, sig) in self.signatures.iter().enumerate() {
            mask.set(i, sig.flag != BlockIdFlag::Absent);
        }
        mask
    }

    fn get_by_index(&self, index: ValidatorIndex) -> Option<Vote> {
        let sig = self.signatures.get(usize::try_from(index).ok()?)?;
        let block_id = match sig.flag {
            BlockIdFlag::Absent => return None,
            BlockIdFlag::Commit => Some(self.block_id.clone()),
            BlockIdFlag::Nil => None,
        };
        Some(Vote {
            vote_type: SignedMsgType::Precommit,
            height: self.height,
            round: self.round,
            block_id,
            validator_index: index,
            signature: sig.signature.clone(),
            extension: sig.extension.clone(),
        })
    }

    fn is_commit(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartSetHeader;

    fn block_id(tag: u8) -> BlockId {
        BlockId {
            hash: vec![tag; 32],
            part_set_header: PartSetHeader {
                total: 1,
                hash: vec![tag; 32],
            },
        }
    }

    fn vote(index: ValidatorIndex, block: Option<BlockId>) -> Vote {
        Vote {
            vote_type: SignedMsgType::Prevote,
            height: 5,
            round: 0,
            block_id: block,
            validator_index: index,
            signature: vec![1; 64],
            extension: Vec::new(),
        }
    }

    #[test]
    fn majority_requires_two_thirds() {
        let mut set = VoteSet::new(5, 0, SignedMsgType::Prevote, 4);
        set.add_vote(vote(0, Some(block_id(1)))).unwrap();
        set.add_vote(vote(1, Some(block_id(1)))).unwrap();
        assert_eq!(set.two_thirds_majority(), None);
        set.add_vote(vote(2, Some(block_id(1)))).unwrap();
        assert_eq!(set.two_thirds_majority(), Some(block_id(1)));
    }

    #[test]
    fn conflicting_vote_is_rejected() {
        let mut set = VoteSet::new(5, 0, SignedMsgType::Prevote, 4);
        set.add_vote(vote(0, Some(block_id(1)))).unwrap();
        // exact duplicate is a no-op
        assert!(!set.add_vote(vote(0, Some(block_id(1)))).unwrap());
        assert_eq!(
            set.add_vote(vote(0, Some(block_id(2)))),
            Err(VoteSetError::ConflictingVote(0))
        );
    }

    #[test]
    fn peer_maj23_conflicts_are_detected() {
        let mut set = VoteSet::new(5, 0, SignedMsgType::Prevote, 4);
        let peer = PeerId::from("p0");
        set.set_peer_maj23(peer.clone(), block_id(1)).unwrap();
        set.set_peer_maj23(peer.clone(), block_id(1)).unwrap();
        assert_eq!(
            set.set_peer_maj23(peer.clone(), block_id(2)),
            Err(VoteSetError::ConflictingMaj23(peer))
        );
    }

    #[test]
    fn wrapped_commit_reads_like_a_vote_set() {
        let commit = Commit {
            height: 10,
            round: 1,
            block_id: block_id(3),
            signatures: vec![
                CommitSig {
                    flag: BlockIdFlag::Commit,
                    signature: vec![1; 64],
                },
                CommitSig {
                    flag: BlockIdFlag::Absent,
                    signature: Vec::new(),
                },
                CommitSig {
                    flag: BlockIdFlag::Nil,
                    signature: vec![2; 64],
                },
            ],
        };
        let ec = commit.wrapped_extended_commit();
        assert!(ec.is_commit());
        assert_eq!(ec.len(), 3);
        let mask = ec.bit_array();
        assert!(mask.get(0) && !mask.get(1) && mask.get(2));
        assert_eq!(ec.get_by_index(0).unwrap().block_id, Some(block_id(3)));
        assert_eq!(ec.get_by_index(1), None);
        assert_eq!(ec.get_by_index(2).unwrap().block_id, None);
    }
}
