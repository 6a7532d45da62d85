// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The consensus wire message set.
//!
//! Every variant carries a structural `validate` predicate; the receive path
//! rejects (and stops) peers whose messages fail it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::WireMessage;
use crate::consensus::state::Step;
use crate::types::block::MAX_BLOCK_PARTS_COUNT;
use crate::types::vote::MAX_VOTES_COUNT;
use crate::types::{
    BitArray, BlockId, Part, PartSetHeader, Proposal, SignedMsgType, ValidationError, Vote,
};
use crate::{Height, Round, ValidatorIndex};

/// Announcement of a height/round/step transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRoundStep {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    /// May be negative when clocks disagree.
    pub seconds_since_start_time: i64,
    pub last_commit_round: Round,
}

impl NewRoundStep {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        // LastCommitRound is -1 for the chain's initial height, which only
        // the reactor knows; see validate_height.
        if self.last_commit_round < -1 {
            return Err(ValidationError::invalid(
                "last_commit_round",
                "cannot be below -1",
            ));
        }
        Ok(())
    }

    /// Validates the height fields against the chain's initial height.
    pub fn validate_height(&self, initial_height: Height) -> Result<(), ValidationError> {
        if self.height < initial_height {
            return Err(ValidationError::invalid(
                "height",
                format!("{} is below the initial height {initial_height}", self.height),
            ));
        }
        if self.height == initial_height && self.last_commit_round != -1 {
            return Err(ValidationError::invalid(
                "last_commit_round",
                format!("must be -1 for the initial height, got {}", self.last_commit_round),
            ));
        }
        if self.height > initial_height && self.last_commit_round < 0 {
            return Err(ValidationError::invalid(
                "last_commit_round",
                format!("can only be negative for the initial height {initial_height}"),
            ));
        }
        Ok(())
    }
}

/// Announcement that a block gathered +2/3 prevotes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewValidBlock {
    pub height: Height,
    pub round: Round,
    pub block_part_set_header: PartSetHeader,
    pub block_parts: BitArray,
    pub is_commit: bool,
}

impl NewValidBlock {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        self.block_part_set_header.validate()?;
        if self.block_parts.size() == 0 {
            return Err(ValidationError::Required("block_parts"));
        }
        if self.block_parts.size() != self.block_part_set_header.total as usize {
            return Err(ValidationError::invalid(
                "block_parts",
                format!(
                    "bit array of size {} does not match the header total {}",
                    self.block_parts.size(),
                    self.block_part_set_header.total
                ),
            ));
        }
        if self.block_parts.size() > MAX_BLOCK_PARTS_COUNT as usize {
            return Err(ValidationError::invalid(
                "block_parts",
                format!("bit array of size {} is too big", self.block_parts.size()),
            ));
        }
        Ok(())
    }
}

/// Our prevote mask for the proposal's proof-of-lock round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposalPol {
    pub height: Height,
    pub proposal_pol_round: Round,
    pub proposal_pol: BitArray,
}

impl ProposalPol {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.proposal_pol_round < 0 {
            return Err(ValidationError::Negative("proposal_pol_round"));
        }
        if self.proposal_pol.size() == 0 {
            return Err(ValidationError::Required("proposal_pol"));
        }
        if self.proposal_pol.size() > MAX_VOTES_COUNT {
            return Err(ValidationError::invalid(
                "proposal_pol",
                format!("bit array of size {} is too big", self.proposal_pol.size()),
            ));
        }
        Ok(())
    }
}

/// One part of the proposed block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockPart {
    pub height: Height,
    pub round: Round,
    pub part: Part,
}

impl BlockPart {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        self.part.validate()
    }
}

/// Announcement that we hold a vote from the given validator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HasVote {
    pub height: Height,
    pub round: Round,
    pub vote_type: SignedMsgType,
    pub index: ValidatorIndex,
}

impl HasVote {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        if self.index < 0 {
            return Err(ValidationError::Negative("index"));
        }
        Ok(())
    }
}

/// Announcement that we hold the given proposal block part.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HasProposalBlockPart {
    pub height: Height,
    pub round: Round,
    pub index: i32,
}

impl HasProposalBlockPart {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 1 {
            return Err(ValidationError::invalid("height", "must be at least 1"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        if self.index < 0 {
            return Err(ValidationError::Negative("index"));
        }
        Ok(())
    }
}

/// Claim that the given block id gathered +2/3 votes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteSetMaj23 {
    pub height: Height,
    pub round: Round,
    pub vote_type: SignedMsgType,
    pub block_id: BlockId,
}

impl VoteSetMaj23 {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        self.block_id.validate()
    }
}

/// Our vote mask for a block id a peer claimed a majority on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteSetBits {
    pub height: Height,
    pub round: Round,
    pub vote_type: SignedMsgType,
    pub block_id: BlockId,
    pub votes: BitArray,
}

impl VoteSetBits {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        self.block_id.validate()?;
        // votes may be empty if we hold none
        if self.votes.size() > MAX_VOTES_COUNT {
            return Err(ValidationError::invalid(
                "votes",
                format!("bit array of size {} is too big", self.votes.size()),
            ));
        }
        Ok(())
    }
}

/// Everything the consensus reactor sends or receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    NewRoundStep(NewRoundStep),
    NewValidBlock(NewValidBlock),
    Proposal(Proposal),
    ProposalPol(ProposalPol),
    BlockPart(BlockPart),
    Vote(Vote),
    HasVote(HasVote),
    HasProposalBlockPart(HasProposalBlockPart),
    VoteSetMaj23(VoteSetMaj23),
    VoteSetBits(VoteSetBits),
}

impl ConsensusMessage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::NewRoundStep(m) => m.validate(),
            Self::NewValidBlock(m) => m.validate(),
            Self::Proposal(m) => m.validate(),
            Self::ProposalPol(m) => m.validate(),
            Self::BlockPart(m) => m.validate(),
            Self::Vote(m) => m.validate(),
            Self::HasVote(m) => m.validate(),
            Self::HasProposalBlockPart(m) => m.validate(),
            Self::VoteSetMaj23(m) => m.validate(),
            Self::VoteSetBits(m) => m.validate(),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewRoundStep(_) => "NewRoundStep",
            Self::NewValidBlock(_) => "NewValidBlock",
            Self::Proposal(_) => "Proposal",
            Self::ProposalPol(_) => "ProposalPol",
            Self::BlockPart(_) => "BlockPart",
            Self::Vote(_) => "Vote",
            Self::HasVote(_) => "HasVote",
            Self::HasProposalBlockPart(_) => "HasProposalBlockPart",
            Self::VoteSetMaj23(_) => "VoteSetMaj23",
            Self::VoteSetBits(_) => "VoteSetBits",
        }
    }
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

impl WireMessage for ConsensusMessage {}
