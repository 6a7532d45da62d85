// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain value types shared by both reactors.

pub mod bit_array;
pub mod block;
pub mod proposal;
pub mod tx;
pub mod vote;

use thiserror::Error;

pub use bit_array::BitArray;
pub use block::{BlockId, BlockMeta, Part, PartSet, PartSetHeader};
pub use proposal::Proposal;
pub use tx::{Tx, TxKey};
pub use vote::{
    BlockIdFlag, Commit, CommitSig, ExtendedCommit, ExtendedCommitSig, SignedMsgType, Vote,
    VoteSet, VoteSetReader,
};

/// Structural validation failure of a received value or message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} cannot be negative")]
    Negative(&'static str),
    #[error("{0} is required")]
    Required(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
