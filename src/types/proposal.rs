// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Signed block proposals.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::vote::MAX_SIGNATURE_SIZE;
use crate::types::{BlockId, ValidationError};
use crate::{Height, Round};

/// A proposer's signed announcement of the block for (height, round).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    /// Round of the proof-of-lock justifying this proposal, `-1` if none.
    pub pol_round: Round,
    pub block_id: BlockId,
    pub signature: Vec<u8>,
}

impl Proposal {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height < 0 {
            return Err(ValidationError::Negative("height"));
        }
        if self.round < 0 {
            return Err(ValidationError::Negative("round"));
        }
        if self.pol_round < -1 || self.pol_round >= self.round {
            return Err(ValidationError::invalid(
                "pol_round",
                format!("{} not in [-1, {})", self.pol_round, self.round),
            ));
        }
        self.block_id.validate()?;
        if self.signature.is_empty() {
            return Err(ValidationError::Required("signature"));
        }
        if self.signature.len() > MAX_SIGNATURE_SIZE {
            return Err(ValidationError::invalid(
                "signature",
                format!("{} bytes exceed the maximum {MAX_SIGNATURE_SIZE}", self.signature.len()),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proposal{{{}/{} pol {} block {}}}",
            self.height, self.round, self.pol_round, self.block_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartSetHeader;

    fn proposal() -> Proposal {
        Proposal {
            height: 3,
            round: 1,
            pol_round: 0,
            block_id: BlockId {
                hash: vec![5; 32],
                part_set_header: PartSetHeader {
                    total: 2,
                    hash: vec![5; 32],
                },
            },
            signature: vec![1; 64],
        }
    }

    #[test]
    fn pol_round_must_precede_round() {
        let mut p = proposal();
        assert!(p.validate().is_ok());
        p.pol_round = 1;
        assert!(p.validate().is_err());
        p.pol_round = -1;
        assert!(p.validate().is_ok());
        p.pol_round = -2;
        assert!(p.validate().is_err());
    }
}
