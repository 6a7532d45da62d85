// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Blocks split into Merkle-addressed part sets.
//!
//! A proposed block travels as fixed-size parts under a [`PartSetHeader`].
//! [`PartSet`] is the receiving/serving side: it tracks which parts are
//! present in a [`BitArray`] so the data-dissemination loop can compute what
//! a peer is still missing.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Height;
use crate::types::{BitArray, ValidationError};

/// Width of a block or part-set hash in bytes.
pub const HASH_SIZE: usize = 32;
/// Size of a single block part.
pub const BLOCK_PART_SIZE_BYTES: usize = 65536;
/// Upper bound on the number of parts a block may be split into.
pub const MAX_BLOCK_PARTS_COUNT: u32 = 1601;

/// Merkle header addressing a complete part set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Vec<u8>,
}

impl PartSetHeader {
    /// The zero header, meaning "no part set".
    #[must_use]
    pub fn zero() -> Self {
        Self {
            total: 0,
            hash: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.hash.is_empty() && self.hash.len() != HASH_SIZE {
            return Err(ValidationError::invalid(
                "hash",
                format!("expected {HASH_SIZE} bytes, got {}", self.hash.len()),
            ));
        }
        if self.total > MAX_BLOCK_PARTS_COUNT {
            return Err(ValidationError::invalid(
                "total",
                format!("{} parts exceed the maximum {MAX_BLOCK_PARTS_COUNT}", self.total),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PartSetHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "{}:empty", self.total)
        } else {
            write!(f, "{}:{}", self.total, &hex::encode(&self.hash)[..8])
        }
    }
}

/// One part of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub index: u32,
    pub bytes: Vec<u8>,
}

impl Part {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bytes.is_empty() {
            return Err(ValidationError::Required("bytes"));
        }
        if self.bytes.len() > BLOCK_PART_SIZE_BYTES {
            return Err(ValidationError::invalid(
                "bytes",
                format!("part of {} bytes exceeds {BLOCK_PART_SIZE_BYTES}", self.bytes.len()),
            ));
        }
        Ok(())
    }
}

/// Identity of a block: its hash plus the header of its part set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: Vec<u8>,
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    /// The zero block id, used for nil votes.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            hash: Vec::new(),
            part_set_header: PartSetHeader::zero(),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.hash.is_empty() && self.part_set_header.is_zero()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.hash.is_empty() && self.hash.len() != HASH_SIZE {
            return Err(ValidationError::invalid(
                "hash",
                format!("expected {HASH_SIZE} bytes, got {}", self.hash.len()),
            ));
        }
        self.part_set_header.validate()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "nil-block")
        } else {
            write!(f, "{}({})", &hex::encode(&self.hash)[..8], self.part_set_header)
        }
    }
}

/// Stored metadata of a committed block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub height: Height,
    pub block_id: BlockId,
}

/// Errors adding parts to a [`PartSet`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PartSetError {
    #[error("part index out of bounds")]
    IndexOutOfBounds,
}

/// A block's parts, tracked under a fixed header.
#[derive(Clone, Debug)]
pub struct PartSet {
    header: PartSetHeader,
    parts: Vec<Option<Part>>,
    mask: BitArray,
    count: u32,
}

impl PartSet {
    /// Creates an empty part set expecting `header.total` parts.
    #[must_use]
    pub fn new_from_header(header: PartSetHeader) -> Self {
        let total = header.total as usize;
        Self {
            header,
            parts: vec![None; total],
            mask: BitArray::new(total),
            count: 0,
        }
    }

    #[must_use]
    pub fn header(&self) -> &PartSetHeader {
        &self.header
    }

    /// `true` iff this part set carries the given header.
    #[must_use]
    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        !header.is_zero() && self.header == *header
    }

    /// Bit mask of the parts present.
    #[must_use]
    pub fn bit_array(&self) -> BitArray {
        self.mask.clone()
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.header.total
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.count == self.header.total
    }

    #[must_use]
    pub fn get_part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index).and_then(Option::as_ref)
    }

    /// Adds a part. Returns `false` if the part was already present.
    ///
    /// # Errors
    ///
    /// Returns [`PartSetError::IndexOutOfBounds`] if the index does not fit
    /// the header.
    pub fn add_part(&mut self, part: Part) -> Result<bool, PartSetError> {
        let index = part.index as usize;
        if index >= self.parts.len() {
            return Err(PartSetError::IndexOutOfBounds);
        }
        if self.parts[index].is_some() {
            return Ok(false);
        }
        self.parts[index] = Some(part);
        self.mask.set(index, true);
        self.count += 1;
        Ok(true)
    }
}
