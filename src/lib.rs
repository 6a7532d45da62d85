// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fullmesh: direct-broadcast dissemination core for a BFT replicated state machine.
//!
//! Two sibling reactors share a process-wide [`Switch`] that delivers
//! channel-multiplexed envelopes to connected peers:
//!
//! - the [`mempool`] reactor relays client transactions while tracking, per
//!   transaction, which peers already sent it to us, so that peer-originated
//!   transactions are never echoed back (and, under the direct-broadcast
//!   discipline, never relayed at all);
//! - the [`consensus`] reactor runs three long-lived loops per peer that
//!   reconcile our round state with the peer's perceived round state and pick
//!   the single most useful proposal part, vote, or catch-up datum to send.
//!
//! The consensus state machine itself, the transaction-validity oracle, and
//! the block store are external collaborators consumed through the seams in
//! [`consensus::state`], [`mempool::pool`], and [`store`].
//!
//! [`Switch`]: p2p::Switch

pub mod config;
pub mod consensus;
pub mod logging;
pub mod mempool;
pub mod p2p;
pub mod store;
pub mod types;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use config::Config;
pub use consensus::ConsensusReactor;
pub use mempool::MempoolReactor;

/// Block height type.
pub type Height = i64;
/// Consensus round type. `-1` is the "unknown / not applicable" sentinel.
pub type Round = i32;
/// Index of a validator within the active validator set.
pub type ValidatorIndex = i32;

/// Upper bound on the encoded size of any single message on the wire.
pub const MAX_MSG_BYTES: usize = 1 << 20;

/// Errors of the message byte codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encoded message exceeds {MAX_MSG_BYTES} bytes")]
    Oversized,
    #[error("failed to decode message")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Byte codec for everything that crosses the switch, backed by [`bincode`].
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    /// Tries to deserialize a message from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Oversized`] if `bytes` exceed [`MAX_MSG_BYTES`],
    /// [`CodecError::Decode`] if bincode decoding fails.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_MSG_BYTES {
            return Err(CodecError::Oversized);
        }
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(msg)
    }

    /// Serializes the message to bytes.
    ///
    /// # Panics
    ///
    /// Panics if the message does not fit in [`MAX_MSG_BYTES`].
    fn to_bytes(&self) -> Vec<u8> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .expect("serialization should not panic");
        assert!(bytes.len() <= MAX_MSG_BYTES, "message should fit on the wire");
        bytes
    }
}
