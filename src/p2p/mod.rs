// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Peer and switch plumbing shared by both reactors.
//!
//! The [`Switch`] delivers channel-multiplexed [`Envelope`]s to connected
//! [`Peer`]s. Connection establishment, handshakes, and wire framing live
//! outside this crate; the in-process implementations here are enough to wire
//! reactors together within one process and in tests.

pub mod peer;
pub mod switch;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use peer::{AttributeBag, ChannelPeer, Peer, PeerId, PeerSet};
pub use switch::{MeshSwitch, Switch};

use crate::WireMessage;
use crate::consensus::messages::ConsensusMessage;
use crate::mempool::MempoolMessage;

/// Channel identifier byte as it appears on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u8);

/// NewRoundStep, NewValidBlock, HasVote, HasProposalBlockPart, VoteSetMaj23.
pub const STATE_CHANNEL: ChannelId = ChannelId(0x20);
/// Proposal, ProposalPol, BlockPart.
pub const DATA_CHANNEL: ChannelId = ChannelId(0x21);
/// Vote.
pub const VOTE_CHANNEL: ChannelId = ChannelId(0x22);
/// VoteSetBits.
pub const VOTE_SET_BITS_CHANNEL: ChannelId = ChannelId(0x23);
/// Txs.
pub const MEMPOOL_CHANNEL: ChannelId = ChannelId(0x30);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// A channel-multiplexed message addressed to (or received from) one peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel_id: ChannelId,
    pub payload: Payload,
}

/// The two message families multiplexed over the switch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Consensus(ConsensusMessage),
    Mempool(MempoolMessage),
}

impl WireMessage for Envelope {}

/// Static properties of one channel.
#[derive(Clone, Debug)]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    pub priority: u8,
    pub send_queue_capacity: usize,
    pub recv_message_capacity: usize,
}

/// Descriptors for the four consensus channels.
#[must_use]
pub fn consensus_channel_descriptors() -> Vec<ChannelDescriptor> {
    vec![
        ChannelDescriptor {
            id: STATE_CHANNEL,
            priority: 6,
            send_queue_capacity: 100,
            recv_message_capacity: crate::MAX_MSG_BYTES,
        },
        ChannelDescriptor {
            id: DATA_CHANNEL,
            priority: 10,
            send_queue_capacity: 100,
            recv_message_capacity: crate::MAX_MSG_BYTES,
        },
        ChannelDescriptor {
            id: VOTE_CHANNEL,
            priority: 7,
            send_queue_capacity: 100,
            recv_message_capacity: crate::MAX_MSG_BYTES,
        },
        ChannelDescriptor {
            id: VOTE_SET_BITS_CHANNEL,
            priority: 1,
            send_queue_capacity: 2,
            recv_message_capacity: 1024,
        },
    ]
}

/// Descriptor for the mempool channel, sized to the largest allowed tx.
#[must_use]
pub fn mempool_channel_descriptor(max_tx_bytes: usize) -> ChannelDescriptor {
    ChannelDescriptor {
        id: MEMPOOL_CHANNEL,
        priority: 5,
        send_queue_capacity: 100,
        recv_message_capacity: max_tx_bytes + 128,
    }
}
