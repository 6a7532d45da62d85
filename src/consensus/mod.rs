// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Consensus dissemination: receive paths and per-peer gossip loops.
//!
//! The reactor tracks, per peer, a [`PeerRoundState`] mirroring what that
//! peer knows about the current consensus round. Three cooperative loops per
//! peer compare it against our own cached [`RoundState`] snapshot and send
//! exactly one useful thing at a time: a proposal, a block part, a vote, or a
//! catch-up datum served from the block store.

mod gossip;
pub mod messages;
pub mod peer_state;
pub mod reactor;
pub mod state;

pub use messages::ConsensusMessage;
pub use peer_state::{PeerRoundState, PeerState, compare_hrs};
pub use reactor::ConsensusReactor;
pub use state::{ConsensusState, HeightVoteSet, PeerMessage, RoundState, StateEvent, Step};
