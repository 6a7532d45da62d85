// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration for both reactors.

use std::time::Duration;

/// Largest transaction, in bytes, the mempool channel accepts.
pub const DEFAULT_MAX_TX_BYTES: usize = 1024 * 1024;

/// Tunables for the dissemination layer.
///
/// The two `max_gossip_connections_*` caps bound how many mempool broadcast
/// routines may run concurrently for the respective peer group. A cap of `0`
/// disables the bound entirely.
#[derive(Clone, Debug)]
pub struct Config {
    /// Whether the mempool relays transactions to peers at all.
    pub broadcast: bool,
    /// Largest transaction accepted on the mempool channel.
    pub max_tx_bytes: usize,
    /// Cap on concurrent broadcast routines towards persistent peers.
    pub max_gossip_connections_to_persistent_peers: usize,
    /// Cap on concurrent broadcast routines towards non-persistent peers.
    pub max_gossip_connections_to_non_persistent_peers: usize,
    /// How long an idle dissemination loop sleeps between iterations.
    pub peer_gossip_sleep_duration: Duration,
    /// Upper bound for the random per-iteration jitter. Zero disables it.
    pub peer_gossip_intraloop_sleep_duration: Duration,
    /// Interval between +2/3-majority announcements to a peer.
    pub peer_query_maj23_sleep_duration: Duration,
    /// Back-off used when a peer is lagging or a transient miss occurs.
    pub peer_catchup_sleep_interval: Duration,
    /// Interval at which the cached round-state snapshot is refreshed.
    pub round_state_refresh_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broadcast: true,
            max_tx_bytes: DEFAULT_MAX_TX_BYTES,
            max_gossip_connections_to_persistent_peers: 0,
            max_gossip_connections_to_non_persistent_peers: 0,
            peer_gossip_sleep_duration: Duration::from_millis(100),
            peer_gossip_intraloop_sleep_duration: Duration::ZERO,
            peer_query_maj23_sleep_duration: Duration::from_secs(2),
            peer_catchup_sleep_interval: Duration::from_millis(100),
            round_state_refresh_interval: Duration::from_millis(2),
        }
    }
}
