// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction dissemination with sender attribution.
//!
//! The mempool reactor receives transactions from clients and peers, admits
//! them through the CheckTx oracle, and pushes them outward on one broadcast
//! routine per peer. Sender attribution keeps a transaction from being echoed
//! back to a peer that sent it; under the direct-broadcast discipline, a
//! transaction with any connected-peer sender is not relayed at all.

pub mod pool;
pub mod reactor;
pub mod tx_log;

use serde::{Deserialize, Serialize};

pub use pool::{CheckTxOracle, CheckTxResponse, Mempool, MempoolError};
pub use reactor::MempoolReactor;
pub use tx_log::{TxCursor, TxEntry, TxLog};

use crate::WireMessage;
use crate::types::{Tx, ValidationError};

/// The mempool channel's message set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MempoolMessage {
    /// A batch of raw transactions.
    Txs(Vec<Tx>),
}

impl MempoolMessage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Txs(txs) if txs.is_empty() => Err(ValidationError::Required("txs")),
            Self::Txs(_) => Ok(()),
        }
    }
}

impl WireMessage for MempoolMessage {}
