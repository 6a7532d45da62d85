// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The mempool proper: admission through the CheckTx oracle.
//!
//! A transaction enters the ordered log at most once, on the first OK
//! response from the application's [`CheckTxOracle`]. The cursor-based log,
//! the pool size, and removal notifications all hang off [`Mempool`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::Height;
use crate::mempool::tx_log::{TxCursor, TxEntry, TxLog};
use crate::types::{Tx, TxKey};

/// Response code meaning the application accepted the transaction.
pub const CODE_TYPE_OK: u32 = 0;

/// The application's verdict on a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckTxResponse {
    pub code: u32,
    pub info: String,
}

impl CheckTxResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: CODE_TYPE_OK,
            info: String::new(),
        }
    }

    #[must_use]
    pub fn error(code: u32, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == CODE_TYPE_OK
    }
}

/// Application-level admission predicate for transactions.
#[automock]
#[async_trait]
pub trait CheckTxOracle: Send + Sync {
    async fn check_tx(&self, tx: &Tx) -> CheckTxResponse;
}

/// Errors the mempool raises before the oracle is even consulted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in cache")]
    TxInCache,
    #[error("transaction of {got} bytes exceeds the maximum {max}")]
    TxTooLarge { got: usize, max: usize },
}

struct MempoolInner {
    /// Every key ever checked, kept across removal like the original cache.
    cache: HashSet<TxKey>,
    /// Live entries only.
    entries: HashMap<TxKey, Arc<TxEntry>>,
    height: Height,
}

/// The ordered transaction pool feeding the broadcast routines.
pub struct Mempool {
    oracle: Arc<dyn CheckTxOracle>,
    max_tx_bytes: usize,
    log: TxLog,
    inner: Mutex<MempoolInner>,
    removed_subs: Mutex<Vec<mpsc::UnboundedSender<TxKey>>>,
}

impl Mempool {
    #[must_use]
    pub fn new(oracle: Arc<dyn CheckTxOracle>, max_tx_bytes: usize) -> Self {
        Self {
            oracle,
            max_tx_bytes,
            log: TxLog::new(),
            inner: Mutex::new(MempoolInner {
                cache: HashSet::new(),
                entries: HashMap::new(),
                height: 0,
            }),
            removed_subs: Mutex::new(Vec::new()),
        }
    }

    /// Runs the oracle on the transaction and admits it on an OK code.
    ///
    /// # Errors
    ///
    /// Returns [`MempoolError::TxInCache`] for a transaction seen before and
    /// [`MempoolError::TxTooLarge`] for oversized ones. An `Ok` response with
    /// a non-OK code means the application rejected the transaction.
    pub async fn check_tx(&self, tx: Tx) -> Result<CheckTxResponse, MempoolError> {
        if tx.len() > self.max_tx_bytes {
            return Err(MempoolError::TxTooLarge {
                got: tx.len(),
                max: self.max_tx_bytes,
            });
        }
        let key = tx.key();
        {
            let mut inner = self.inner.lock().expect("mempool lock poisoned");
            if !inner.cache.insert(key) {
                return Err(MempoolError::TxInCache);
            }
        }

        let response = self.oracle.check_tx(&tx).await;
        if response.is_ok() {
            let mut inner = self.inner.lock().expect("mempool lock poisoned");
            // the cache reservation above makes double admission impossible
            let entry = self.log.push(tx, inner.height);
            inner.entries.insert(key, entry);
        }
        Ok(response)
    }

    /// Number of live transactions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().expect("mempool lock poisoned").entries.len()
    }

    #[must_use]
    pub fn height(&self) -> Height {
        self.inner.lock().expect("mempool lock poisoned").height
    }

    /// Records the latest committed height; new admissions carry it.
    pub fn set_height(&self, height: Height) {
        self.inner.lock().expect("mempool lock poisoned").height = height;
    }

    /// Drops a transaction (committed, evicted, or invalidated) and notifies
    /// removal subscribers. The cache entry stays, as in the original.
    pub fn remove_tx(&self, key: &TxKey) {
        let removed = {
            let mut inner = self.inner.lock().expect("mempool lock poisoned");
            inner.entries.remove(key)
        };
        let Some(entry) = removed else { return };
        entry.mark_removed();
        self.removed_subs
            .lock()
            .expect("mempool subscribers lock poisoned")
            .retain(|sub| sub.send(*key).is_ok());
    }

    /// Stream of keys removed from the pool.
    pub fn subscribe_removed(&self) -> mpsc::UnboundedReceiver<TxKey> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.removed_subs
            .lock()
            .expect("mempool subscribers lock poisoned")
            .push(tx);
        rx
    }

    /// A cursor over the ordered transaction log, starting at the front.
    #[must_use]
    pub fn cursor(&self) -> TxCursor {
        self.log.cursor()
    }
}
