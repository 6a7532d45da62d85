// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Append-only transaction log with per-consumer cursors.
//!
//! Each broadcast routine walks the log through its own [`TxCursor`], so all
//! routines see transactions in the same admission order. Removal tombstones
//! an entry in place; cursors skip tombstones on iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::Height;
use crate::types::{Tx, TxKey};

/// One admitted transaction.
#[derive(Debug)]
pub struct TxEntry {
    pub tx: Tx,
    pub key: TxKey,
    /// Height at which the mempool admitted the transaction.
    pub height: Height,
    removed: AtomicBool,
}

impl TxEntry {
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct LogInner {
    entries: Mutex<Vec<Arc<TxEntry>>>,
    notify: Notify,
}

/// The shared log. Cheap to clone; clones view the same entries.
#[derive(Clone, Default)]
pub struct TxLog {
    inner: Arc<LogInner>,
}

impl TxLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transaction and wakes all waiting cursors.
    pub fn push(&self, tx: Tx, height: Height) -> Arc<TxEntry> {
        let entry = Arc::new(TxEntry {
            key: tx.key(),
            tx,
            height,
            removed: AtomicBool::new(false),
        });
        self.inner
            .entries
            .lock()
            .expect("tx log lock poisoned")
            .push(entry.clone());
        self.inner.notify.notify_waiters();
        entry
    }

    /// A new cursor positioned at the front of the log.
    #[must_use]
    pub fn cursor(&self) -> TxCursor {
        TxCursor {
            log: self.clone(),
            pos: 0,
        }
    }

    fn get(&self, pos: usize) -> Option<Arc<TxEntry>> {
        self.inner
            .entries
            .lock()
            .expect("tx log lock poisoned")
            .get(pos)
            .cloned()
    }
}

/// One consumer's position in the log.
pub struct TxCursor {
    log: TxLog,
    pos: usize,
}

impl TxCursor {
    /// Next live entry, if one is immediately available.
    pub fn try_next(&mut self) -> Option<Arc<TxEntry>> {
        loop {
            let entry = self.log.get(self.pos)?;
            self.pos += 1;
            if !entry.is_removed() {
                return Some(entry);
            }
        }
    }

    /// Next live entry, waiting for one to be appended if necessary.
    pub async fn next_wait(&mut self) -> Arc<TxEntry> {
        loop {
            if let Some(entry) = self.try_next() {
                return entry;
            }
            let inner = self.log.inner.clone();
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // an append may have raced the waiter registration
            if let Some(entry) = self.try_next() {
                return entry;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cursors_iterate_in_admission_order() {
        let log = TxLog::new();
        for i in 0..3u8 {
            log.push(Tx::new(vec![i]), 1);
        }
        let mut a = log.cursor();
        let mut b = log.cursor();
        let order_a: Vec<_> = std::iter::from_fn(|| a.try_next()).map(|e| e.key).collect();
        let order_b: Vec<_> = std::iter::from_fn(|| b.try_next()).map(|e| e.key).collect();
        assert_eq!(order_a.len(), 3);
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn cursors_skip_tombstones() {
        let log = TxLog::new();
        log.push(Tx::new(vec![0]), 1);
        let doomed = log.push(Tx::new(vec![1]), 1);
        log.push(Tx::new(vec![2]), 1);
        doomed.mark_removed();

        let mut cursor = log.cursor();
        assert_eq!(cursor.try_next().unwrap().tx, Tx::new(vec![0]));
        assert_eq!(cursor.try_next().unwrap().tx, Tx::new(vec![2]));
        assert!(cursor.try_next().is_none());
    }

    #[tokio::test]
    async fn next_wait_wakes_on_push() {
        let log = TxLog::new();
        let mut cursor = log.cursor();
        let waiter = tokio::spawn(async move { cursor.next_wait().await.key });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let pushed = log.push(Tx::new(vec![7]), 3);
        assert_eq!(waiter.await.unwrap(), pushed.key);
    }
}
