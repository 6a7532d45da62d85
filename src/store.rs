// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only access to committed blocks.
//!
//! The block store is an external collaborator; the dissemination loops only
//! ever load from it to serve lagging peers. [`InMemoryBlockStore`] backs the
//! in-process wiring and tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use mockall::automock;

use crate::Height;
use crate::types::{BlockMeta, Commit, ExtendedCommit, Part};

/// Window of committed blocks available for catch-up.
///
/// `base()..=height()` is the retained range; loads outside it return `None`.
#[automock]
pub trait BlockStore: Send + Sync {
    /// Lowest retained height, `0` when empty.
    fn base(&self) -> Height;
    /// Highest stored height, `0` when empty.
    fn height(&self) -> Height;
    fn load_block_meta(&self, height: Height) -> Option<BlockMeta>;
    fn load_block_part(&self, height: Height, index: usize) -> Option<Part>;
    fn load_block_commit(&self, height: Height) -> Option<Commit>;
    fn load_block_extended_commit(&self, height: Height) -> Option<ExtendedCommit>;
}

/// One stored block: metadata, parts, and the commit that sealed it.
#[derive(Clone, Debug)]
pub struct StoredBlock {
    pub meta: BlockMeta,
    pub parts: Vec<Part>,
    pub commit: Option<Commit>,
    pub extended_commit: Option<ExtendedCommit>,
}

/// Block store held entirely in memory.
#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: Mutex<BTreeMap<Height, StoredBlock>>,
}

impl InMemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a block under its meta height.
    pub fn add_block(&self, block: StoredBlock) {
        self.blocks
            .lock()
            .expect("block store lock poisoned")
            .insert(block.meta.height, block);
    }

    /// Drops everything below the given height.
    pub fn prune(&self, height: Height) {
        let mut blocks = self.blocks.lock().expect("block store lock poisoned");
        *blocks = blocks.split_off(&height);
    }
}

impl BlockStore for InMemoryBlockStore {
    fn base(&self) -> Height {
        let blocks = self.blocks.lock().expect("block store lock poisoned");
        blocks.keys().next().copied().unwrap_or(0)
    }

    fn height(&self) -> Height {
        let blocks = self.blocks.lock().expect("block store lock poisoned");
        blocks.keys().next_back().copied().unwrap_or(0)
    }

    fn load_block_meta(&self, height: Height) -> Option<BlockMeta> {
        let blocks = self.blocks.lock().expect("block store lock poisoned");
        blocks.get(&height).map(|b| b.meta.clone())
    }

    fn load_block_part(&self, height: Height, index: usize) -> Option<Part> {
        let blocks = self.blocks.lock().expect("block store lock poisoned");
        blocks.get(&height)?.parts.get(index).cloned()
    }

    fn load_block_commit(&self, height: Height) -> Option<Commit> {
        let blocks = self.blocks.lock().expect("block store lock poisoned");
        blocks.get(&height)?.commit.clone()
    }

    fn load_block_extended_commit(&self, height: Height) -> Option<ExtendedCommit> {
        let blocks = self.blocks.lock().expect("block store lock poisoned");
        blocks.get(&height)?.extended_commit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockId, PartSetHeader};

    fn stored(height: Height, parts: u32) -> StoredBlock {
        let header = PartSetHeader {
            total: parts,
            hash: vec![height as u8; 32],
        };
        StoredBlock {
            meta: BlockMeta {
                height,
                block_id: BlockId {
                    hash: vec![height as u8; 32],
                    part_set_header: header,
                },
            },
            parts: (0..parts)
                .map(|index| Part {
                    index,
                    bytes: vec![index as u8; 8],
                })
                .collect(),
            commit: None,
            extended_commit: None,
        }
    }

    #[test]
    fn window_tracks_base_and_height() {
        let store = InMemoryBlockStore::new();
        assert_eq!((store.base(), store.height()), (0, 0));
        for h in 3..=7 {
            store.add_block(stored(h, 2));
        }
        assert_eq!((store.base(), store.height()), (3, 7));
        store.prune(5);
        assert_eq!((store.base(), store.height()), (5, 7));
        assert!(store.load_block_meta(4).is_none());
        assert!(store.load_block_part(5, 1).is_some());
        assert!(store.load_block_part(5, 2).is_none());
    }
}
