//! WAL transaction id allocation.

use crate::types::WalTxId;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Tracks which WAL transaction ids are in use.
///
/// A finished id is not handed out again until the next compaction, because
/// the active segment may still hold its uncommitted records. Compaction
/// calls [`TxIdStates::recycle`] once those records are gone.
#[derive(Debug, Default)]
pub(crate) struct TxIdStates {
    /// `active[id]` is true while the transaction is running.
    active: Vec<bool>,
    /// Ids free for reuse, smallest first.
    free: BinaryHeap<Reverse<u32>>,
    /// Ids finished since the last recycle.
    completed: u64,
}

impl TxIdStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the smallest reusable id, or a fresh one.
    ///
    /// Returns `None` when every id is taken.
    pub fn allocate(&mut self) -> Option<WalTxId> {
        if let Some(Reverse(id)) = self.free.pop() {
            self.active[id as usize] = true;
            return Some(WalTxId::new(id));
        }
        let next = self.active.len();
        if next > WalTxId::MAX as usize {
            return None;
        }
        self.active.push(true);
        Some(WalTxId::new(next as u32))
    }

    /// Marks `id` finished, by commit or rollback.
    pub fn complete(&mut self, id: WalTxId) {
        let slot = &mut self.active[id.as_u32() as usize];
        debug_assert!(*slot, "{id} completed twice");
        *slot = false;
        self.completed += 1;
    }

    /// Number of ids finished since the last recycle.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Iterates the ids of running transactions.
    pub fn active_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, a)| **a)
            .map(|(id, _)| id as u32)
    }

    /// Makes finished ids available again after a compaction.
    ///
    /// `retained` holds the ids whose records the compaction carried into the
    /// new segment. Any of them that finished in the meantime stay blocked
    /// and count toward the next compaction.
    pub fn recycle(&mut self, retained: &BTreeSet<u32>) {
        while self.active.last() == Some(&false)
            && !retained.contains(&(self.active.len() as u32 - 1))
        {
            self.active.pop();
        }

        let mut blocked = 0;
        self.free.clear();
        for (id, active) in self.active.iter().enumerate() {
            let id = id as u32;
            if *active {
                continue;
            }
            if retained.contains(&id) {
                blocked += 1;
            } else {
                self.free.push(Reverse(id));
            }
        }
        self.completed = blocked;
    }
}
