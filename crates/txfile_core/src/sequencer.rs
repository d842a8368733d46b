//! Snapshot ordering of transactions.
//!
//! The sequencer keeps a chain of transaction records in the order readers
//! must see them. A transaction is appended to the tail when it begins. On
//! commit its record moves to the tail again and takes the commit's undo map:
//! the bytes the commit replaced.
//!
//! A reader walks the committed records after its own. The first one that
//! covers an offset holds the bytes as they were when the reader began.
//!
//! ```text
//! head                                                tail
//!  | T1 (committed) | R (open) | T2 (committed, undo) | T3 (open) |
//! ```
//!
//! Here `R` reads `T2`'s undo map before falling back to the file, and
//! ignores `T3`. `T1` is dropped by maintenance because no open record
//! precedes it.

use crate::replacement_map::ReplacementMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug)]
struct Record {
    committed: bool,
    replaced: ReplacementMap,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena-backed doubly linked list of records.
#[derive(Debug, Default)]
struct Chain {
    slots: Vec<Option<Record>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    live: usize,
}

impl Chain {
    fn record(&self, slot: usize) -> &Record {
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| panic!("sequencer slot {slot} is vacant"))
    }

    fn record_mut(&mut self, slot: usize) -> &mut Record {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| panic!("sequencer slot {slot} is vacant"))
    }

    fn push_back(&mut self, mut record: Record) -> usize {
        record.prev = self.tail;
        record.next = None;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(record);
                slot
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        match self.tail {
            Some(tail) => self.record_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.live += 1;
        slot
    }

    fn unlink(&mut self, slot: usize) -> Record {
        let record = self.slots[slot]
            .take()
            .unwrap_or_else(|| panic!("sequencer slot {slot} is vacant"));
        match record.prev {
            Some(prev) => self.record_mut(prev).next = record.next,
            None => self.head = record.next,
        }
        match record.next {
            Some(next) => self.record_mut(next).prev = record.prev,
            None => self.tail = record.prev,
        }
        self.free.push(slot);
        self.live -= 1;
        record
    }

    /// Drops committed records no open transaction can see.
    fn maintenance(&mut self) {
        while let Some(head) = self.head {
            if !self.record(head).committed {
                break;
            }
            self.unlink(head);
        }
    }
}

/// Orders transactions so each reads a stable snapshot.
#[derive(Debug, Default)]
pub struct TxSequencer {
    chain: RwLock<Chain>,
}

impl TxSequencer {
    /// Creates an empty sequencer.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begins a transaction anchored at the current tail.
    #[must_use]
    pub fn begin(self: &Arc<Self>) -> SequencerTx {
        self.begin_with(|| ()).0
    }

    /// Begins a transaction and runs `f` while new transactions and commits
    /// are blocked.
    ///
    /// Whatever `f` hands out is ordered exactly like the snapshot.
    pub fn begin_with<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> (SequencerTx, R) {
        let mut chain = self.chain.write();
        let value = f();
        let slot = chain.push_back(Record {
            committed: false,
            replaced: ReplacementMap::new(),
            prev: None,
            next: None,
        });
        trace!(slot, live = chain.live, "sequencer begin");
        drop(chain);
        (
            SequencerTx {
                seq: Arc::clone(self),
                slot: Some(slot),
            },
            value,
        )
    }

    /// Returns the number of records in the chain.
    #[must_use]
    pub fn live_records(&self) -> usize {
        self.chain.read().live
    }
}

/// A transaction's place in the [`TxSequencer`] chain.
///
/// Dropping an uncommitted handle removes its record.
#[derive(Debug)]
pub struct SequencerTx {
    seq: Arc<TxSequencer>,
    slot: Option<usize>,
}

impl SequencerTx {
    /// Reads bytes replaced by commits made after this transaction began.
    ///
    /// Follows the [`ReplacementMap::read_at`] contract: returns 0 and clips
    /// `*len` when the bytes must come from the file instead.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Self::commit`].
    pub fn read_at(&self, offset: u64, buf: &mut [u8], len: &mut usize) -> usize {
        let slot = self.slot.unwrap_or_else(|| panic!("read through a committed sequencer handle"));
        let chain = self.seq.chain.read();
        let mut cursor = chain.record(slot).next;
        while let Some(current) = cursor {
            let record = chain.record(current);
            if record.committed {
                let n = record.replaced.read_at(offset, buf, len);
                if n > 0 {
                    return n;
                }
            }
            cursor = record.next;
        }
        0
    }

    /// Marks the transaction committed, keeping `undo` for older readers.
    pub fn commit(mut self, undo: ReplacementMap) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let mut chain = self.seq.chain.write();
        let mut record = chain.unlink(slot);
        record.committed = true;
        record.replaced = undo;
        chain.push_back(record);
        chain.maintenance();
        trace!(live = chain.live, "sequencer commit");
    }
}

impl Drop for SequencerTx {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let mut chain = self.seq.chain.write();
            chain.unlink(slot);
            chain.maintenance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn undo(offset: u64, data: &[u8]) -> ReplacementMap {
        let mut map = ReplacementMap::new();
        map.write_at(offset, data, true).commit();
        map
    }

    /// Reads `len` bytes, substituting `fallback` where no overlay applies.
    fn read(tx: &SequencerTx, offset: u64, fallback: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut pos = offset;
        while (pos as usize) < fallback.len() {
            let mut buf = vec![0u8; fallback.len() - pos as usize];
            let mut len = buf.len();
            let n = tx.read_at(pos, &mut buf, &mut len);
            if n > 0 {
                out.extend_from_slice(&buf[..n]);
                pos += n as u64;
            } else {
                out.extend_from_slice(&fallback[pos as usize..pos as usize + len]);
                pos += len as u64;
            }
        }
        out
    }

    #[test]
    fn reader_sees_undo_of_later_commit() {
        let seq = TxSequencer::new();
        let reader = seq.begin();
        let writer = seq.begin();
        writer.commit(undo(0, b"AAAA"));

        // The file now holds "ABBA"; the reader still sees "AAAA".
        assert_eq!(read(&reader, 0, b"ABBA"), b"AAAA");
        let late = seq.begin();
        assert_eq!(read(&late, 0, b"ABBA"), b"ABBA");
    }

    #[test]
    fn earliest_later_commit_wins() {
        let seq = TxSequencer::new();
        let reader = seq.begin();
        seq.begin().commit(undo(0, b"v1"));
        seq.begin().commit(undo(0, b"v2"));

        assert_eq!(read(&reader, 0, b"v3"), b"v1");
    }

    #[test]
    fn open_transactions_after_anchor_are_ignored() {
        let seq = TxSequencer::new();
        let reader = seq.begin();
        let open = seq.begin();
        assert_eq!(read(&reader, 0, b"file"), b"file");
        drop(open);
    }

    #[test]
    fn maintenance_drops_unobservable_records() {
        let seq = TxSequencer::new();
        let reader = seq.begin();
        seq.begin().commit(undo(0, b"x"));
        seq.begin().commit(undo(0, b"y"));
        assert_eq!(seq.live_records(), 3);

        drop(reader);
        assert_eq!(seq.live_records(), 0);
    }

    #[test]
    fn committed_head_is_dropped_immediately() {
        let seq = TxSequencer::new();
        seq.begin().commit(undo(0, b"x"));
        assert_eq!(seq.live_records(), 0);
    }

    #[test]
    fn slots_are_reused() {
        let seq = TxSequencer::new();
        for _ in 0..10 {
            let tx = seq.begin();
            tx.commit(ReplacementMap::new());
        }
        assert_eq!(seq.chain.read().slots.len(), 1);
    }

    #[test]
    fn begin_with_runs_under_lock() {
        let seq = TxSequencer::new();
        let (tx, value) = seq.begin_with(|| 42);
        assert_eq!(value, 42);
        assert_eq!(seq.live_records(), 1);
        drop(tx);
    }

    #[test]
    fn partial_overlay_clips_passthrough() {
        let seq = TxSequencer::new();
        let reader = seq.begin();
        seq.begin().commit(undo(2, b"zz"));

        let mut buf = [0u8; 6];
        let mut len = 6;
        assert_eq!(reader.read_at(0, &mut buf, &mut len), 0);
        assert_eq!(len, 2);
        assert_eq!(read(&reader, 0, b"abcdef"), b"abzzef");
    }
}
