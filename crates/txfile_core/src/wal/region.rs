//! The WAL region and its transactions.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::replacement_map::ReplacementMap;
use crate::stats::WalStats;
use crate::types::WalTxId;
use crate::wal::apply::{FileState, TxEffect};
use crate::wal::record::{WalRecord, WalRecordKind, END_RECORD_SIZE};
use crate::wal::segment::{
    encode_segment, read_header, read_segment, seq_is_newer, SEGMENT_HEADER_SIZE,
};
use crate::wal::txid::TxIdStates;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use txfile_storage::ByteStore;

const END_MARKER: [u8; END_RECORD_SIZE] = [0; END_RECORD_SIZE];

/// Append position in the active segment.
#[derive(Debug)]
struct LogState {
    /// Active slot, 0 or 1.
    slot: usize,
    /// Absolute offset of the active segment's `End` record.
    slot_off: u64,
    /// Sequence number of the active segment.
    seq: u32,
    /// A `Copy` commit is still waiting for its compaction.
    copy_barrier_pending: bool,
}

/// A byte store fronted by a two-segment write-ahead log.
///
/// The first `wal_len` bytes after `wal_offset` hold the log. Logical file
/// offsets start right after it.
///
/// # Locking
///
/// Three locks, always taken in this order:
///
/// 1. `log`: appends and compaction
/// 2. `main`: the committed [`FileState`]
/// 3. `alloc`: transaction id states
///
/// Readers only take `main` for reading. Sequencer locks nest inside
/// `main`: transactions join the sequencer under its read lock and commits
/// hand over their undo maps under its write lock.
pub struct WalRegion {
    name: String,
    store: Arc<dyn ByteStore>,
    wal_offset: u64,
    segment_len: u64,
    compact_after_copy: bool,
    log: Mutex<LogState>,
    main: RwLock<FileState>,
    alloc: Mutex<TxIdStates>,
    stats: WalStats,
}

impl std::fmt::Debug for WalRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalRegion")
            .field("name", &self.name)
            .field("wal_offset", &self.wal_offset)
            .field("segment_len", &self.segment_len)
            .finish_non_exhaustive()
    }
}

impl WalRegion {
    /// Initializes an empty file in `store`.
    ///
    /// Slot 0 becomes the active segment. The store is sized to end exactly
    /// at the WAL region, so the logical file is empty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad configuration, or a storage error.
    pub fn create(store: Arc<dyn ByteStore>, config: &Config) -> CoreResult<Arc<Self>> {
        config.validate()?;
        let region = Self::new(store, config, FileState::default());

        region.store.truncate(config.wal_end())?;
        let active = encode_segment(0, &[WalRecord::InvalidatePreviousWal])?;
        let inactive = encode_segment(u32::MAX, &[])?;
        region.store.write_at(region.slot_start(0), &active)?;
        region.store.write_at(region.slot_start(1), &inactive)?;
        region.flush()?;

        {
            let mut log = region.log.lock();
            log.slot = 0;
            log.slot_off = region.slot_start(0) + (active.len() - END_RECORD_SIZE) as u64;
            log.seq = 0;
        }

        info!(
            name = %region.name,
            wal_offset = config.wal_offset,
            wal_len = config.wal_len,
            "created transactional file"
        );
        Ok(Arc::new(region))
    }

    /// Opens an existing file, replaying its WAL.
    ///
    /// Committed transactions found in the log are written to the store,
    /// uncommitted ones are discarded, and a fresh segment is started.
    ///
    /// # Errors
    ///
    /// Returns `WalCorrupted` if the log cannot be read or decoded. The file
    /// must not be used in that case.
    pub fn open(store: Arc<dyn ByteStore>, config: &Config) -> CoreResult<Arc<Self>> {
        config.validate()?;
        let region = Self::new(store, config, FileState::default());
        region.recover().inspect_err(|e| {
            if e.is_fatal() {
                error!(name = %region.name, error = %e, "WAL recovery failed");
            }
        })?;
        Ok(Arc::new(region))
    }

    fn new(store: Arc<dyn ByteStore>, config: &Config, state: FileState) -> Self {
        Self {
            name: config.name.clone(),
            store,
            wal_offset: config.wal_offset,
            segment_len: config.segment_len(),
            compact_after_copy: config.compact_after_copy,
            log: Mutex::new(LogState {
                slot: 0,
                slot_off: 0,
                seq: 0,
                copy_barrier_pending: false,
            }),
            main: RwLock::new(state),
            alloc: Mutex::new(TxIdStates::new()),
            stats: WalStats::new(),
        }
    }

    /// Returns the label used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    /// Returns the store offset of logical offset 0.
    #[must_use]
    pub fn wal_end(&self) -> u64 {
        self.wal_offset + 2 * self.segment_len
    }

    /// Returns the committed logical file size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.main.read().size
    }

    /// Returns the WAL counters.
    #[must_use]
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Runs `f` with the committed size while commits are blocked.
    pub(crate) fn with_committed_size<R>(&self, f: impl FnOnce(u64) -> R) -> R {
        let state = self.main.read();
        f(state.size)
    }

    /// Starts a write transaction.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if every transaction id is in use and compaction
    /// cannot free any.
    pub fn begin(self: &Arc<Self>) -> CoreResult<WalTransaction> {
        let tx_id = self.allocate_tx_id()?;
        debug!(name = %self.name, %tx_id, "began WAL transaction");
        Ok(WalTransaction {
            region: Arc::clone(self),
            tx_id,
            writes: ReplacementMap::new(),
            ops: Vec::new(),
            base_size: None,
            new_size: None,
            floor: None,
            finished: false,
        })
    }

    /// Reads committed bytes at logical `offset`.
    ///
    /// Returns 0 at or past the end of the file.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> CoreResult<usize> {
        self.read_at_with(offset, buf, None, |_, _, _| 0)
    }

    /// Reads committed bytes, consulting `intermediate` first.
    ///
    /// `intermediate` runs under the same read lock as the committed read,
    /// so no commit can land between the two. It follows the
    /// [`ReplacementMap::read_at`] contract.
    ///
    /// With `snapshot_size` set, the read is bounded by that size instead of
    /// the committed one. Bytes past the committed size are then expected
    /// from `intermediate`; whatever it does not supply reads as zero.
    pub(crate) fn read_at_with<F>(
        &self,
        offset: u64,
        buf: &mut [u8],
        snapshot_size: Option<u64>,
        mut intermediate: F,
    ) -> CoreResult<usize>
    where
        F: FnMut(u64, &mut [u8], &mut usize) -> usize,
    {
        let state = self.main.read();
        let size = snapshot_size.unwrap_or(state.size);
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let mut len = (size - offset).min(buf.len() as u64) as usize;
        let n = intermediate(offset, &mut buf[..len], &mut len);
        if n > 0 {
            return Ok(n);
        }
        if offset >= state.size {
            buf[..len].fill(0);
            return Ok(len);
        }
        let len = (state.size - offset).min(len as u64) as usize;
        state.read(self.store.as_ref(), self.wal_end(), offset, &mut buf[..len])
    }

    /// Writes the committed overlay to the store and starts a new segment.
    ///
    /// Records of running transactions move to the new segment. Does nothing
    /// if no transaction finished since the last compaction.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if the running transactions' records do not fit in
    /// a segment, or a storage error.
    pub fn compact(&self) -> CoreResult<()> {
        let mut log = self.log.lock();
        self.compact_locked(&mut log)
    }

    fn slot_start(&self, slot: usize) -> u64 {
        self.wal_offset + slot as u64 * self.segment_len
    }

    fn slot_end(&self, slot: usize) -> u64 {
        self.slot_start(slot) + self.segment_len
    }

    fn flush(&self) -> CoreResult<()> {
        self.store.flush()?;
        self.stats.record_flush();
        Ok(())
    }

    /// Writes a segment body, flushes, then writes its header.
    ///
    /// Until the header lands the slot still carries its old sequence
    /// number, so a torn write is never mistaken for the newer segment.
    fn write_segment(&self, slot: usize, image: &[u8], flush_header: bool) -> CoreResult<()> {
        let start = self.slot_start(slot);
        self.store
            .write_at(start + SEGMENT_HEADER_SIZE as u64, &image[SEGMENT_HEADER_SIZE..])?;
        self.flush()?;
        self.store.write_at(start, &image[..SEGMENT_HEADER_SIZE])?;
        if flush_header {
            self.flush()?;
        }
        Ok(())
    }

    fn recover(&self) -> CoreResult<()> {
        let wal_end = self.wal_end();
        let store_size = self.store.size()?;
        if store_size < wal_end {
            return Err(CoreError::wal_corrupted(format!(
                "file holds {store_size} bytes, WAL region ends at {wal_end}"
            )));
        }

        let seq0 = read_header(self.store.as_ref(), self.slot_start(0))?;
        let seq1 = read_header(self.store.as_ref(), self.slot_start(1))?;
        if seq0 == seq1 {
            return Err(CoreError::wal_corrupted(format!(
                "both WAL segments carry sequence {seq0}"
            )));
        }
        let newer = if seq_is_newer(seq1, seq0) { 1 } else { 0 };
        let older = 1 - newer;

        let newer_seg = read_segment(self.store.as_ref(), self.slot_start(newer), self.segment_len)?;
        let newer_seq = newer_seg.seq;
        let replay: Vec<WalRecord> = match newer_seg.last_invalidation() {
            Some(pos) => newer_seg
                .records
                .into_iter()
                .skip(pos + 1)
                .map(|(_, r)| r)
                .collect(),
            None => {
                // The newer segment builds on the older one.
                let older_seg =
                    read_segment(self.store.as_ref(), self.slot_start(older), self.segment_len)?;
                let mut all: Vec<WalRecord> = older_seg
                    .records
                    .into_iter()
                    .chain(newer_seg.records)
                    .map(|(_, r)| r)
                    .collect();
                if let Some(pos) = all
                    .iter()
                    .rposition(|r| r.kind() == WalRecordKind::InvalidatePreviousWal)
                {
                    all.drain(..=pos);
                }
                all
            }
        };

        let data_size = store_size - wal_end;
        let mut state = FileState {
            repl: ReplacementMap::new(),
            size: data_size,
            data_size,
        };
        let mut pending: HashMap<WalTxId, Vec<WalRecord>> = HashMap::new();
        let mut committed = 0usize;
        let replayed = replay.len();
        for record in replay {
            match record.kind() {
                WalRecordKind::End | WalRecordKind::InvalidatePreviousWal => {}
                WalRecordKind::Commit => {
                    let ops = pending.remove(&record.tx_id()).unwrap_or_default();
                    TxEffect::build(&ops, &state, self.store.as_ref(), wal_end)?.apply(&mut state);
                    committed += 1;
                }
                WalRecordKind::Write | WalRecordKind::Resize | WalRecordKind::Copy => {
                    pending.entry(record.tx_id()).or_default().push(record);
                }
            }
        }

        for (offset, data) in state.repl.iter() {
            self.store.write_at(wal_end + offset, data)?;
        }
        self.store.truncate(wal_end + state.size)?;
        state.repl.clear();
        state.data_size = state.size;
        self.flush()?;

        let seq = newer_seq.wrapping_add(1);
        let image = encode_segment(seq, &[WalRecord::InvalidatePreviousWal])?;
        self.write_segment(older, &image, true)?;

        info!(
            name = %self.name,
            segment = newer,
            seq = newer_seq,
            records = replayed,
            committed,
            discarded = pending.len(),
            size = state.size,
            "recovered WAL"
        );

        *self.main.write() = state;
        let mut log = self.log.lock();
        log.slot = older;
        log.slot_off = self.slot_start(older) + (image.len() - END_RECORD_SIZE) as u64;
        log.seq = seq;
        Ok(())
    }

    fn allocate_tx_id(&self) -> CoreResult<WalTxId> {
        if let Some(id) = self.alloc.lock().allocate() {
            return Ok(id);
        }

        let mut log = self.log.lock();
        if self.alloc.lock().completed() == 0 {
            return Err(CoreError::wal_full("ran out of WAL transaction ids"));
        }
        self.compact_locked(&mut log)?;
        self.alloc
            .lock()
            .allocate()
            .ok_or_else(|| CoreError::wal_full("ran out of WAL transaction ids"))
    }

    /// Makes room for `needed` bytes plus an `End` record in the active
    /// segment, compacting once if necessary.
    ///
    /// Nothing is appended behind a `Copy` commit until the compaction that
    /// follows it has succeeded.
    fn reserve_locked(&self, log: &mut LogState, needed: usize) -> CoreResult<()> {
        if log.copy_barrier_pending {
            debug!(name = %self.name, "retrying compaction after copy");
            self.compact_locked(log)?;
        }
        let needed = (needed + END_RECORD_SIZE) as u64;
        if self.slot_end(log.slot) - log.slot_off < needed {
            self.compact_locked(log)?;
            if self.slot_end(log.slot) - log.slot_off < needed {
                return Err(CoreError::wal_full("no space in WAL"));
            }
        }
        Ok(())
    }

    /// Appends a transaction record.
    ///
    /// The payload and a new `End` go in first and are flushed, then the
    /// old `End` is overwritten with the record's discriminant. A crash at
    /// any point leaves a well-formed segment.
    fn append(&self, record: &WalRecord) -> CoreResult<()> {
        let encoded = record.encode()?;
        let mut log = self.log.lock();
        self.reserve_locked(&mut log, encoded.len())?;

        let mut tail = Vec::with_capacity(encoded.len());
        tail.extend_from_slice(&encoded[END_RECORD_SIZE..]);
        tail.extend_from_slice(&END_MARKER);
        self.store.write_at(log.slot_off + END_RECORD_SIZE as u64, &tail)?;
        self.flush()?;
        self.store.write_at(log.slot_off, &encoded[..END_RECORD_SIZE])?;

        log.slot_off += encoded.len() as u64;
        self.stats.record_write();
        Ok(())
    }

    fn commit_tx<F>(&self, tx: &WalTransaction, on_undo: F) -> CoreResult<()>
    where
        F: FnOnce(ReplacementMap),
    {
        let marker = WalRecord::Commit { tx_id: tx.tx_id }.encode()?;
        let wal_end = self.wal_end();

        let mut log = self.log.lock();
        self.reserve_locked(&mut log, marker.len())?;

        let mut state = self.main.write();
        let effect = TxEffect::build(&tx.ops, &state, self.store.as_ref(), wal_end)?;
        let undo = effect.undo(&state, self.store.as_ref(), wal_end)?;

        self.store
            .write_at(log.slot_off + END_RECORD_SIZE as u64, &END_MARKER)?;
        self.flush()?;

        {
            let mut ids = self.alloc.lock();
            self.store.write_at(log.slot_off, &marker)?;
            // The commit is in the log now. A failed flush cannot be undone
            // here; the next flush will carry it.
            match self.store.flush() {
                Ok(()) => self.stats.record_flush(),
                Err(e) => warn!(name = %self.name, tx_id = %tx.tx_id, error = %e, "failed to flush WAL commit"),
            }
            log.slot_off += marker.len() as u64;
            ids.complete(tx.tx_id);
        }

        let has_copy = effect.has_copy();
        effect.apply(&mut state);
        self.stats.record_commit();
        self.stats.record_write();
        debug!(name = %self.name, tx_id = %tx.tx_id, size = state.size, "committed WAL transaction");
        on_undo(undo);
        drop(state);

        if has_copy && self.compact_after_copy {
            if let Err(e) = self.compact_locked(&mut log) {
                warn!(name = %self.name, error = %e, "compaction after copy failed, retrying before next append");
                log.copy_barrier_pending = true;
            }
        }
        Ok(())
    }

    fn rollback_tx(&self, tx_id: WalTxId) {
        self.alloc.lock().complete(tx_id);
        debug!(name = %self.name, %tx_id, "rolled back WAL transaction");
    }

    fn compact_locked(&self, log: &mut LogState) -> CoreResult<()> {
        let running: BTreeSet<u32> = {
            let ids = self.alloc.lock();
            if ids.completed() == 0 {
                log.copy_barrier_pending = false;
                return Ok(());
            }
            ids.active_ids().collect()
        };

        let current = read_segment(self.store.as_ref(), self.slot_start(log.slot), self.segment_len)?;
        let mut records = vec![WalRecord::InvalidatePreviousWal];
        records.extend(current.records.into_iter().map(|(_, r)| r).filter(|r| {
            !r.kind().is_global()
                && r.kind() != WalRecordKind::Commit
                && running.contains(&r.tx_id().as_u32())
        }));

        let new_slot = 1 - log.slot;
        let new_seq = log.seq.wrapping_add(1);
        let image = encode_segment(new_seq, &records)?;
        if image.len() as u64 > self.segment_len {
            return Err(CoreError::wal_full(
                "running transactions do not fit in a WAL segment",
            ));
        }
        self.store.write_at(
            self.slot_start(new_slot) + SEGMENT_HEADER_SIZE as u64,
            &image[SEGMENT_HEADER_SIZE..],
        )?;

        let wal_end = self.wal_end();
        let size = {
            let mut state = self.main.write();
            for (offset, data) in state.repl.iter() {
                self.store.write_at(wal_end + offset, data)?;
            }
            self.store.truncate(wal_end + state.size)?;
            state.repl.clear();
            state.data_size = state.size;
            state.size
        };
        self.flush()?;

        // Both segments now describe the same file, so the header needs no
        // flush of its own.
        self.store
            .write_at(self.slot_start(new_slot), &image[..SEGMENT_HEADER_SIZE])?;

        self.alloc.lock().recycle(&running);

        log.slot = new_slot;
        log.slot_off = self.slot_start(new_slot) + (image.len() - END_RECORD_SIZE) as u64;
        log.seq = new_seq;
        log.copy_barrier_pending = false;
        self.stats.record_compaction();
        info!(
            name = %self.name,
            slot = new_slot,
            seq = new_seq,
            kept_records = records.len() - 1,
            size,
            "compacted WAL"
        );
        Ok(())
    }
}

/// A write transaction against a [`WalRegion`].
///
/// Every change is logged as it is made and staged in a private overlay.
/// Nothing is visible to other readers until [`WalTransaction::commit`].
/// Dropping the transaction rolls it back.
#[derive(Debug)]
pub struct WalTransaction {
    region: Arc<WalRegion>,
    tx_id: WalTxId,
    writes: ReplacementMap,
    ops: Vec<WalRecord>,
    /// Committed size when the transaction's snapshot was taken.
    base_size: Option<u64>,
    new_size: Option<u64>,
    /// Smallest size set by this transaction.
    floor: Option<u64>,
    finished: bool,
}

impl WalTransaction {
    /// Returns the WAL id of this transaction.
    #[must_use]
    pub fn tx_id(&self) -> WalTxId {
        self.tx_id
    }

    /// Returns the file size as seen by this transaction.
    ///
    /// Until the transaction resizes the file this is the size it was
    /// pinned to, or the live committed size if it was never pinned.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.new_size
            .or(self.base_size)
            .unwrap_or_else(|| self.region.size())
    }

    /// Pins the size reads fall back to, taken with the caller's snapshot.
    pub(crate) fn pin_size(&mut self, size: u64) {
        self.base_size = Some(size);
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the write extends past [`Self::size`],
    /// or `WalFull` if the log has no room.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.check_range(offset, data.len() as u64, "write")?;
        self.write_unchecked(offset, Bytes::copy_from_slice(data))
    }

    /// Writes the same `data` at each of `offsets`.
    ///
    /// All ranges are checked before anything is logged.
    ///
    /// # Errors
    ///
    /// See [`Self::write_at`].
    pub fn write_at_many(&mut self, offsets: &[u64], data: &[u8]) -> CoreResult<()> {
        for offset in offsets {
            self.check_range(*offset, data.len() as u64, "write")?;
        }
        let data = Bytes::copy_from_slice(data);
        for offset in offsets {
            self.write_unchecked(*offset, data.clone())?;
        }
        Ok(())
    }

    /// Sets the file size.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if the log has no room.
    pub fn resize(&mut self, new_size: u64) -> CoreResult<()> {
        let record = WalRecord::Resize {
            tx_id: self.tx_id,
            new_size,
        };
        self.region.append(&record)?;
        self.writes.truncate(new_size);
        self.new_size = Some(new_size);
        self.floor = Some(self.floor.map_or(new_size, |f| f.min(new_size)));
        self.ops.push(record);
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either range extends past
    /// [`Self::size`], or `WalFull` if the log has no room.
    pub fn copy(&mut self, src: u64, dst: u64, len: u64) -> CoreResult<()> {
        self.copy_with(src, dst, len, |_, _, _| 0)
    }

    pub(crate) fn copy_with<F>(&mut self, src: u64, dst: u64, len: u64, mut intermediate: F) -> CoreResult<()>
    where
        F: FnMut(u64, &mut [u8], &mut usize) -> usize,
    {
        self.check_range(src, len, "copy source")?;
        self.check_range(dst, len, "copy destination")?;
        let buf_len = usize::try_from(len)
            .map_err(|_| CoreError::invalid_argument(format!("copy of {len} bytes is too large")))?;

        let mut data = vec![0u8; buf_len];
        let mut done = 0;
        while done < buf_len {
            let n = self.read_at_with(src + done as u64, &mut data[done..], &mut intermediate)?;
            if n == 0 {
                break;
            }
            done += n;
        }

        let record = WalRecord::Copy {
            tx_id: self.tx_id,
            src,
            dst,
            len,
        };
        self.region.append(&record)?;
        self.writes.write_bytes_at(dst, Bytes::from(data), true).commit();
        self.ops.push(record);
        Ok(())
    }

    /// Reads bytes as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> CoreResult<usize> {
        self.read_at_with(offset, buf, |_, _, _| 0)
    }

    /// Reads bytes as seen by this transaction, consulting `intermediate`
    /// between the transaction's own writes and the committed file.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn read_at_with<F>(&self, offset: u64, buf: &mut [u8], intermediate: F) -> CoreResult<usize>
    where
        F: FnMut(u64, &mut [u8], &mut usize) -> usize,
    {
        let size = self.size();
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let mut len = (size - offset).min(buf.len() as u64) as usize;
        let n = self.writes.read_at(offset, buf, &mut len);
        if n > 0 {
            return Ok(n);
        }

        if let Some(floor) = self.floor {
            if offset >= floor {
                buf[..len].fill(0);
                return Ok(len);
            }
            len = (floor - offset).min(len as u64) as usize;
        }

        let n = self
            .region
            .read_at_with(offset, &mut buf[..len], self.base_size, intermediate)?;
        if n > 0 {
            return Ok(n);
        }
        // Grown by this transaction.
        buf[..len].fill(0);
        Ok(len)
    }

    /// Commits, handing the undo map to `on_undo` while commits are blocked.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if the commit record does not fit, or a storage
    /// error. The transaction is rolled back on error.
    pub fn commit_with<F>(mut self, on_undo: F) -> CoreResult<()>
    where
        F: FnOnce(ReplacementMap),
    {
        let region = Arc::clone(&self.region);
        region.commit_tx(&self, on_undo)?;
        self.finished = true;
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// See [`Self::commit_with`].
    pub fn commit(self) -> CoreResult<()> {
        self.commit_with(|_| {})
    }

    /// Rolls the transaction back.
    pub fn rollback(self) {
        drop(self);
    }

    fn check_range(&self, offset: u64, len: u64, what: &str) -> CoreResult<()> {
        let size = self.size();
        if offset > size || size - offset < len {
            return Err(CoreError::invalid_argument(format!(
                "{what} of {len} bytes at {offset} is past end of file (size {size})"
            )));
        }
        Ok(())
    }

    fn write_unchecked(&mut self, offset: u64, data: Bytes) -> CoreResult<()> {
        let record = WalRecord::Write {
            tx_id: self.tx_id,
            offset,
            data,
        };
        self.region.append(&record)?;
        if let WalRecord::Write { data, .. } = &record {
            self.writes.write_bytes_at(offset, data.clone(), true).commit();
        }
        self.ops.push(record);
        Ok(())
    }
}

impl Drop for WalTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.region.rollback_tx(self.tx_id);
        }
    }
}
