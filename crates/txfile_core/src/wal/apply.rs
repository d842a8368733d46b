//! Committed file state and the effect of a transaction on it.
//!
//! Commit and recovery both go through [`TxEffect`], so a replayed
//! transaction lands exactly like it did at runtime.

use crate::error::{CoreError, CoreResult};
use crate::replacement_map::ReplacementMap;
use crate::wal::record::WalRecord;
use bytes::Bytes;
use txfile_storage::ByteStore;

/// Committed view of the logical file.
#[derive(Debug, Default)]
pub(crate) struct FileState {
    /// Committed bytes not yet written to the store.
    pub repl: ReplacementMap,
    /// Logical file size.
    pub size: u64,
    /// Logical bytes physically present in the store past the WAL.
    /// May exceed `size` after a shrink; those bytes are stale.
    pub data_size: u64,
}

impl FileState {
    /// Reads committed bytes at `offset` into `buf`.
    ///
    /// The caller keeps `offset + buf.len()` within `size`. Returns the
    /// number of bytes read, which is non-zero for a non-empty `buf`.
    pub fn read(
        &self,
        store: &dyn ByteStore,
        wal_end: u64,
        offset: u64,
        buf: &mut [u8],
    ) -> CoreResult<usize> {
        let mut len = buf.len();
        let n = self.repl.read_at(offset, buf, &mut len);
        if n > 0 || len == 0 {
            return Ok(n);
        }

        if offset < self.data_size {
            let file_len = (self.data_size - offset).min(len as u64) as usize;
            let n = store.read_at(wal_end + offset, &mut buf[..file_len])?;
            if n > 0 {
                return Ok(n);
            }
            len = file_len;
        }
        buf[..len].fill(0);
        Ok(len)
    }

    /// Reads exactly `buf.len()` committed bytes at `offset`, with zeroes
    /// past the logical size.
    pub fn read_exact(
        &self,
        store: &dyn ByteStore,
        wal_end: u64,
        offset: u64,
        buf: &mut [u8],
    ) -> CoreResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            if pos >= self.size {
                buf[done..].fill(0);
                break;
            }
            let want = (self.size - pos).min((buf.len() - done) as u64) as usize;
            done += self.read(store, wal_end, pos, &mut buf[done..done + want])?;
        }
        Ok(())
    }
}

/// The net change a transaction makes to a [`FileState`].
#[derive(Debug)]
pub(crate) struct TxEffect {
    /// Bytes to lay over the committed state.
    writes: ReplacementMap,
    /// Smallest size the file passed through.
    floor: u64,
    /// Size after the transaction.
    final_size: u64,
    /// Whether a `Copy` record was involved.
    has_copy: bool,
}

impl TxEffect {
    /// Evaluates `ops` in log order against `state`.
    ///
    /// A `Copy` reads its source through the transaction's own earlier
    /// writes, then the committed state.
    pub fn build(
        ops: &[WalRecord],
        state: &FileState,
        store: &dyn ByteStore,
        wal_end: u64,
    ) -> CoreResult<Self> {
        let mut writes = ReplacementMap::new();
        let mut size = state.size;
        let mut floor = state.size;
        let mut has_copy = false;

        for op in ops {
            match op {
                WalRecord::Write { offset, data, .. } => {
                    writes.write_bytes_at(*offset, data.clone(), true).commit();
                }
                WalRecord::Resize { new_size, .. } => {
                    size = *new_size;
                    floor = floor.min(size);
                    writes.truncate(size);
                }
                WalRecord::Copy { src, dst, len, .. } => {
                    let len = usize::try_from(*len).map_err(|_| {
                        CoreError::wal_corrupted(format!("copy of {len} bytes does not fit in memory"))
                    })?;
                    let mut data = vec![0u8; len];
                    read_through(&writes, floor, state, store, wal_end, *src, &mut data)?;
                    writes.write_bytes_at(*dst, Bytes::from(data), true).commit();
                    has_copy = true;
                }
                WalRecord::End | WalRecord::Commit { .. } | WalRecord::InvalidatePreviousWal => {}
            }
        }
        writes.truncate(size);

        Ok(Self {
            writes,
            floor,
            final_size: size,
            has_copy,
        })
    }

    /// Captures the committed bytes this effect will change.
    ///
    /// Everything from the floor up to the current size is taken, including
    /// the tail a shrink cuts off. Ranges past the current size are recorded
    /// as zeroes.
    pub fn undo(
        &self,
        state: &FileState,
        store: &dyn ByteStore,
        wal_end: u64,
    ) -> CoreResult<ReplacementMap> {
        let mut undo = ReplacementMap::new();
        let mut capture = |offset: u64, len: u64| -> CoreResult<()> {
            if len == 0 {
                return Ok(());
            }
            let mut buf = vec![0u8; len as usize];
            state.read_exact(store, wal_end, offset, &mut buf)?;
            undo.write_bytes_at(offset, Bytes::from(buf), false).commit();
            Ok(())
        };

        for (offset, data) in self.writes.iter() {
            capture(offset, data.len() as u64)?;
        }
        if self.floor < state.size {
            capture(self.floor, state.size - self.floor)?;
        }
        Ok(undo)
    }

    /// Returns true if the transaction copied bytes.
    pub fn has_copy(&self) -> bool {
        self.has_copy
    }

    /// Installs the effect. Never fails.
    pub fn apply(self, state: &mut FileState) {
        state.repl.truncate(self.floor);

        // Stale store bytes between the floor and the new size read as zero.
        let stale_end = self.final_size.min(state.data_size);
        if self.floor < stale_end {
            let zeroes = Bytes::from(vec![0u8; (stale_end - self.floor) as usize]);
            state.repl.write_bytes_at(self.floor, zeroes, true).commit();
        }

        for (offset, data) in self.writes.iter() {
            state.repl.write_bytes_at(offset, data.clone(), true).commit();
        }
        state.size = self.final_size;
        state.repl.truncate(self.final_size);
    }
}

/// Reads `buf.len()` bytes at `offset` as seen from inside a transaction:
/// its own writes first, zeroes at or past `floor`, else committed bytes.
fn read_through(
    local: &ReplacementMap,
    floor: u64,
    state: &FileState,
    store: &dyn ByteStore,
    wal_end: u64,
    offset: u64,
    buf: &mut [u8],
) -> CoreResult<()> {
    let mut done = 0;
    while done < buf.len() {
        let pos = offset + done as u64;
        let mut len = buf.len() - done;
        let n = local.read_at(pos, &mut buf[done..], &mut len);
        if n > 0 {
            done += n;
            continue;
        }
        if pos >= floor {
            buf[done..done + len].fill(0);
            done += len;
            continue;
        }
        let len = (floor - pos).min(len as u64) as usize;
        state.read_exact(store, wal_end, pos, &mut buf[done..done + len])?;
        done += len;
    }
    Ok(())
}
