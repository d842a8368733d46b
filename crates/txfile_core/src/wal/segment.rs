//! WAL segment layout and scanning.
//!
//! ```text
//! | seq (4, BE) | record | record | ... | End (4) | unused ... |
//! ```
//!
//! A segment is scanned in full on open, so it is read into memory once and
//! iterated from there.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{WalRecord, WalRecordKind, END_RECORD_SIZE};
use txfile_storage::ByteStore;

/// Size of the segment header.
pub const SEGMENT_HEADER_SIZE: usize = 4;

/// Returns true if sequence `a` is newer than `b`.
///
/// The distance is read as a signed 32-bit delta, so sequences may wrap.
#[must_use]
pub fn seq_is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// A decoded segment.
#[derive(Debug)]
pub(crate) struct Segment {
    /// Sequence number from the header.
    pub seq: u32,
    /// Records in log order, each with its absolute store offset.
    /// The terminating `End` is not included.
    pub records: Vec<(u64, WalRecord)>,
}

impl Segment {
    /// Returns the position of the last `InvalidatePreviousWal`, if any.
    pub fn last_invalidation(&self) -> Option<usize> {
        self.records
            .iter()
            .rposition(|(_, r)| r.kind() == WalRecordKind::InvalidatePreviousWal)
    }
}

/// Iterator over the records of an in-memory segment image.
///
/// Yields `(offset, record)` until the `End` record. Running off the end of
/// the image without seeing `End` is corruption.
pub(crate) struct SegmentRecords<'a> {
    image: &'a [u8],
    base: u64,
    pos: usize,
    finished: bool,
}

impl<'a> SegmentRecords<'a> {
    /// Iterates `image`, which starts at absolute offset `base` and holds the
    /// record area of a segment (the header already stripped).
    pub fn new(image: &'a [u8], base: u64) -> Self {
        Self {
            image,
            base,
            pos: 0,
            finished: false,
        }
    }

    /// Returns the absolute offset of the next unread record.
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }
}

impl Iterator for SegmentRecords<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.pos + END_RECORD_SIZE > self.image.len() {
            self.finished = true;
            return Some(Err(CoreError::wal_corrupted(
                "WAL segment has no end record",
            )));
        }

        let offset = self.offset();
        match WalRecord::decode(&self.image[self.pos..]) {
            Ok((WalRecord::End, _)) => {
                self.finished = true;
                None
            }
            Ok((record, used)) => {
                self.pos += used;
                Some(Ok((offset, record)))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads the sequence number at the start of a segment.
///
/// # Errors
///
/// Returns `WalCorrupted` if the store ends inside the header.
pub(crate) fn read_header(store: &dyn ByteStore, slot_start: u64) -> CoreResult<u32> {
    let mut header = [0u8; SEGMENT_HEADER_SIZE];
    read_slot(store, slot_start, &mut header)?;
    Ok(u32::from_be_bytes(header))
}

/// Reads and decodes the segment in `[slot_start, slot_start + slot_len)`.
///
/// # Errors
///
/// Returns `WalCorrupted` if the segment cannot be read in full or holds a
/// malformed record, and `Storage` on I/O errors.
pub(crate) fn read_segment(
    store: &dyn ByteStore,
    slot_start: u64,
    slot_len: u64,
) -> CoreResult<Segment> {
    let mut image = vec![0u8; slot_len as usize];
    read_slot(store, slot_start, &mut image)?;

    let seq = u32::from_be_bytes([image[0], image[1], image[2], image[3]]);
    let body = &image[SEGMENT_HEADER_SIZE..];
    let records = SegmentRecords::new(body, slot_start + SEGMENT_HEADER_SIZE as u64)
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(Segment { seq, records })
}

/// Encodes a full segment prefix: header, `records`, then `End`.
///
/// # Errors
///
/// Propagates record encoding errors.
pub(crate) fn encode_segment(seq: u32, records: &[WalRecord]) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(
        SEGMENT_HEADER_SIZE
            + END_RECORD_SIZE
            + records.iter().map(WalRecord::encoded_len).sum::<usize>(),
    );
    buf.extend_from_slice(&seq.to_be_bytes());
    for record in records {
        record.encode_into(&mut buf)?;
    }
    WalRecord::End.encode_into(&mut buf)?;
    Ok(buf)
}

fn read_slot(store: &dyn ByteStore, offset: u64, buf: &mut [u8]) -> CoreResult<()> {
    store.read_exact_at(offset, buf).map_err(|e| match e {
        txfile_storage::StorageError::ReadPastEnd { size, .. } => CoreError::wal_corrupted(format!(
            "WAL segment at {offset} is truncated, store holds {size} bytes"
        )),
        other => CoreError::Storage(other),
    })
}
