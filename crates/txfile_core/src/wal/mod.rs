//! Write-ahead log for transactional byte files.
//!
//! The WAL occupies a fixed region of the byte store, split into two equal
//! segments. One segment is active and receives appends; the other holds the
//! previous generation until the next compaction overwrites it. Logical file
//! offsets start right after the region.
//!
//! ## Record Format
//!
//! Every record starts with a big-endian 32-bit discriminant:
//!
//! ```text
//! | tx_id (24 bits) | tag (8 bits) | payload ... |
//! ```
//!
//! | tag | record       | payload                                   |
//! |-----|--------------|-------------------------------------------|
//! | 0   | End          | none                                      |
//! | 1   | Commit       | none                                      |
//! | 9   | Invalidate   | none, tx id is 0                          |
//! | 10  | Write        | offset (8), len (4), data padded to 4     |
//! | 11  | Resize       | new size (8)                              |
//! | 12  | Copy         | src (8), dst (8), len (8)                 |
//!
//! A segment is a 4-byte sequence number followed by records and an `End`.
//! The segment with the newer sequence number is the most recent one.
//!
//! ## Appending
//!
//! A record's payload and a fresh `End` are written past the current `End`
//! and flushed before the old `End` is overwritten with the record's
//! discriminant. A crash at any point leaves a segment that parses.
//!
//! ## Recovery Policy
//!
//! On open, the newer segment is read. If it carries an `Invalidate`, only
//! records after its last one are replayed. Otherwise the older segment is
//! read first and records after the last `Invalidate` of the two replay.
//! Transactions with a `Commit` are applied in commit order; the rest are
//! discarded. The result is written to the store and a fresh segment
//! starting with `Invalidate` replaces the older one.
//!
//! Recovery is idempotent: replaying the same log twice gives the same file.
//!
//! ### Fatal Conditions (open fails with `WalCorrupted`)
//!
//! - Store shorter than the WAL region
//! - Both segment headers carry the same sequence number
//! - Unknown record tag, or a record running past its segment
//! - A segment with no `End`
//!
//! ## Compaction
//!
//! Compaction writes the committed overlay to the store, then starts the
//! other segment with `Invalidate` followed by the records of transactions
//! still running. Transaction ids finished before the compaction become
//! reusable.

mod apply;
mod record;
mod region;
mod segment;
mod txid;

pub use record::{WalRecord, WalRecordKind, END_RECORD_SIZE};
pub use region::{WalRegion, WalTransaction};
pub use segment::{seq_is_newer, SEGMENT_HEADER_SIZE};
