//! # txfile Core
//!
//! Transactional file engine.
//!
//! This crate provides:
//! - A two-segment write-ahead log with crash recovery and compaction
//! - Replacement maps: in-memory byte overlays
//! - A sequencer giving every transaction a repeatable-read snapshot
//! - A commit manager that applies writes one at a time, in commit-id order
//! - A persistent id sequence
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use txfile_core::{Config, TxFile};
//! use txfile_storage::FileStore;
//!
//! let store = Arc::new(FileStore::open("data.tx")?);
//! let file = TxFile::open(store, Config::default().name("metrics"))?;
//!
//! let mut tx = file.begin()?;
//! tx.resize(8)?;
//! tx.write_at(0, b"metrics!")?;
//! tx.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod commit_manager;
mod config;
mod error;
pub mod replacement_map;
pub mod sequence;
pub mod sequencer;
mod stats;
mod txfile;
mod types;
pub mod wal;

pub use commit_manager::{CommitId, CommitManager, WriteTicket};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use replacement_map::{ReplacementMap, ReplacementTx};
pub use sequence::Sequence;
pub use sequencer::{SequencerTx, TxSequencer};
pub use stats::{StatsSnapshot, WalStats};
pub use txfile::{Transaction, TxFile};
pub use types::WalTxId;
pub use wal::{WalRecord, WalRecordKind, WalRegion, WalTransaction};
