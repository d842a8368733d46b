//! Commit ordering and commit ids.
//!
//! The [`CommitManager`] hands out strictly increasing [`CommitId`]s and
//! applies write transactions one at a time, in id order. Readers take the
//! id of the last applied commit and never wait for writers.
//!
//! ## Header Format
//!
//! ```text
//! | magic (4) | tx_start (4) | last_write (4) | completed (4) |
//! ```
//!
//! All fields are big-endian. `last_write` is the end of the current id
//! reservation, not the last id handed out, so an id is never reused after a
//! crash. `completed` is written by each applied commit.
//!
//! ## Commit Flow
//!
//! ```rust,ignore
//! let mut ticket = manager.prepare_commit(&file)?;
//! ticket.write_at(offset, &bytes)?;
//! ticket.apply(
//!     || check_conflicts(),
//!     || publish_in_memory(),
//! )?;
//! ```
//!
//! `apply` waits until every earlier ticket was applied or dropped, runs the
//! validation, commits, then runs the second phase. Dropping a ticket gives
//! up its turn without blocking later tickets.

mod commit_id;
mod manager;

pub use commit_id::CommitId;
pub use manager::{CommitManager, WriteTicket};
