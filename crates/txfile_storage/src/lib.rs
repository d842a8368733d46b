//! # txfile Storage
//!
//! Byte store trait and implementations for txfile.
//!
//! This crate provides the lowest-level storage abstraction for the
//! transactional file. Byte stores are **opaque positional stores** - they
//! do not interpret the data they hold.
//!
//! ## Design Principles
//!
//! - Stores are random-access (`read_at`, `write_at`, `truncate`, `flush`)
//! - No knowledge of WAL segments or transactions
//! - Must be `Send + Sync`; all methods take `&self`
//! - Errors are reported, never repaired
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral files
//! - [`FileStore`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use txfile_storage::{ByteStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.write_at(4, b"hello").unwrap();
//! assert_eq!(store.size().unwrap(), 9);
//!
//! let mut buf = [0u8; 5];
//! store.read_exact_at(4, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::ByteStore;
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
