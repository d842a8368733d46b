//! # txfile Testkit
//!
//! Test utilities for txfile.
//!
//! This crate provides:
//! - Test fixtures for in-memory and file-backed transactional files
//! - A crash-simulating byte store
//! - Property-based test generators using proptest
//! - Golden byte vectors for the on-disk formats
//! - Stress testing utilities
//! - End-to-end scenarios exercising the public API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txfile_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_file() {
//!     with_memory_file(|file| {
//!         let mut tx = file.begin().unwrap();
//!         tx.resize(8).unwrap();
//!         tx.commit().unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod golden;
pub mod integration;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::golden::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
    pub use crate::init_test_logging;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use golden::*;
pub use integration::*;
pub use stress::*;
pub use vectors::*;

/// Installs a `tracing` subscriber for tests.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
