//! Cross-crate integration test helpers.
//!
//! [`IntegrationHarness`] drives a transactional file and a plain byte
//! model side by side and checks they agree, across restarts too.

use txfile_core::Config;

use crate::fixtures::{commit_write, read_all, TestFile};

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The file under test.
    pub file: TestFile,
    /// Expected committed contents.
    model: Vec<u8>,
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationHarness {
    /// Creates a new integration harness over an in-memory file.
    pub fn new() -> Self {
        Self::with_file(TestFile::memory())
    }

    /// Creates a harness over an in-memory file using `config`.
    pub fn with_config(config: Config) -> Self {
        Self::with_file(TestFile::memory_with(config))
    }

    /// Creates a harness over an existing, empty file.
    pub fn with_file(file: TestFile) -> Self {
        Self {
            file,
            model: Vec::new(),
        }
    }

    /// Commits `data` at `offset`, growing the file if needed, and tracks it.
    pub fn write(&mut self, offset: u64, data: &[u8]) {
        commit_write(&self.file, offset, data);
        let end = offset as usize + data.len();
        if self.model.len() < end {
            self.model.resize(end, 0);
        }
        self.model[offset as usize..end].copy_from_slice(data);
    }

    /// Records a change committed outside the harness.
    pub fn expect(&mut self, offset: u64, data: &[u8]) {
        let end = offset as usize + data.len();
        if self.model.len() < end {
            self.model.resize(end, 0);
        }
        self.model[offset as usize..end].copy_from_slice(data);
    }

    /// Asserts the file holds exactly the tracked contents.
    pub fn verify(&self) {
        assert_eq!(read_all(&self.file), self.model, "file diverged from model");
    }

    /// Restarts the file and verifies it.
    pub fn restart(self) -> Self {
        let harness = Self {
            file: self.file.reopen(),
            model: self.model,
        };
        harness.verify();
        harness
    }

    /// Returns the tracked contents.
    pub fn model(&self) -> &[u8] {
        &self.model
    }
}
