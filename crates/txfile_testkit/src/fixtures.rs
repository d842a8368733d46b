//! Test fixtures and file helpers.
//!
//! Provides convenience functions for setting up transactional files
//! and common test scenarios.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use txfile_core::{CommitManager, Config, Sequence, TxFile};
use txfile_storage::{ByteStore, FileStore, MemoryStore};

/// WAL length used by fixtures unless a test asks otherwise.
pub const TEST_WAL_LEN: u64 = 4096;

/// Returns the configuration fixtures use by default.
pub fn test_config() -> Config {
    Config::new().name("test").wal_len(TEST_WAL_LEN)
}

/// A transactional file with automatic cleanup.
pub struct TestFile {
    /// The file instance.
    pub file: TxFile,
    store: Arc<dyn ByteStore>,
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestFile {
    /// Creates a new in-memory test file.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Creates a new in-memory test file with `config`.
    pub fn memory_with(config: Config) -> Self {
        let store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        let file = TxFile::create(Arc::clone(&store), config).expect("Failed to create file");
        Self {
            file,
            store,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed test file.
    pub fn disk() -> Self {
        Self::disk_with(test_config())
    }

    /// Creates a new file-backed test file with `config`.
    pub fn disk_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.tx");
        let store: Arc<dyn ByteStore> =
            Arc::new(FileStore::open_with_create_dirs(&path).expect("Failed to open file store"));
        let file = TxFile::create(Arc::clone(&store), config).expect("Failed to create file");
        Self {
            file,
            store,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Closes the file and opens it again, replaying its WAL.
    ///
    /// File-backed files are reopened from disk through a new handle.
    pub fn reopen(self) -> Self {
        let config = self.file.config().clone();
        let Self {
            file,
            store,
            path,
            _temp_dir,
        } = self;
        drop(file);

        let store: Arc<dyn ByteStore> = match &path {
            Some(path) => Arc::new(FileStore::open(path).expect("Failed to reopen file store")),
            None => store,
        };
        let file = TxFile::open(Arc::clone(&store), config).expect("Failed to reopen file");
        Self {
            file,
            store,
            path,
            _temp_dir,
        }
    }

    /// Returns the underlying byte store.
    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    /// Returns the path if file-backed, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads the whole committed contents.
    pub fn contents(&self) -> Vec<u8> {
        read_all(&self.file)
    }
}

impl std::ops::Deref for TestFile {
    type Target = TxFile;

    fn deref(&self) -> &Self::Target {
        &self.file
    }
}

/// Reads the whole committed contents of `file`.
pub fn read_all(file: &TxFile) -> Vec<u8> {
    let tx = file.begin_read();
    let mut buf = vec![0u8; tx.size() as usize];
    tx.read_exact_at(0, &mut buf).expect("Failed to read file");
    buf
}

/// Commits a single write, growing the file if needed.
pub fn commit_write(file: &TxFile, offset: u64, data: &[u8]) {
    let mut tx = file.begin().expect("Failed to begin");
    let end = offset + data.len() as u64;
    if tx.size() < end {
        tx.resize(end).expect("Failed to resize");
    }
    tx.write_at(offset, data).expect("Failed to write");
    tx.commit().expect("Failed to commit");
}

/// Runs a test with a temporary in-memory file.
///
/// # Example
///
/// ```rust,ignore
/// use txfile_testkit::with_memory_file;
///
/// #[test]
/// fn my_test() {
///     with_memory_file(|file| {
///         let mut tx = file.begin().unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_memory_file<F, R>(f: F) -> R
where
    F: FnOnce(&TxFile) -> R,
{
    let test_file = TestFile::memory();
    f(&test_file.file)
}

/// Runs a test with a temporary file-backed file.
pub fn with_disk_file<F, R>(f: F) -> R
where
    F: FnOnce(&TxFile, &Path) -> R,
{
    let test_file = TestFile::disk();
    let path = test_file.path().expect("Disk file should have a path");
    f(&test_file.file, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Offset of the commit manager header in [`with_metadata`] files.
    pub const COMMIT_MANAGER_OFFSET: u64 = 0;

    /// Offset of the sequence in [`with_metadata`] files.
    pub const SEQUENCE_OFFSET: u64 = CommitManager::SIZE;

    /// Creates a file holding `len` bytes, where byte `i` is `i % 251`.
    pub fn populated_file(len: u64) -> TestFile {
        let test_file = TestFile::memory();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        commit_write(&test_file.file, 0, &data);
        test_file
    }

    /// Creates a file holding a commit manager header followed by a
    /// sequence starting at `initial`.
    pub fn with_metadata(initial: u64) -> TestFile {
        let test_file = TestFile::memory();
        let mut tx = test_file.file.begin().expect("Failed to begin");
        tx.resize(CommitManager::SIZE + Sequence::SIZE)
            .expect("Failed to resize");
        CommitManager::init(&mut tx, COMMIT_MANAGER_OFFSET).expect("Failed to init commit manager");
        Sequence::init(&mut tx, SEQUENCE_OFFSET, initial).expect("Failed to init sequence");
        tx.commit().expect("Failed to commit");
        test_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_file_starts_empty() {
        let f = TestFile::memory();
        assert_eq!(f.size(), 0);
        assert!(f.contents().is_empty());
        assert!(f.path().is_none());
    }

    #[test]
    fn memory_file_reopen_keeps_commits() {
        let f = TestFile::memory();
        commit_write(&f, 2, b"xyz");
        let f = f.reopen();
        assert_eq!(f.contents(), b"\0\0xyz");
    }

    #[test]
    fn disk_file_reopen_keeps_commits() {
        let f = TestFile::disk();
        assert!(f.path().is_some());
        commit_write(&f, 0, b"on disk");
        let f = f.reopen();
        assert_eq!(f.contents(), b"on disk");
    }

    #[test]
    fn with_helpers_run_closure() {
        let n = with_memory_file(|file| {
            commit_write(file, 0, b"abc");
            file.size()
        });
        assert_eq!(n, 3);
        with_disk_file(|file, path| {
            assert!(path.exists());
            assert_eq!(file.size(), 0);
        });
    }

    #[test]
    fn populated_file_has_pattern() {
        let f = scenarios::populated_file(300);
        let data = f.contents();
        assert_eq!(data.len(), 300);
        assert_eq!(data[0], 0);
        assert_eq!(data[251], 0);
        assert_eq!(data[299], 48);
    }

    #[test]
    fn metadata_file_opens_both_structures() {
        let f = scenarios::with_metadata(5);
        let manager = CommitManager::allocate(&f, scenarios::COMMIT_MANAGER_OFFSET).unwrap();
        assert_eq!(manager.get_tx_commit_id().val(), 0);
        let seq = Sequence::open(&f, scenarios::SEQUENCE_OFFSET, 1).unwrap();
        assert_eq!(seq.next(&f).unwrap(), 5);
    }
}
