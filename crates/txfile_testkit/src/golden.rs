//! Golden file utilities for format verification.
//!
//! Golden files hold the hex dump of a byte image, 16 bytes per line, so
//! that format changes show up as readable diffs.

use std::fs;
use std::path::{Path, PathBuf};

/// A golden test that compares byte images against stored hex dumps.
pub struct GoldenTest {
    name: String,
    golden_dir: PathBuf,
    update_mode: bool,
}

impl GoldenTest {
    /// Creates a new golden test.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the test (used for file naming)
    /// * `golden_dir` - Directory containing golden files
    pub fn new(name: impl Into<String>, golden_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            golden_dir: golden_dir.as_ref().to_path_buf(),
            update_mode: std::env::var("UPDATE_GOLDEN").is_ok(),
        }
    }

    /// Forces update mode on or off, ignoring `UPDATE_GOLDEN`.
    #[must_use]
    pub fn update_mode(mut self, update: bool) -> Self {
        self.update_mode = update;
        self
    }

    /// Asserts that `actual` matches the golden file for `suffix`.
    ///
    /// If `UPDATE_GOLDEN` environment variable is set, updates the golden file instead.
    pub fn assert_bytes(&self, suffix: &str, actual: &[u8]) {
        let path = self.file_path(suffix);
        let dump = hex_dump(actual);

        if self.update_mode {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("Failed to create golden directory");
            }
            fs::write(&path, &dump).expect("Failed to write golden file");
            return;
        }

        let expected = match fs::read_to_string(&path) {
            Ok(expected) => expected,
            Err(_) => panic!(
                "Golden file not found: {path:?}\n\
                 Run with UPDATE_GOLDEN=1 to create it.\n\
                 Actual:\n{dump}"
            ),
        };

        if hex_decode(&expected) != actual {
            panic!(
                "Golden test '{}' failed for '{}':\n\
                 --- Expected ---\n{}\n\
                 --- Actual ---\n{}\n\
                 Run with UPDATE_GOLDEN=1 to update.",
                self.name, suffix, expected, dump
            );
        }
    }

    fn file_path(&self, suffix: &str) -> PathBuf {
        let filename = if suffix.is_empty() {
            format!("{}.hex", self.name)
        } else {
            format!("{}_{}.hex", self.name, suffix)
        };
        self.golden_dir.join(filename)
    }
}

/// Encodes bytes as hexadecimal string.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes hexadecimal string to bytes, ignoring whitespace.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("Invalid hex"))
        .collect()
}

/// Formats bytes as hex, one line per 16 bytes, words separated by spaces.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for line in bytes.chunks(16) {
        let words: Vec<String> = line.chunks(4).map(hex_encode).collect();
        out.push_str(&words.join(" "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hex_roundtrip() {
        let original = vec![0x00, 0x01, 0xff, 0xab, 0xcd];
        assert_eq!(hex_decode(&hex_encode(&original)), original);
    }

    #[test]
    fn dump_groups_words() {
        let dump = hex_dump(&[0u8, 0, 0, 9, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(dump, "00000009 ffffffff\n");
        assert_eq!(hex_decode(&dump), vec![0, 0, 0, 9, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn update_then_compare() {
        let dir = tempdir().unwrap();
        GoldenTest::new("layout", dir.path())
            .update_mode(true)
            .assert_bytes("empty", b"\x00\x00\x00\x09");
        GoldenTest::new("layout", dir.path())
            .update_mode(false)
            .assert_bytes("empty", b"\x00\x00\x00\x09");
    }

    #[test]
    #[should_panic(expected = "Golden test 'layout' failed")]
    fn mismatch_panics() {
        let dir = tempdir().unwrap();
        GoldenTest::new("layout", dir.path())
            .update_mode(true)
            .assert_bytes("", b"abcd");
        GoldenTest::new("layout", dir.path())
            .update_mode(false)
            .assert_bytes("", b"abce");
    }
}
