//! Byte-level test vectors for the txfile on-disk formats.
//!
//! Every multi-byte integer is big-endian. The vectors can be exported as
//! JSON for implementations that must read the same files.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use txfile_core::{WalRecord, WalTxId};

/// A test vector that can be shared across implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Encoded bytes (hex-encoded).
    pub hex: String,
    /// Expected error message fragment (if decoding should fail).
    pub expected_error: Option<String>,
}

impl TestVector {
    fn ok(id: &str, description: &str, hex: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hex: hex.into(),
            expected_error: None,
        }
    }

    fn err(id: &str, description: &str, hex: &str, error: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hex: hex.into(),
            expected_error: Some(error.into()),
        }
    }
}

/// WAL records paired with their encodings.
pub fn wal_record_cases() -> Vec<(WalRecord, TestVector)> {
    vec![
        (
            WalRecord::End,
            TestVector::ok("wal_end", "End marker", "00000000"),
        ),
        (
            WalRecord::InvalidatePreviousWal,
            TestVector::ok("wal_invalidate", "Invalidate previous WAL", "00000009"),
        ),
        (
            WalRecord::Commit {
                tx_id: WalTxId::new(5),
            },
            TestVector::ok("wal_commit", "Commit of transaction 5", "00000501"),
        ),
        (
            WalRecord::Write {
                tx_id: WalTxId::new(1),
                offset: 16,
                data: Bytes::from_static(b"abc"),
            },
            TestVector::ok(
                "wal_write_padded",
                "Write of 3 bytes, padded to a word",
                "0000010a 00000000 00000010 00000003 61626300",
            ),
        ),
        (
            WalRecord::Write {
                tx_id: WalTxId::new(2),
                offset: 0,
                data: Bytes::from_static(b"abcd"),
            },
            TestVector::ok(
                "wal_write_aligned",
                "Write of one whole word",
                "0000020a 00000000 00000000 00000004 61626364",
            ),
        ),
        (
            WalRecord::Write {
                tx_id: WalTxId::new(3),
                offset: 7,
                data: Bytes::new(),
            },
            TestVector::ok(
                "wal_write_empty",
                "Empty write",
                "0000030a 00000000 00000007 00000000",
            ),
        ),
        (
            WalRecord::Resize {
                tx_id: WalTxId::new(1),
                new_size: 4096,
            },
            TestVector::ok(
                "wal_resize",
                "Resize to 4096 bytes",
                "0000010b 00000000 00001000",
            ),
        ),
        (
            WalRecord::Copy {
                tx_id: WalTxId::new(WalTxId::MAX),
                src: 1,
                dst: 2,
                len: 3,
            },
            TestVector::ok(
                "wal_copy_max_tx",
                "Copy under the largest transaction id",
                "ffffff0c 00000000 00000001 00000000 00000002 00000000 00000003",
            ),
        ),
    ]
}

/// WAL record test vectors.
pub fn wal_record_vectors() -> Vec<TestVector> {
    wal_record_cases().into_iter().map(|(_, v)| v).collect()
}

/// Encodings that must fail to decode.
pub fn wal_error_vectors() -> Vec<TestVector> {
    vec![
        TestVector::err("wal_unknown_tag", "Tag 2 is not assigned", "00000002", "unrecognized"),
        TestVector::err(
            "wal_end_with_tx",
            "End carrying a transaction id",
            "00000100",
            "unrecognized",
        ),
        TestVector::err(
            "wal_write_truncated",
            "Write cut inside its offset",
            "0000010a 000000",
            "unexpected end",
        ),
        TestVector::err(
            "wal_write_short_data",
            "Write declaring more data than present",
            "0000010a 00000000 00000000 00000008 6162",
            "unexpected end",
        ),
    ]
}

/// WAL length of the [`file_layout_vectors`].
pub const LAYOUT_WAL_LEN: u64 = 24;

/// Store images written by the public API.
pub fn file_layout_vectors() -> Vec<TestVector> {
    vec![
        TestVector::ok(
            "layout_new_file",
            "New file: sequence 0 invalidating, sequence u32::MAX empty",
            "00000000 00000009 00000000 ffffffff 00000000 00000000",
        ),
        TestVector::ok(
            "commit_manager_header",
            "Fresh commit manager header",
            "697f6431 00000000 00000000 00000000",
        ),
        TestVector::ok(
            "sequence_header",
            "Sequence starting at 17",
            "73657175 656e6365 00000000 00000011",
        ),
    ]
}

/// Generate all test vectors as JSON.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        wal: wal_record_vectors(),
        wal_errors: wal_error_vectors(),
        layout: file_layout_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

/// Every vector set, as exported by [`all_vectors_json`].
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllTestVectors {
    /// WAL records.
    pub wal: Vec<TestVector>,
    /// Undecodable WAL records.
    pub wal_errors: Vec<TestVector>,
    /// Whole-file layouts.
    pub layout: Vec<TestVector>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::read_all;
    use crate::golden::{hex_decode, hex_encode};
    use std::sync::Arc;
    use txfile_core::{CommitManager, Config, Sequence, TxFile};
    use txfile_storage::MemoryStore;

    fn layout(id: &str) -> Vec<u8> {
        let v = file_layout_vectors()
            .into_iter()
            .find(|v| v.id == id)
            .unwrap();
        hex_decode(&v.hex)
    }

    #[test]
    fn wal_records_encode_to_vectors() {
        for (record, vector) in wal_record_cases() {
            let expected = hex_decode(&vector.hex);
            assert_eq!(
                hex_encode(&record.encode().unwrap()),
                hex_encode(&expected),
                "Vector {} failed: {}",
                vector.id,
                vector.description
            );
            let (decoded, used) = WalRecord::decode(&expected).unwrap();
            assert_eq!(decoded, record, "Vector {}", vector.id);
            assert_eq!(used, expected.len(), "Vector {}", vector.id);
        }
    }

    #[test]
    fn wal_error_vectors_fail() {
        for vector in wal_error_vectors() {
            let err = WalRecord::decode(&hex_decode(&vector.hex)).unwrap_err();
            let fragment = vector.expected_error.unwrap();
            assert!(err.is_fatal(), "Vector {}", vector.id);
            assert!(
                err.to_string().contains(&fragment),
                "Vector {}: {err} does not mention {fragment}",
                vector.id
            );
        }
    }

    #[test]
    fn new_file_matches_layout() {
        let store = Arc::new(MemoryStore::new());
        let _file = TxFile::create(store.clone(), Config::new().wal_len(LAYOUT_WAL_LEN)).unwrap();
        assert_eq!(hex_encode(&store.data()), hex_encode(&layout("layout_new_file")));
    }

    #[test]
    fn headers_match_layout() {
        let file =
            TxFile::create(Arc::new(MemoryStore::new()), Config::new().wal_len(4096)).unwrap();
        let mut tx = file.begin().unwrap();
        tx.resize(CommitManager::SIZE + Sequence::SIZE).unwrap();
        CommitManager::init(&mut tx, 0).unwrap();
        Sequence::init(&mut tx, CommitManager::SIZE, 17).unwrap();
        tx.commit().unwrap();

        let data = read_all(&file);
        let (manager, sequence) = data.split_at(CommitManager::SIZE as usize);
        assert_eq!(manager, layout("commit_manager_header").as_slice());
        assert_eq!(sequence, layout("sequence_header").as_slice());
    }

    #[test]
    fn json_export_roundtrips() {
        let json = all_vectors_json();
        let parsed: AllTestVectors = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.wal, wal_record_vectors());
        assert_eq!(parsed.layout.len(), 3);
        assert!(json.contains("wal_copy_max_tx"));
    }
}
