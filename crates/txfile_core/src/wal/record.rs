//! WAL record types and serialization.
//!
//! Every record starts with a big-endian 32-bit discriminant
//! `(tx_id << 8) | tag`, followed by a tag-specific payload.

use crate::error::{CoreError, CoreResult};
use crate::types::WalTxId;
use bytes::Bytes;

/// Encoded size of an `End` record, which is also the discriminant size.
pub const END_RECORD_SIZE: usize = 4;

/// Tag of a WAL record. Values are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalRecordKind {
    /// End of the segment's records.
    End = 0,
    /// Transaction commit.
    Commit = 1,
    /// Everything logged before this marker is already in the file.
    InvalidatePreviousWal = 9,
    /// Bytes written at an offset.
    Write = 10,
    /// File resized.
    Resize = 11,
    /// Bytes copied within the file.
    Copy = 12,
}

impl WalRecordKind {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::End),
            1 => Some(Self::Commit),
            9 => Some(Self::InvalidatePreviousWal),
            10 => Some(Self::Write),
            11 => Some(Self::Resize),
            12 => Some(Self::Copy),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for kinds that never belong to a transaction.
    #[must_use]
    pub const fn is_global(self) -> bool {
        matches!(self, Self::End | Self::InvalidatePreviousWal)
    }
}

/// A single WAL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// End of the segment's records.
    End,

    /// Commit of every earlier record with the same transaction id.
    Commit {
        /// Committing transaction.
        tx_id: WalTxId,
    },

    /// Marks that the records before it are already applied to the file.
    InvalidatePreviousWal,

    /// Write bytes at a logical offset.
    Write {
        /// Owning transaction.
        tx_id: WalTxId,
        /// Logical file offset.
        offset: u64,
        /// Bytes written.
        data: Bytes,
    },

    /// Set the logical file size.
    Resize {
        /// Owning transaction.
        tx_id: WalTxId,
        /// New logical size.
        new_size: u64,
    },

    /// Copy `len` bytes from `src` to `dst`.
    Copy {
        /// Owning transaction.
        tx_id: WalTxId,
        /// Source offset.
        src: u64,
        /// Destination offset.
        dst: u64,
        /// Number of bytes.
        len: u64,
    },
}

impl WalRecord {
    /// Largest payload a `Write` record can carry.
    pub const MAX_WRITE_LEN: usize = u32::MAX as usize;

    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> WalRecordKind {
        match self {
            Self::End => WalRecordKind::End,
            Self::Commit { .. } => WalRecordKind::Commit,
            Self::InvalidatePreviousWal => WalRecordKind::InvalidatePreviousWal,
            Self::Write { .. } => WalRecordKind::Write,
            Self::Resize { .. } => WalRecordKind::Resize,
            Self::Copy { .. } => WalRecordKind::Copy,
        }
    }

    /// Returns the owning transaction. Global records report id 0.
    #[must_use]
    pub fn tx_id(&self) -> WalTxId {
        match self {
            Self::End | Self::InvalidatePreviousWal => WalTxId::new(0),
            Self::Commit { tx_id }
            | Self::Write { tx_id, .. }
            | Self::Resize { tx_id, .. }
            | Self::Copy { tx_id, .. } => *tx_id,
        }
    }

    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        END_RECORD_SIZE
            + match self {
                Self::End | Self::Commit { .. } | Self::InvalidatePreviousWal => 0,
                Self::Write { data, .. } => 8 + 4 + padded(data.len()),
                Self::Resize { .. } => 8,
                Self::Copy { .. } => 24,
            }
    }

    /// Returns the discriminant word.
    #[must_use]
    pub fn discriminant(&self) -> u32 {
        (self.tx_id().as_u32() << 8) | u32::from(self.kind().as_byte())
    }

    /// Appends the encoded record to `buf`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a `Write` payload exceeds
    /// [`Self::MAX_WRITE_LEN`].
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        if let Self::Write { data, .. } = self {
            if data.len() > Self::MAX_WRITE_LEN {
                return Err(CoreError::invalid_argument(format!(
                    "write of {} bytes exceeds maximum of {} bytes",
                    data.len(),
                    Self::MAX_WRITE_LEN
                )));
            }
        }

        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&self.discriminant().to_be_bytes());
        match self {
            Self::End | Self::Commit { .. } | Self::InvalidatePreviousWal => {}

            Self::Write { offset, data, .. } => {
                buf.extend_from_slice(&offset.to_be_bytes());
                // Checked against MAX_WRITE_LEN above
                buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                buf.extend_from_slice(data);
                buf.resize(buf.len() + padded(data.len()) - data.len(), 0);
            }

            Self::Resize { new_size, .. } => {
                buf.extend_from_slice(&new_size.to_be_bytes());
            }

            Self::Copy { src, dst, len, .. } => {
                buf.extend_from_slice(&src.to_be_bytes());
                buf.extend_from_slice(&dst.to_be_bytes());
                buf.extend_from_slice(&len.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Encodes the record into a new buffer.
    ///
    /// # Errors
    ///
    /// See [`Self::encode_into`].
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decodes one record from the front of `input`.
    ///
    /// Returns the record and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns `WalCorrupted` on an unknown tag, a global record with a
    /// non-zero transaction id, or a record cut short by the end of `input`.
    pub fn decode(input: &[u8]) -> CoreResult<(Self, usize)> {
        let mut cursor = 0;

        let read_u32 = |cursor: &mut usize| -> CoreResult<u32> {
            let bytes: [u8; 4] = input
                .get(*cursor..*cursor + 4)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| CoreError::wal_corrupted("unexpected end of WAL record"))?;
            *cursor += 4;
            Ok(u32::from_be_bytes(bytes))
        };

        let read_u64 = |cursor: &mut usize| -> CoreResult<u64> {
            let bytes: [u8; 8] = input
                .get(*cursor..*cursor + 8)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| CoreError::wal_corrupted("unexpected end of WAL record"))?;
            *cursor += 8;
            Ok(u64::from_be_bytes(bytes))
        };

        let discriminant = read_u32(&mut cursor)?;
        let tx_id = WalTxId::new(discriminant >> 8);
        let kind = WalRecordKind::from_byte((discriminant & 0xff) as u8).ok_or_else(|| {
            CoreError::wal_corrupted(format!(
                "unrecognized WAL entry: tag {}",
                discriminant & 0xff
            ))
        })?;
        if kind.is_global() && tx_id.as_u32() != 0 {
            return Err(CoreError::wal_corrupted(format!(
                "unrecognized WAL entry: {kind:?} with {tx_id}"
            )));
        }

        let record = match kind {
            WalRecordKind::End => Self::End,
            WalRecordKind::InvalidatePreviousWal => Self::InvalidatePreviousWal,
            WalRecordKind::Commit => Self::Commit { tx_id },

            WalRecordKind::Write => {
                let offset = read_u64(&mut cursor)?;
                let len = read_u32(&mut cursor)? as usize;
                let data = input
                    .get(cursor..cursor + len)
                    .ok_or_else(|| CoreError::wal_corrupted("unexpected end of write data"))?;
                let data = Bytes::copy_from_slice(data);
                cursor += padded(len);
                if cursor > input.len() {
                    return Err(CoreError::wal_corrupted("unexpected end of write padding"));
                }
                Self::Write {
                    tx_id,
                    offset,
                    data,
                }
            }

            WalRecordKind::Resize => Self::Resize {
                tx_id,
                new_size: read_u64(&mut cursor)?,
            },

            WalRecordKind::Copy => Self::Copy {
                tx_id,
                src: read_u64(&mut cursor)?,
                dst: read_u64(&mut cursor)?,
                len: read_u64(&mut cursor)?,
            },
        };

        Ok((record, cursor))
    }
}

/// Rounds a byte count up to the 4-byte alignment of the log.
const fn padded(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tx(id: u32) -> WalTxId {
        WalTxId::new(id)
    }

    #[test]
    fn kind_roundtrip() {
        for k in [
            WalRecordKind::End,
            WalRecordKind::Commit,
            WalRecordKind::InvalidatePreviousWal,
            WalRecordKind::Write,
            WalRecordKind::Resize,
            WalRecordKind::Copy,
        ] {
            assert_eq!(WalRecordKind::from_byte(k.as_byte()), Some(k));
        }
        assert_eq!(WalRecordKind::from_byte(2), None);
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(WalRecordKind::End.as_byte(), 0);
        assert_eq!(WalRecordKind::Commit.as_byte(), 1);
        assert_eq!(WalRecordKind::InvalidatePreviousWal.as_byte(), 9);
        assert_eq!(WalRecordKind::Write.as_byte(), 10);
        assert_eq!(WalRecordKind::Resize.as_byte(), 11);
        assert_eq!(WalRecordKind::Copy.as_byte(), 12);
    }

    #[test]
    fn end_record_is_four_zero_bytes() {
        assert_eq!(WalRecord::End.encode().unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn commit_record_layout() {
        let bytes = WalRecord::Commit { tx_id: tx(0x0102_03) }.encode().unwrap();
        assert_eq!(bytes, vec![0x01, 0x02, 0x03, 0x01]);
    }

    #[test]
    fn write_record_layout_is_padded() {
        let record = WalRecord::Write {
            tx_id: tx(7),
            offset: 0x10,
            data: Bytes::from_static(b"abcde"),
        };
        let bytes = record.encode().unwrap();
        assert_eq!(
            bytes,
            vec![
                0, 0, 7, 10, // discriminant
                0, 0, 0, 0, 0, 0, 0, 0x10, // offset
                0, 0, 0, 5, // length
                b'a', b'b', b'c', b'd', b'e', 0, 0, 0, // data + padding
            ]
        );
        assert_eq!(record.encoded_len(), bytes.len());
    }

    #[test]
    fn resize_record_layout() {
        let bytes = WalRecord::Resize {
            tx_id: tx(1),
            new_size: 3,
        }
        .encode()
        .unwrap();
        assert_eq!(bytes, vec![0, 0, 1, 11, 0, 0, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn decode_reports_consumed_length() {
        let mut buf = WalRecord::Resize {
            tx_id: tx(2),
            new_size: 99,
        }
        .encode()
        .unwrap();
        WalRecord::End.encode_into(&mut buf).unwrap();

        let (first, used) = WalRecord::decode(&buf).unwrap();
        assert_eq!(used, 12);
        assert_eq!(first.kind(), WalRecordKind::Resize);
        let (second, used) = WalRecord::decode(&buf[12..]).unwrap();
        assert_eq!(second, WalRecord::End);
        assert_eq!(used, END_RECORD_SIZE);
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let err = WalRecord::decode(&[0, 0, 0, 3]).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("unrecognized WAL entry"));
    }

    #[test]
    fn global_record_with_tx_id_is_corruption() {
        assert!(WalRecord::decode(&[0, 0, 1, 0]).is_err());
        assert!(WalRecord::decode(&[0, 0, 1, 9]).is_err());
    }

    #[test]
    fn truncated_record_is_corruption() {
        let bytes = WalRecord::Copy {
            tx_id: tx(1),
            src: 1,
            dst: 2,
            len: 3,
        }
        .encode()
        .unwrap();
        for cut in 0..bytes.len() {
            assert!(WalRecord::decode(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    fn arb_record() -> impl Strategy<Value = WalRecord> {
        let id = 1u32..=WalTxId::MAX;
        prop_oneof![
            Just(WalRecord::End),
            Just(WalRecord::InvalidatePreviousWal),
            id.clone().prop_map(|t| WalRecord::Commit { tx_id: tx(t) }),
            (id.clone(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..64)).prop_map(
                |(t, offset, data)| WalRecord::Write {
                    tx_id: tx(t),
                    offset,
                    data: Bytes::from(data),
                }
            ),
            (id.clone(), any::<u64>()).prop_map(|(t, new_size)| WalRecord::Resize {
                tx_id: tx(t),
                new_size,
            }),
            (id, any::<u64>(), any::<u64>(), any::<u64>()).prop_map(|(t, src, dst, len)| {
                WalRecord::Copy {
                    tx_id: tx(t),
                    src,
                    dst,
                    len,
                }
            }),
        ]
    }

    proptest! {
        #[test]
        fn record_roundtrip(record in arb_record()) {
            let bytes = record.encode().unwrap();
            prop_assert_eq!(bytes.len(), record.encoded_len());
            prop_assert_eq!(bytes.len() % 4, 0);
            let (decoded, used) = WalRecord::decode(&bytes).unwrap();
            prop_assert_eq!(used, bytes.len());
            prop_assert_eq!(decoded, record);
        }
    }
}
