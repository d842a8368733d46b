//! Property-based test generators using proptest.
//!
//! Provides strategies for generating WAL records and transaction scripts,
//! plus a plain `Vec<u8>` model the scripts can be checked against.

use bytes::Bytes;
use proptest::prelude::*;
use txfile_core::{CoreResult, Transaction, WalRecord, WalTxId};

/// Largest file size a generated script grows to.
pub const MAX_MODEL_SIZE: u64 = 512;

/// Strategy for generating WAL transaction ids.
pub fn wal_tx_id_strategy() -> impl Strategy<Value = WalTxId> {
    (0..=WalTxId::MAX).prop_map(WalTxId::new)
}

/// Strategy for generating write payloads.
pub fn write_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for generating any well-formed WAL record.
pub fn wal_record_strategy() -> impl Strategy<Value = WalRecord> {
    prop_oneof![
        Just(WalRecord::End),
        Just(WalRecord::InvalidatePreviousWal),
        wal_tx_id_strategy().prop_map(|tx_id| WalRecord::Commit { tx_id }),
        (wal_tx_id_strategy(), any::<u64>(), write_data_strategy()).prop_map(
            |(tx_id, offset, data)| WalRecord::Write {
                tx_id,
                offset,
                data: Bytes::from(data),
            }
        ),
        (wal_tx_id_strategy(), any::<u64>())
            .prop_map(|(tx_id, new_size)| WalRecord::Resize { tx_id, new_size }),
        (wal_tx_id_strategy(), any::<u64>(), any::<u64>(), any::<u64>()).prop_map(
            |(tx_id, src, dst, len)| WalRecord::Copy {
                tx_id,
                src,
                dst,
                len,
            }
        ),
    ]
}

/// A transaction operation with raw, unclamped arguments.
///
/// Use [`TxOp::clamp`] to fit it to a file of a given size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    /// Write bytes.
    Write {
        /// Raw offset.
        offset: u64,
        /// Payload.
        data: Vec<u8>,
    },
    /// Set the size.
    Resize(u64),
    /// Copy a range.
    Copy {
        /// Raw source offset.
        src: u64,
        /// Raw destination offset.
        dst: u64,
        /// Raw length.
        len: u64,
    },
}

impl TxOp {
    /// Fits the operation to a file of `size` bytes.
    ///
    /// Returns `None` for operations that would do nothing.
    pub fn clamp(&self, size: u64) -> Option<Self> {
        match self {
            Self::Write { offset, data } => {
                let offset = offset % (size + 1);
                let len = (data.len() as u64).min(size - offset) as usize;
                (len > 0).then(|| Self::Write {
                    offset,
                    data: data[..len].to_vec(),
                })
            }
            Self::Resize(new_size) => Some(Self::Resize(new_size % (MAX_MODEL_SIZE + 1))),
            Self::Copy { src, dst, len } => {
                let len = len % (size + 1);
                let src = src % (size - len + 1);
                let dst = dst % (size - len + 1);
                (len > 0).then_some(Self::Copy { src, dst, len })
            }
        }
    }

    /// Applies a clamped operation to `model`.
    pub fn apply_to_model(&self, model: &mut Vec<u8>) {
        match self {
            Self::Write { offset, data } => {
                let offset = *offset as usize;
                model[offset..offset + data.len()].copy_from_slice(data);
            }
            Self::Resize(new_size) => model.resize(*new_size as usize, 0),
            Self::Copy { src, dst, len } => {
                let (src, dst, len) = (*src as usize, *dst as usize, *len as usize);
                model.copy_within(src..src + len, dst);
            }
        }
    }

    /// Applies a clamped operation to `tx`.
    ///
    /// # Errors
    ///
    /// Propagates transaction errors.
    pub fn apply_to_tx(&self, tx: &mut Transaction) -> CoreResult<()> {
        match self {
            Self::Write { offset, data } => tx.write_at(*offset, data),
            Self::Resize(new_size) => tx.resize(*new_size),
            Self::Copy { src, dst, len } => tx.copy(*src, *dst, *len),
        }
    }
}

/// Strategy for generating a raw transaction operation.
pub fn tx_op_strategy() -> impl Strategy<Value = TxOp> {
    prop_oneof![
        4 => (any::<u64>(), write_data_strategy())
            .prop_map(|(offset, data)| TxOp::Write { offset, data }),
        2 => any::<u64>().prop_map(TxOp::Resize),
        1 => (any::<u64>(), any::<u64>(), any::<u64>())
            .prop_map(|(src, dst, len)| TxOp::Copy { src, dst, len }),
    ]
}

/// A transaction: its operations and whether it commits.
#[derive(Debug, Clone)]
pub struct TxScript {
    /// Operations in order.
    pub ops: Vec<TxOp>,
    /// Commit if true, roll back otherwise.
    pub commit: bool,
}

impl TxScript {
    /// Runs the script against `tx` and `model` in lockstep.
    ///
    /// `model` is updated only if the script commits.
    ///
    /// # Errors
    ///
    /// Propagates transaction errors.
    pub fn run(&self, mut tx: Transaction, model: &mut Vec<u8>) -> CoreResult<()> {
        let mut local = model.clone();
        for op in &self.ops {
            if let Some(op) = op.clamp(local.len() as u64) {
                op.apply_to_tx(&mut tx)?;
                op.apply_to_model(&mut local);
            }
        }
        if self.commit {
            tx.commit()?;
            *model = local;
        } else {
            tx.rollback();
        }
        Ok(())
    }
}

/// Strategy for generating a transaction script.
pub fn tx_script_strategy() -> impl Strategy<Value = TxScript> {
    (
        prop::collection::vec(tx_op_strategy(), 1..8),
        prop::bool::weighted(0.8),
    )
        .prop_map(|(ops, commit)| TxScript { ops, commit })
}

/// Strategy for generating a sequence of transaction scripts.
pub fn tx_history_strategy(max: usize) -> impl Strategy<Value = Vec<TxScript>> {
    prop::collection::vec(tx_script_strategy(), 1..max)
}
