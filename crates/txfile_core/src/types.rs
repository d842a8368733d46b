//! Core type definitions.

use std::fmt;

/// Identifier of an in-flight WAL transaction.
///
/// Only the low 24 bits are stored on disk. Ids are recycled once a
/// compaction has moved past every record that used them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalTxId(u32);

impl WalTxId {
    /// Largest representable id.
    pub const MAX: u32 = 0x00ff_ffff;

    /// Creates a new id, masking it to 24 bits.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id & Self::MAX)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wal-tx:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_tx_id_is_masked() {
        assert_eq!(WalTxId::new(0x0100_0005).as_u32(), 5);
        assert_eq!(WalTxId::new(WalTxId::MAX).as_u32(), WalTxId::MAX);
    }

    #[test]
    fn wal_tx_id_display() {
        assert_eq!(WalTxId::new(42).to_string(), "wal-tx:42");
    }
}
