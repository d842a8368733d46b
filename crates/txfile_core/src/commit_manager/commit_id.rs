//! Commit identifiers.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Live commit states, oldest first.
pub(crate) type Registry = Mutex<BTreeMap<u64, Weak<CommitState>>>;

/// State shared by every copy of a [`CommitId`].
///
/// Registered with the issuing manager while any copy is alive.
#[derive(Debug)]
pub(crate) struct CommitState {
    tx_start: u32,
    val: u32,
    key: u64,
    registry: Weak<Registry>,
}

impl Drop for CommitState {
    fn drop(&mut self) {
        // The manager may already be gone.
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.key);
        }
    }
}

/// A commit identifier.
///
/// Ids are ordered within a generation: the distance from the
/// generation's `tx_start` is compared, so ids wrap around `u32` safely.
/// Holding an id keeps it in the manager's set of live ids, which bounds
/// how far a vacuum may advance.
#[derive(Clone)]
pub struct CommitId {
    state: Arc<CommitState>,
}

impl CommitId {
    /// Creates an id and registers it under `key`.
    pub(crate) fn register(registry: &Arc<Registry>, key: u64, tx_start: u32, val: u32) -> Self {
        let state = Arc::new(CommitState {
            tx_start,
            val,
            key,
            registry: Arc::downgrade(registry),
        });
        registry.lock().insert(key, Arc::downgrade(&state));
        Self { state }
    }

    pub(crate) fn from_state(state: Arc<CommitState>) -> Self {
        Self { state }
    }

    /// Returns the start of this id's generation.
    #[must_use]
    pub fn tx_start(&self) -> u32 {
        self.state.tx_start
    }

    /// Returns the raw id.
    #[must_use]
    pub fn val(&self) -> u32 {
        self.state.val
    }

    /// Returns the distance from the generation start.
    #[must_use]
    pub fn relative_val(&self) -> u32 {
        self.state.val.wrapping_sub(self.state.tx_start)
    }
}

impl PartialEq for CommitId {
    fn eq(&self, other: &Self) -> bool {
        self.val() == other.val()
    }
}

impl Eq for CommitId {}

impl PartialOrd for CommitId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommitId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.relative_val()
            .cmp(&other.val().wrapping_sub(self.tx_start()))
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitId")
            .field("tx_start", &self.tx_start())
            .field("val", &self.val())
            .finish()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commit:{}+{}", self.tx_start(), self.relative_val())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<Registry> {
        Arc::new(Mutex::new(BTreeMap::new()))
    }

    #[test]
    fn ordering_wraps_within_generation() {
        let reg = registry();
        let start = u32::MAX - 1;
        let before_wrap = CommitId::register(&reg, 0, start, u32::MAX);
        let after_wrap = CommitId::register(&reg, 1, start, 3);
        assert!(before_wrap < after_wrap);
        assert_eq!(after_wrap.relative_val(), 5);
    }

    #[test]
    fn equality_is_by_value() {
        let reg = registry();
        let a = CommitId::register(&reg, 0, 1, 15);
        let b = CommitId::register(&reg, 1, 1, 15);
        assert_eq!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn last_drop_unregisters() {
        let reg = registry();
        let a = CommitId::register(&reg, 7, 0, 1);
        let b = a.clone();
        drop(a);
        assert!(reg.lock().contains_key(&7));
        drop(b);
        assert!(reg.lock().is_empty());
    }

    #[test]
    fn outliving_the_registry_is_fine() {
        let reg = registry();
        let id = CommitId::register(&reg, 0, 0, 1);
        drop(reg);
        assert_eq!(id.val(), 1);
        drop(id);
    }

    #[test]
    fn display_shows_generation_offset() {
        let reg = registry();
        let id = CommitId::register(&reg, 0, 10, 12);
        assert_eq!(id.to_string(), "commit:10+2");
    }
}
