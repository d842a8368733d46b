//! The commit manager and its write tickets.

use super::commit_id::{CommitId, Registry};
use crate::error::{CoreError, CoreResult};
use crate::txfile::{Transaction, TxFile};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

const MAGIC: u32 = 0x697f_6431;
const OFF_MAGIC: u64 = 0;
const OFF_TX_START: u64 = 4;
const OFF_LAST_WRITE: u64 = 8;
const OFF_COMPLETED: u64 = 12;

/// Ids a generation may hand out before it must be vacuumed.
const MAX_TX_DELTA: u32 = u32::MAX;

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    wake: Arc<Condvar>,
}

#[derive(Debug)]
struct ManagerState {
    tx_start: u32,
    /// Last id handed out.
    last_write: u32,
    /// Ids left in the persisted reservation.
    avail: u32,
    completed: CommitId,
    /// Tickets in commit order.
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    next_key: u64,
}

impl ManagerState {
    fn wake_front(&self) {
        if let Some(front) = self.queue.front() {
            front.wake.notify_one();
        }
    }
}

/// Issues commit ids and applies writes in id order.
///
/// # Locking
///
/// `commit_lock` serializes validation and commit. `state` guards ids and
/// the ticket queue, and may be taken while `commit_lock` is held, never
/// the reverse.
#[derive(Debug)]
pub struct CommitManager {
    offset: u64,
    batch: u32,
    state: Mutex<ManagerState>,
    commit_lock: Mutex<()>,
    registry: Arc<Registry>,
}

impl CommitManager {
    /// Bytes taken by the header.
    pub const SIZE: u64 = 16;

    /// Writes an empty header at `offset`.
    ///
    /// The transaction must already cover `offset + SIZE` bytes.
    ///
    /// # Errors
    ///
    /// Propagates write errors.
    pub fn init(tx: &mut Transaction, offset: u64) -> CoreResult<()> {
        let mut header = [0u8; Self::SIZE as usize];
        header[..4].copy_from_slice(&MAGIC.to_be_bytes());
        tx.write_at(offset + OFF_MAGIC, &header)
    }

    /// Loads the commit manager stored at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if no header is stored at `offset`.
    pub fn allocate(file: &TxFile, offset: u64) -> CoreResult<Arc<Self>> {
        let tx = file.begin_read();
        let mut header = [0u8; Self::SIZE as usize];
        tx.read_exact_at(offset, &mut header).map_err(|e| match e {
            CoreError::InvalidArgument { .. } => {
                CoreError::invalid_format(format!("no commit manager header at {offset}"))
            }
            other => other,
        })?;

        let field = |at: u64| {
            let at = at as usize;
            u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let magic = field(OFF_MAGIC);
        if magic != MAGIC {
            return Err(CoreError::invalid_format(format!(
                "commit manager magic mismatch at {offset}: {magic:#010x}"
            )));
        }
        let tx_start = field(OFF_TX_START);
        let last_write = field(OFF_LAST_WRITE);
        let completed = field(OFF_COMPLETED);

        let registry: Arc<Registry> = Arc::new(Mutex::new(BTreeMap::new()));
        let completed_id = CommitId::register(&registry, 0, tx_start, completed);
        info!(
            name = %file.name(),
            offset,
            tx_start,
            last_write,
            completed,
            "loaded commit manager"
        );

        Ok(Arc::new(Self {
            offset,
            batch: file.config().commit_id_batch,
            state: Mutex::new(ManagerState {
                tx_start,
                last_write,
                avail: 0,
                completed: completed_id,
                queue: VecDeque::new(),
                next_ticket: 0,
                next_key: 1,
            }),
            commit_lock: Mutex::new(()),
            registry,
        }))
    }

    /// Returns the id of the last applied commit, for read-only use.
    #[must_use]
    pub fn get_tx_commit_id(&self) -> CommitId {
        self.state.lock().completed.clone()
    }

    /// Reserves the next commit id and queues a ticket for it.
    ///
    /// # Errors
    ///
    /// Returns `TooManyTransactions` once the generation's id space is used
    /// up, or an error persisting a new id reservation.
    pub fn prepare_commit(self: &Arc<Self>, file: &TxFile) -> CoreResult<WriteTicket> {
        let mut tx = file.begin()?;
        let mut state = self.state.lock();

        if state.last_write.wrapping_sub(state.tx_start) >= MAX_TX_DELTA {
            return Err(CoreError::TooManyTransactions);
        }

        if state.avail == 0 {
            let mut reserve_to = state.tx_start.wrapping_add(MAX_TX_DELTA);
            if reserve_to.wrapping_sub(state.last_write) > self.batch {
                reserve_to = state.last_write.wrapping_add(self.batch);
            }
            let mut reservation = file.begin()?;
            reservation.write_at(self.offset + OFF_LAST_WRITE, &reserve_to.to_be_bytes())?;
            reservation.commit()?;

            state.avail = reserve_to.wrapping_sub(state.last_write);
            debug!(name = %file.name(), from = state.last_write, to = reserve_to, "reserved commit ids");
        }

        state.avail -= 1;
        state.last_write = state.last_write.wrapping_add(1);
        let key = state.next_key;
        state.next_key += 1;
        let seq = CommitId::register(&self.registry, key, state.tx_start, state.last_write);

        tx.write_at(self.offset + OFF_COMPLETED, &seq.val().to_be_bytes())?;

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let wake = Arc::new(Condvar::new());
        state.queue.push_back(Waiter {
            ticket,
            wake: Arc::clone(&wake),
        });
        debug!(%seq, ticket, queued = state.queue.len(), "prepared commit");

        Ok(WriteTicket {
            manager: Arc::downgrade(self),
            seq,
            ticket,
            wake,
            tx: Some(tx),
            done: false,
        })
    }

    /// Returns the oldest commit id still held anywhere.
    ///
    /// Vacuuming up to this id cannot remove anything a live transaction
    /// needs.
    #[must_use]
    pub fn suggest_vacuum_target(&self) -> CommitId {
        let oldest = self
            .registry
            .lock()
            .values()
            .find_map(Weak::upgrade);
        match oldest {
            Some(state) => CommitId::from_state(state),
            None => self.get_tx_commit_id(),
        }
    }

    /// Returns the generation start of the oldest live commit id.
    #[must_use]
    pub fn vacuum_horizon(&self) -> u32 {
        self.suggest_vacuum_target().tx_start()
    }

    /// Starts a new generation at `target` after a vacuum.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `target` lies past the last applied
    /// commit, or an error persisting the new generation start.
    pub fn on_completed_vacuum(&self, file: &TxFile, target: &CommitId) -> CoreResult<()> {
        let mut state = self.state.lock();
        let horizon = state.completed.val().wrapping_sub(state.tx_start);
        if target.val().wrapping_sub(state.tx_start) > horizon {
            return Err(CoreError::invalid_argument(format!(
                "vacuum target {target} is past the last applied commit {}",
                state.completed
            )));
        }

        let new_start = target.val();
        let mut tx = file.begin()?;
        tx.write_at(self.offset + OFF_TX_START, &new_start.to_be_bytes())?;
        tx.commit()?;

        let old_start = state.tx_start;
        state.tx_start = new_start;
        let key = state.next_key;
        state.next_key += 1;
        let completed_val = state.completed.val();
        state.completed = CommitId::register(&self.registry, key, new_start, completed_val);
        info!(name = %file.name(), old_start, new_start, "started commit id generation");
        Ok(())
    }

    fn null_commit(&self, ticket: u64) {
        let mut state = self.state.lock();
        let Some(pos) = state.queue.iter().position(|w| w.ticket == ticket) else {
            return;
        };
        state.queue.remove(pos);
        if pos == 0 {
            state.wake_front();
        }
    }
}

/// The right to commit at one [`CommitId`].
///
/// Writes added to the ticket are committed by [`WriteTicket::apply`].
/// Dropping the ticket rolls them back and lets later tickets proceed.
#[derive(Debug)]
pub struct WriteTicket {
    manager: Weak<CommitManager>,
    seq: CommitId,
    ticket: u64,
    wake: Arc<Condvar>,
    tx: Option<Transaction>,
    done: bool,
}

impl WriteTicket {
    /// Returns the commit id this ticket commits at.
    #[must_use]
    pub fn seq(&self) -> &CommitId {
        &self.seq
    }

    /// Adds a write to this commit.
    ///
    /// # Errors
    ///
    /// See [`Transaction::write_at`].
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.tx_mut().write_at(offset, data)
    }

    /// Adds the same write at several offsets to this commit.
    ///
    /// # Errors
    ///
    /// See [`Transaction::write_at_many`].
    pub fn write_at_many(&mut self, offsets: &[u64], data: &[u8]) -> CoreResult<()> {
        self.tx_mut().write_at_many(offsets, data)
    }

    /// Returns the transaction this ticket commits.
    pub fn transaction(&mut self) -> &mut Transaction {
        self.tx_mut()
    }

    /// Waits for this ticket's turn, then validates and commits.
    ///
    /// `validation` runs while no other commit can start; an error from it
    /// is returned unchanged and nothing is committed. `phase2` runs after
    /// the commit is durable and before the next ticket may proceed. It
    /// cannot fail.
    ///
    /// # Errors
    ///
    /// Returns `GoneAway` if the manager was dropped, the validation error,
    /// or the commit error. The ticket is rolled back on any error.
    pub fn apply<E, V, P>(mut self, validation: V, phase2: P) -> Result<(), E>
    where
        E: From<CoreError>,
        V: FnOnce() -> Result<(), E>,
        P: FnOnce(),
    {
        let Some(manager) = self.manager.upgrade() else {
            return Err(CoreError::GoneAway.into());
        };

        {
            let mut state = manager.state.lock();
            while state.queue.front().map(|w| w.ticket) != Some(self.ticket) {
                self.wake.wait(&mut state);
            }
        }

        let commit_guard = manager.commit_lock.lock();
        validation()?;

        let mut state = manager.state.lock();
        let tx = self.tx.take().unwrap_or_else(|| panic!("write ticket without transaction"));
        if let Err(e) = tx.commit() {
            drop(state);
            return Err(e.into());
        }

        // Nothing below may fail.
        phase2();
        state.completed = self.seq.clone();
        state.queue.pop_front();
        self.done = true;
        drop(commit_guard);
        state.wake_front();
        debug!(seq = %self.seq, queued = state.queue.len(), "applied commit");
        Ok(())
    }

    fn tx_mut(&mut self) -> &mut Transaction {
        self.tx
            .as_mut()
            .unwrap_or_else(|| panic!("write ticket without transaction"))
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            warn!(seq = %self.seq, "write ticket dropped without commit");
            manager.null_commit(self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use txfile_storage::MemoryStore;

    fn memory_file() -> TxFile {
        TxFile::create(Arc::new(MemoryStore::new()), Config::new().wal_len(64 * 1024)).unwrap()
    }

    fn file_with_inits(tx_start: u32, last_write: u32, completed: u32) -> TxFile {
        let file = memory_file();
        let mut tx = file.begin().unwrap();
        tx.resize(CommitManager::SIZE).unwrap();
        tx.write_at(0, &MAGIC.to_be_bytes()).unwrap();
        tx.write_at(4, &tx_start.to_be_bytes()).unwrap();
        tx.write_at(8, &last_write.to_be_bytes()).unwrap();
        tx.write_at(12, &completed.to_be_bytes()).unwrap();
        tx.commit().unwrap();
        file
    }

    fn header(file: &TxFile) -> Vec<u8> {
        let mut buf = vec![0u8; CommitManager::SIZE as usize];
        file.begin_read().read_exact_at(0, &mut buf).unwrap();
        buf
    }

    #[test]
    fn new_file_header() {
        let file = memory_file();
        let mut tx = file.begin().unwrap();
        tx.resize(CommitManager::SIZE).unwrap();
        CommitManager::init(&mut tx, 0).unwrap();
        tx.commit().unwrap();

        let mut expected = vec![0x69, 0x7f, 0x64, 0x31];
        expected.extend_from_slice(&[0; 12]);
        assert_eq!(header(&file), expected);
    }

    #[test]
    fn magic_mismatch_is_invalid_format() {
        let file = memory_file();
        let mut tx = file.begin().unwrap();
        tx.resize(CommitManager::SIZE).unwrap();
        tx.commit().unwrap();

        let err = CommitManager::allocate(&file, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn get_tx_commit_id() {
        let file = file_with_inits(1, 17, 15);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let ci = cm.get_tx_commit_id();
        assert_eq!(ci.tx_start(), 1);
        assert_eq!(ci.val(), 15);
        assert_eq!(ci, cm.get_tx_commit_id());
    }

    #[test]
    fn prepare_commit() {
        let file = file_with_inits(1, 17, 15);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let before = cm.get_tx_commit_id();

        let ticket = cm.prepare_commit(&file).unwrap();
        assert_eq!(ticket.seq().tx_start(), 1);
        assert_eq!(ticket.seq().val(), 18);
        assert_eq!(before, cm.get_tx_commit_id());

        let other = cm.prepare_commit(&file).unwrap();
        assert_ne!(ticket.seq(), other.seq());
        assert!(ticket.seq() < other.seq());
    }

    #[test]
    fn reservation_is_persisted_in_batches() {
        let file = file_with_inits(1, 17, 15);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let _a = cm.prepare_commit(&file).unwrap();
        let _b = cm.prepare_commit(&file).unwrap();

        let reserved = u32::from_be_bytes(header(&file)[8..12].try_into().unwrap());
        assert_eq!(reserved, 17 + file.config().commit_id_batch);
    }

    #[test]
    fn commit_runs_validation_then_phase2() {
        let file = file_with_inits(1, 17, 15);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let ticket = cm.prepare_commit(&file).unwrap();

        let calls = std::cell::RefCell::new(Vec::new());
        let result: Result<(), CoreError> = ticket.apply(
            || {
                calls.borrow_mut().push("validation");
                Ok(())
            },
            || calls.borrow_mut().push("phase2"),
        );
        result.unwrap();
        assert_eq!(calls.into_inner(), vec!["validation", "phase2"]);

        let after = cm.get_tx_commit_id();
        assert_eq!(after.tx_start(), 1);
        assert_eq!(after.val(), 18);
        assert_eq!(&header(&file)[12..], &18u32.to_be_bytes());
    }

    #[test]
    fn failed_validation_skips_phase2() {
        let file = file_with_inits(1, 17, 15);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let before = cm.get_tx_commit_id();
        let ticket = cm.prepare_commit(&file).unwrap();

        let mut phase2_called = false;
        let err = ticket
            .apply(
                || Err(CoreError::transaction_failed("conflict")),
                || phase2_called = true,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::TransactionFailed { .. }));
        assert!(!phase2_called);
        assert_eq!(before, cm.get_tx_commit_id());
        assert_eq!(&header(&file)[12..], &15u32.to_be_bytes());

        // The queue moved on.
        let next = cm.prepare_commit(&file).unwrap();
        next.apply(|| Ok::<(), CoreError>(()), || {}).unwrap();
    }

    #[test]
    fn dropped_ticket_unblocks_later_tickets() {
        let file = file_with_inits(0, 0, 0);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let first = cm.prepare_commit(&file).unwrap();
        let second = cm.prepare_commit(&file).unwrap();
        drop(first);
        second.apply(|| Ok::<(), CoreError>(()), || {}).unwrap();
        assert_eq!(cm.get_tx_commit_id().val(), 2);
    }

    #[test]
    fn apply_after_manager_drop_is_gone_away() {
        let file = file_with_inits(0, 0, 0);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let ticket = cm.prepare_commit(&file).unwrap();
        drop(cm);
        let err = ticket.apply(|| Ok::<(), CoreError>(()), || {}).unwrap_err();
        assert!(matches!(err, CoreError::GoneAway));
    }

    #[test]
    fn commits_apply_in_ticket_order() {
        let file = file_with_inits(0, 0, 0);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let first = cm.prepare_commit(&file).unwrap();
        let second = cm.prepare_commit(&file).unwrap();

        let (sender, receiver) = mpsc::channel();
        let later = {
            let sender = sender.clone();
            thread::spawn(move || {
                second
                    .apply(|| Ok::<(), CoreError>(()), || sender.send(2).unwrap())
                    .unwrap();
            })
        };

        // Give the second ticket a head start; it must still wait.
        thread::sleep(Duration::from_millis(20));
        first
            .apply(|| Ok::<(), CoreError>(()), || sender.send(1).unwrap())
            .unwrap();
        later.join().unwrap();

        let order: Vec<i32> = receiver.try_iter().collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(cm.get_tx_commit_id().val(), 2);
    }

    #[test]
    fn ticket_writes_are_committed() {
        let file = memory_file();
        let mut tx = file.begin().unwrap();
        tx.resize(CommitManager::SIZE + 4).unwrap();
        CommitManager::init(&mut tx, 0).unwrap();
        tx.commit().unwrap();

        let cm = CommitManager::allocate(&file, 0).unwrap();
        let mut ticket = cm.prepare_commit(&file).unwrap();
        ticket.write_at(16, b"data").unwrap();
        ticket.apply(|| Ok::<(), CoreError>(()), || {}).unwrap();

        let mut buf = [0u8; 4];
        file.begin_read().read_exact_at(16, &mut buf).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn vacuum_target_tracks_oldest_live_id() {
        let file = file_with_inits(0, 0, 0);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let reader = cm.get_tx_commit_id();
        for _ in 0..3 {
            let ticket = cm.prepare_commit(&file).unwrap();
            ticket.apply(|| Ok::<(), CoreError>(()), || {}).unwrap();
        }
        assert_eq!(cm.suggest_vacuum_target().val(), 0);

        drop(reader);
        let target = cm.suggest_vacuum_target();
        assert_eq!(target.val(), 3);

        cm.on_completed_vacuum(&file, &target).unwrap();
        drop(target);
        assert_eq!(cm.vacuum_horizon(), 3);
        assert_eq!(&header(&file)[4..8], &3u32.to_be_bytes());

        let reopened = CommitManager::allocate(&file, 0).unwrap();
        assert_eq!(reopened.get_tx_commit_id().tx_start(), 3);
    }

    #[test]
    fn vacuum_past_completed_is_rejected() {
        let file = file_with_inits(0, 0, 0);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let ticket = cm.prepare_commit(&file).unwrap();
        let err = cm.on_completed_vacuum(&file, ticket.seq()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn exhausted_generation_is_rejected() {
        let file = file_with_inits(5, 4, 4);
        let cm = CommitManager::allocate(&file, 0).unwrap();
        let err = cm.prepare_commit(&file).unwrap_err();
        assert!(matches!(err, CoreError::TooManyTransactions));
    }
}
