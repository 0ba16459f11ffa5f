//! Thread-bound execution state.
//!
//! While a transactional unit of work runs, two facts are bound to the
//! executing thread: the partition the work is scoped to, and a marker
//! for the transaction the execution service opened. Both are managed by
//! RAII bindings that restore the previous value when dropped, on success,
//! error, and panic alike, so nested units always see a consistent stack.

use std::cell::{Cell, RefCell};

use cohort_core::partition::PartitionId;

thread_local! {
    static PARTITION: RefCell<Option<PartitionId>> = const { RefCell::new(None) };
    static ACTIVE_TRANSACTION: Cell<Option<ActiveTransaction>> = const { Cell::new(None) };
}

/// Marker for a transaction opened by an execution service on this thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ActiveTransaction {
    /// Instance id of the service that opened the transaction. A service
    /// only reuses transactions it opened itself.
    pub owner: u64,
    /// Whether the transaction was opened read-only.
    pub read_only: bool,
}

/// Scoped binding of the thread's partition. Restores the previous value
/// on drop.
pub(crate) struct PartitionBinding {
    previous: Option<PartitionId>,
}

impl PartitionBinding {
    pub fn bind(partition: PartitionId) -> Self {
        let previous = PARTITION.with(|slot| slot.replace(Some(partition)));
        Self { previous }
    }
}

impl Drop for PartitionBinding {
    fn drop(&mut self) {
        let previous = self.previous.take();
        PARTITION.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Scoped marker for an open transaction. Restores the previous marker on
/// drop.
pub(crate) struct TransactionMarker {
    previous: Option<ActiveTransaction>,
}

impl TransactionMarker {
    pub fn bind(owner: u64, read_only: bool) -> Self {
        let previous =
            ACTIVE_TRANSACTION.with(|slot| slot.replace(Some(ActiveTransaction { owner, read_only })));
        Self { previous }
    }
}

impl Drop for TransactionMarker {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_TRANSACTION.with(|slot| slot.set(previous));
    }
}

/// The partition bound to the calling thread right now, if any.
#[must_use]
pub fn current_partition() -> Option<PartitionId> {
    PARTITION.with(|slot| slot.borrow().clone())
}

pub(crate) fn active_transaction() -> Option<ActiveTransaction> {
    ACTIVE_TRANSACTION.with(Cell::get)
}

/// Runs `work` with the thread's partition forced to the default-partition
/// placeholder, restoring the previous binding afterwards. For startup and
/// maintenance code that touches non-partitioned data without a request.
pub fn with_default_partition<R>(work: impl FnOnce() -> R) -> R {
    let _binding = PartitionBinding::bind(PartitionId::default_partition());
    work()
}

/// Asserts that no execution-service transaction is active on this thread.
///
/// Guards entry points that must open their own transaction, where joining
/// an enclosing one would broaden its scope unnoticed.
///
/// # Panics
///
/// Panics if a transaction marker is bound to the thread.
pub fn no_transaction_allowed() {
    assert!(
        active_transaction().is_none(),
        "transaction must not be active here, but an active transaction was found"
    );
}

/// Asserts that an execution-service transaction is active on this thread.
///
/// # Panics
///
/// Panics if no transaction marker is bound to the thread.
pub fn require_transaction() {
    assert!(
        active_transaction().is_some(),
        "transaction required here, but no active transaction was found"
    );
}
