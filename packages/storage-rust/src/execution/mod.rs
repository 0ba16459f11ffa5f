//! Transactional execution.
//!
//! The pieces fit together as follows:
//!
//! 1. [`executor`] holds the execution service and its builder, the
//!    entry point for running units of work,
//! 2. [`runner`] abstracts the underlying transaction mechanism,
//! 3. [`context`] tracks the partition and transaction bound to the
//!    current thread,
//! 4. [`retry`] computes backoff delays between conflict retries,
//! 5. [`undo`] collects compensation actions drained on rollback,
//! 6. [`error`] defines conflict and execution failures.

pub mod context;
pub mod error;
pub mod executor;
pub mod retry;
pub mod runner;
pub mod undo;

// Re-export key types for convenient access.
pub use context::{
    current_partition, no_transaction_allowed, require_transaction, with_default_partition,
};
pub use error::{ConflictError, ConflictKind, ExecuteError};
pub use executor::{
    ExecutionBuilder, TransactionExecutionService, DEFAULT_PROPAGATION_WHEN_CHANGING_PARTITIONS,
};
pub use retry::{backoff_for_attempt, RetrySleeper, ThreadSleeper};
pub use runner::{
    DirectTransactionRunner, Isolation, Propagation, TransactionDefinition, TransactionRunner,
};
pub use undo::UndoLog;
