//! The transaction boundary seam.
//!
//! [`TransactionRunner`] is how the execution service talks to whatever
//! actually owns transactions: a connection pool, an embedded engine, or
//! nothing at all. The service decides *whether* and *how* to open a
//! boundary; the runner decides what that means for its storage.

use crate::execution::error::ExecuteError;

/// Transaction propagation behaviors, interpreted by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Join the active transaction, or open one if none is active.
    Required,
    /// Always open a fresh transaction, suspending any active one.
    RequiresNew,
    /// Join the active transaction if there is one, otherwise run
    /// non-transactionally.
    Supports,
    /// Join the active transaction; fail if none is active.
    Mandatory,
    /// Run non-transactionally; fail if a transaction is active.
    Never,
}

/// Isolation levels, interpreted by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Whatever the storage engine defaults to.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Boundary parameters for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionDefinition {
    pub propagation: Propagation,
    pub isolation: Isolation,
    pub read_only: bool,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            read_only: false,
        }
    }
}

/// Runs units of work inside storage transactions.
pub trait TransactionRunner: Send + Sync {
    /// Whether non-default isolation levels are honored. The execution
    /// service silently downgrades requested isolation to
    /// [`Isolation::Default`] when this is false.
    fn supports_custom_isolation(&self) -> bool {
        false
    }

    /// Whether a transaction opened through this runner is active on the
    /// calling thread.
    fn is_transaction_active(&self) -> bool;

    /// Opens a boundary per `definition`, runs `work` inside it, commits
    /// on `Ok` and rolls back on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error from `work`, or the runner's own failure to open
    /// or complete the boundary.
    fn run_in_transaction(
        &self,
        definition: &TransactionDefinition,
        work: &mut dyn FnMut() -> Result<(), ExecuteError>,
    ) -> Result<(), ExecuteError>;
}

// ---------------------------------------------------------------------------
// DirectTransactionRunner
// ---------------------------------------------------------------------------

thread_local! {
    static DEPTH: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Boundary bookkeeping without storage semantics: tracks per-thread
/// nesting so propagation behaves, but nothing is actually committed or
/// rolled back. For tests and for embedding over engines that apply
/// writes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectTransactionRunner;

impl DirectTransactionRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TransactionRunner for DirectTransactionRunner {
    fn is_transaction_active(&self) -> bool {
        DEPTH.with(|depth| depth.get() > 0)
    }

    fn run_in_transaction(
        &self,
        definition: &TransactionDefinition,
        work: &mut dyn FnMut() -> Result<(), ExecuteError>,
    ) -> Result<(), ExecuteError> {
        let active = self.is_transaction_active();
        let open = match definition.propagation {
            Propagation::Required | Propagation::RequiresNew => true,
            Propagation::Supports => active,
            Propagation::Mandatory => {
                if !active {
                    return Err(ExecuteError::Internal(anyhow::anyhow!(
                        "mandatory propagation requires an active transaction"
                    )));
                }
                true
            }
            Propagation::Never => {
                if active {
                    return Err(ExecuteError::Internal(anyhow::anyhow!(
                        "never propagation forbids an active transaction"
                    )));
                }
                false
            }
        };

        if open {
            let _guard = DepthGuard::enter();
            work()
        } else {
            work()
        }
    }
}
