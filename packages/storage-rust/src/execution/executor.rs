//! Transactional execution of units of work.
//!
//! [`TransactionExecutionService`] is the front door for anything that
//! needs a storage transaction. Callers describe the unit of work with a
//! consuming [`ExecutionBuilder`] (request, partition, propagation,
//! isolation, read-only, compensation), then hand it a closure:
//!
//! 1. the effective partition is determined and bound to the thread,
//! 2. a compatible transaction already open on the thread is joined,
//!    otherwise a boundary is opened through the [`TransactionRunner`],
//! 3. retriable conflicts are compensated and retried under a dithered
//!    linear backoff, within the budget granted by the version-conflict
//!    extension point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cohort_core::context::RequestContext;
use cohort_core::partition::PartitionId;
use tracing::{debug, info, trace};

use crate::execution::context::{self, ActiveTransaction, PartitionBinding, TransactionMarker};
use crate::execution::error::{ConflictError, ConflictKind, ExecuteError};
use crate::execution::retry::{self, RetrySleeper, ThreadSleeper};
use crate::execution::runner::{Isolation, Propagation, TransactionDefinition, TransactionRunner};
use crate::execution::undo::UndoLog;
use crate::hooks::{HookKind, HookRegistry};
use crate::partition::resolver::PartitionResolutionService;
use crate::partition::settings::PartitionSettings;

/// Propagation compared against when deciding whether a unit may join the
/// transaction already open on the thread, and the default value for the
/// partition-change policy.
pub const DEFAULT_PROPAGATION_WHEN_CHANGING_PARTITIONS: Propagation = Propagation::Required;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// TransactionExecutionService
// ---------------------------------------------------------------------------

/// Runs units of work in transactions, with partition awareness, reuse of
/// enclosing transactions, compensation, and conflict retry.
pub struct TransactionExecutionService {
    runner: Arc<dyn TransactionRunner>,
    resolver: Arc<PartitionResolutionService>,
    hooks: Arc<HookRegistry>,
    settings: Arc<PartitionSettings>,
    sleeper: Arc<dyn RetrySleeper>,
    propagation_when_changing_partitions: Propagation,
    /// Distinguishes this instance's transactions from those opened by
    /// other instances on the same thread.
    instance_id: u64,
}

impl TransactionExecutionService {
    #[must_use]
    pub fn new(
        runner: Arc<dyn TransactionRunner>,
        resolver: Arc<PartitionResolutionService>,
        hooks: Arc<HookRegistry>,
        settings: Arc<PartitionSettings>,
    ) -> Self {
        Self {
            runner,
            resolver,
            hooks,
            settings,
            sleeper: Arc::new(ThreadSleeper),
            propagation_when_changing_partitions: DEFAULT_PROPAGATION_WHEN_CHANGING_PARTITIONS,
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Replaces the sleeper used between retry attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn RetrySleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets the propagation applied when a unit of work crosses partition
    /// boundaries. [`Propagation::RequiresNew`] makes partition changes
    /// open fresh transactions instead of joining the enclosing one.
    #[must_use]
    pub fn with_propagation_when_changing_partitions(mut self, propagation: Propagation) -> Self {
        self.propagation_when_changing_partitions = propagation;
        self
    }

    /// Starts a unit of work on behalf of `request`. Unless a partition
    /// is set explicitly on the builder, the effective partition comes
    /// from generic resolution of the request.
    #[must_use]
    pub fn for_request(&self, request: &RequestContext) -> ExecutionBuilder<'_> {
        ExecutionBuilder::new(self, Some(request.clone()))
    }

    /// Starts a system unit of work with no partition preference.
    #[must_use]
    pub fn for_system_request(&self) -> ExecutionBuilder<'_> {
        ExecutionBuilder::new(self, Some(RequestContext::system()))
    }

    /// Starts a system unit of work pinned to `partition`. The partition
    /// is used exactly as given, with no normalization.
    #[must_use]
    pub fn for_system_request_on_partition(&self, partition: PartitionId) -> ExecutionBuilder<'_> {
        ExecutionBuilder::new(self, Some(RequestContext::system())).with_partition(partition)
    }

    /// Whether a unit scoped to `next` may share a transaction opened
    /// under `previous`. Always true when partitioning is off or when
    /// partition changes do not force new transactions.
    #[must_use]
    pub fn is_compatible_partition(
        &self,
        previous: Option<&PartitionId>,
        next: Option<&PartitionId>,
    ) -> bool {
        !self.settings.partitioning_enabled
            || !self.requires_new_transaction_when_changing_partitions()
            || previous == next
    }

    fn requires_new_transaction_when_changing_partitions(&self) -> bool {
        self.propagation_when_changing_partitions == Propagation::RequiresNew
    }

    // ---- execution ----

    fn execute<T>(
        &self,
        mut builder: ExecutionBuilder<'_>,
        mut work: impl FnMut() -> Result<T, ExecuteError>,
    ) -> Result<T, ExecuteError> {
        let effective = self.effective_partition(&builder)?;
        metrics::counter!("transaction_units_started_total").increment(1);

        // The previous binding only matters when this unit carries its
        // own partition; an unscoped unit changes nothing.
        let previous = match &effective {
            Some(_) => context::current_partition(),
            None => None,
        };
        let _partition_binding = effective.clone().map(PartitionBinding::bind);
        trace!(partition = ?effective, "starting transactional unit of work");

        if self.is_compatible_partition(previous.as_ref(), effective.as_ref()) {
            if let Some(active) = context::active_transaction() {
                if active.owner == self.instance_id
                    && self.runner.is_transaction_active()
                    && Self::can_join_active_transaction(&builder, active)
                {
                    trace!("joining the transaction already active on this thread");
                    metrics::counter!("transaction_units_reused_total").increment(1);
                    return work();
                }
            }
        }

        if self.requires_new_transaction_when_changing_partitions() {
            builder.propagation = Some(self.propagation_when_changing_partitions);
        }

        let _marker = TransactionMarker::bind(self.instance_id, builder.read_only);
        self.execute_with_retries(builder, &mut work)
    }

    /// Whether the builder's demands fit the transaction already open:
    /// a read-only transaction only accepts read-only work, and any
    /// explicitly requested propagation other than the plain default
    /// means the caller wants its own boundary.
    fn can_join_active_transaction(
        builder: &ExecutionBuilder<'_>,
        active: ActiveTransaction,
    ) -> bool {
        (!active.read_only || builder.read_only)
            && builder
                .propagation
                .is_none_or(|p| p == DEFAULT_PROPAGATION_WHEN_CHANGING_PARTITIONS)
    }

    fn effective_partition(
        &self,
        builder: &ExecutionBuilder<'_>,
    ) -> Result<Option<PartitionId>, ExecuteError> {
        if let Some(partition) = &builder.partition {
            return Ok(Some(partition.clone()));
        }
        match &builder.request {
            Some(request) => Ok(self.resolver.determine_generic_partition(request)?),
            None => Ok(None),
        }
    }

    fn execute_with_retries<T>(
        &self,
        mut builder: ExecutionBuilder<'_>,
        work: &mut impl FnMut() -> Result<T, ExecuteError>,
    ) -> Result<T, ExecuteError> {
        let definition = self.transaction_definition(&builder);
        let mut attempt: u32 = 0;
        loop {
            let error = match self.run_boundary(&definition, work) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            builder.compensate();

            match error {
                ExecuteError::Conflict(conflict)
                | ExecuteError::RetriesExhausted { conflict, .. } => {
                    debug!(kind = %conflict.kind, conflict = %conflict, "conflict detected in transactional unit");
                    let max_retries = self.max_retries_for(builder.request.as_ref(), &conflict);
                    if attempt < max_retries {
                        let delay = retry::backoff_for_attempt(attempt);
                        info!(
                            sleep_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "starting a transaction retry after a conflict or constraint failure"
                        );
                        metrics::counter!("transaction_retries_total").increment(1);
                        self.sleeper.sleep(delay);
                        attempt += 1;
                    } else {
                        return Err(Self::terminal_conflict(attempt, max_retries, conflict));
                    }
                }
                other => {
                    debug!(error = %other, "transaction failure is not retriable");
                    return Err(other);
                }
            }
        }
    }

    fn run_boundary<T>(
        &self,
        definition: &TransactionDefinition,
        work: &mut impl FnMut() -> Result<T, ExecuteError>,
    ) -> Result<T, ExecuteError> {
        let mut result: Option<T> = None;
        self.runner.run_in_transaction(definition, &mut || {
            result = Some(work()?);
            Ok(())
        })?;
        result.ok_or_else(|| {
            ExecuteError::Internal(anyhow::anyhow!(
                "transaction runner returned without running the unit of work"
            ))
        })
    }

    fn transaction_definition(&self, builder: &ExecutionBuilder<'_>) -> TransactionDefinition {
        let isolation = if self.runner.supports_custom_isolation() {
            builder.isolation
        } else {
            if builder.isolation != Isolation::Default {
                trace!(
                    requested = ?builder.isolation,
                    "runner does not support custom isolation, using the default level"
                );
            }
            Isolation::Default
        };
        TransactionDefinition {
            propagation: builder.propagation.unwrap_or(Propagation::Required),
            isolation,
            read_only: builder.read_only,
        }
    }

    /// Retry budget for `conflict`: definition races get a fixed budget
    /// of 3 since the loser just needs to see the winner's row; anything
    /// else is up to the version-conflict extension point, defaulting to
    /// no retries.
    fn max_retries_for(&self, request: Option<&RequestContext>, conflict: &ConflictError) -> u32 {
        if conflict.kind == ConflictKind::DuplicateDefinition {
            return 3;
        }
        if self.hooks.has_hooks(HookKind::VersionConflict) {
            if let Some(policy) = self.hooks.invoke_version_conflict(request) {
                if policy.retry {
                    return policy.max_retries;
                }
            }
        }
        0
    }

    fn terminal_conflict(attempt: u32, max_retries: u32, conflict: ConflictError) -> ExecuteError {
        if attempt > 0 {
            info!(retries = max_retries, conflict = %conflict, "max retries exceeded for version conflict");
            metrics::counter!("transaction_conflicts_exhausted_total").increment(1);
            ExecuteError::RetriesExhausted {
                retries: max_retries,
                conflict,
            }
        } else {
            ExecuteError::Conflict(conflict)
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionBuilder
// ---------------------------------------------------------------------------

/// Describes one transactional unit of work. Consumed by
/// [`ExecutionBuilder::run`], so a builder cannot be reused or mutated
/// after execution starts.
pub struct ExecutionBuilder<'a> {
    service: &'a TransactionExecutionService,
    request: Option<RequestContext>,
    partition: Option<PartitionId>,
    propagation: Option<Propagation>,
    isolation: Isolation,
    read_only: bool,
    on_rollback: Option<Box<dyn FnMut()>>,
    undo_log: Option<UndoLog>,
}

impl<'a> ExecutionBuilder<'a> {
    fn new(service: &'a TransactionExecutionService, request: Option<RequestContext>) -> Self {
        Self {
            service,
            request,
            partition: None,
            propagation: None,
            isolation: Isolation::Default,
            read_only: false,
            on_rollback: None,
            undo_log: None,
        }
    }

    /// Pins the unit of work to `partition`, bypassing resolution.
    #[must_use]
    pub fn with_partition(mut self, partition: PartitionId) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Requests an explicit propagation for the boundary. Anything other
    /// than [`Propagation::Required`] also opts the unit out of joining
    /// an enclosing transaction.
    #[must_use]
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = Some(propagation);
        self
    }

    /// Requests an isolation level. Honored only when the runner supports
    /// custom isolation; downgraded to the default level otherwise.
    #[must_use]
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Marks the unit read-only. Read-only units may join read-only
    /// transactions; read-write units may not.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Registers a callback invoked first whenever an attempt is rolled
    /// back, before the undo log drains.
    #[must_use]
    pub fn on_rollback(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_rollback = Some(Box::new(callback));
        self
    }

    /// Attaches an undo log drained on every failed attempt.
    #[must_use]
    pub fn with_undo_log(mut self, undo_log: UndoLog) -> Self {
        self.undo_log = Some(undo_log);
        self
    }

    /// Runs `work` under this builder's terms and returns its result.
    ///
    /// # Errors
    ///
    /// Returns resolution failures, the terminal conflict when retries
    /// are exhausted, or whatever non-retriable error `work` produced.
    pub fn run<T>(self, work: impl FnMut() -> Result<T, ExecuteError>) -> Result<T, ExecuteError> {
        let service = self.service;
        service.execute(self, work)
    }

    /// Runs the rollback callback and drains the undo log.
    fn compensate(&mut self) {
        trace!("rolling back transaction processing state");
        if let Some(on_rollback) = self.on_rollback.as_mut() {
            on_rollback();
        }
        if let Some(undo_log) = &self.undo_log {
            undo_log.compensate();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
