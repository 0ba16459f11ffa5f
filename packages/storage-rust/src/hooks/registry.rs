//! Extension points consulted during partition resolution and retry.
//!
//! The repository core does not know how a deployment maps requests to
//! partitions; interceptors registered here do. [`HookRegistry`] keeps
//! the registered callbacks per [`HookKind`] and exposes one invoke
//! method per point:
//!
//! - identity points (`any`, `read`, `create`) run in registration order
//!   and the first callback returning `Some` wins,
//! - [`HookKind::PartitionSelected`] is a broadcast: every callback runs
//!   and the first error vetoes the selection,
//! - [`HookKind::VersionConflict`] asks whether a conflicting unit of
//!   work should be retried and with what budget.

use std::fmt;

use cohort_core::context::RequestContext;
use cohort_core::partition::PartitionId;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

// ---------------------------------------------------------------------------
// Hook payloads
// ---------------------------------------------------------------------------

/// Shape of the read-type operation being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOperation {
    Read,
    VersionRead,
    Search,
    History,
}

/// What a read-path caller is about to do, handed to the read identity
/// point so interceptors can route on kind, id, or operation shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDetails {
    /// Resource kind being read. `None` for whole-server history.
    pub resource_kind: Option<String>,
    pub operation: ReadOperation,
    /// Target id for point reads. `None` for searches and history.
    pub resource_id: Option<String>,
}

impl ReadDetails {
    #[must_use]
    pub fn for_read(resource_kind: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_kind: Some(resource_kind.into()),
            operation: ReadOperation::Read,
            resource_id: Some(resource_id.into()),
        }
    }

    #[must_use]
    pub fn for_version_read(
        resource_kind: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_kind: Some(resource_kind.into()),
            operation: ReadOperation::VersionRead,
            resource_id: Some(resource_id.into()),
        }
    }

    #[must_use]
    pub fn for_search(resource_kind: impl Into<String>) -> Self {
        Self {
            resource_kind: Some(resource_kind.into()),
            operation: ReadOperation::Search,
            resource_id: None,
        }
    }

    #[must_use]
    pub fn for_history(resource_kind: Option<String>) -> Self {
        Self {
            resource_kind,
            operation: ReadOperation::History,
            resource_id: None,
        }
    }
}

/// Retry decision returned by the version-conflict point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetryPolicy {
    /// Whether to retry at all.
    pub retry: bool,
    /// Upper bound on retries when `retry` is set.
    pub max_retries: u32,
}

impl ConflictRetryPolicy {
    #[must_use]
    pub fn retry_up_to(max_retries: u32) -> Self {
        Self {
            retry: true,
            max_retries,
        }
    }

    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            retry: false,
            max_retries: 0,
        }
    }
}

/// The extension points this crate consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Identify the partition for any operation.
    IdentifyPartitionAny,
    /// Identify the partition for a read-type operation.
    IdentifyPartitionRead,
    /// Identify the partition for a create-type operation.
    IdentifyPartitionCreate,
    /// A partition has been selected and normalized; veto point.
    PartitionSelected,
    /// A retriable conflict occurred; supply a retry budget.
    VersionConflict,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IdentifyPartitionAny => "identify-partition-any",
            Self::IdentifyPartitionRead => "identify-partition-read",
            Self::IdentifyPartitionCreate => "identify-partition-create",
            Self::PartitionSelected => "partition-selected",
            Self::VersionConflict => "version-conflict",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// HookRegistry
// ---------------------------------------------------------------------------

type IdentifyAnyHook = Box<dyn Fn(&RequestContext) -> Option<PartitionId> + Send + Sync>;
type IdentifyReadHook =
    Box<dyn Fn(&RequestContext, &ReadDetails) -> Option<PartitionId> + Send + Sync>;
type IdentifyCreateHook = Box<dyn Fn(&RequestContext, &Value) -> Option<PartitionId> + Send + Sync>;
type PartitionSelectedHook =
    Box<dyn Fn(&RequestContext, &PartitionId, &str) -> anyhow::Result<()> + Send + Sync>;
type VersionConflictHook =
    Box<dyn Fn(Option<&RequestContext>) -> Option<ConflictRetryPolicy> + Send + Sync>;

/// Registered extension-point callbacks, invoked in registration order.
#[derive(Default)]
pub struct HookRegistry {
    identify_any: RwLock<Vec<IdentifyAnyHook>>,
    identify_read: RwLock<Vec<IdentifyReadHook>>,
    identify_create: RwLock<Vec<IdentifyCreateHook>>,
    partition_selected: RwLock<Vec<PartitionSelectedHook>>,
    version_conflict: RwLock<Vec<VersionConflictHook>>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any callback is registered for `kind`.
    #[must_use]
    pub fn has_hooks(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::IdentifyPartitionAny => !self.identify_any.read().is_empty(),
            HookKind::IdentifyPartitionRead => !self.identify_read.read().is_empty(),
            HookKind::IdentifyPartitionCreate => !self.identify_create.read().is_empty(),
            HookKind::PartitionSelected => !self.partition_selected.read().is_empty(),
            HookKind::VersionConflict => !self.version_conflict.read().is_empty(),
        }
    }

    // ---- registration ----

    pub fn register_identify_any(
        &self,
        hook: impl Fn(&RequestContext) -> Option<PartitionId> + Send + Sync + 'static,
    ) {
        self.identify_any.write().push(Box::new(hook));
    }

    pub fn register_identify_read(
        &self,
        hook: impl Fn(&RequestContext, &ReadDetails) -> Option<PartitionId> + Send + Sync + 'static,
    ) {
        self.identify_read.write().push(Box::new(hook));
    }

    pub fn register_identify_create(
        &self,
        hook: impl Fn(&RequestContext, &Value) -> Option<PartitionId> + Send + Sync + 'static,
    ) {
        self.identify_create.write().push(Box::new(hook));
    }

    pub fn register_partition_selected(
        &self,
        hook: impl Fn(&RequestContext, &PartitionId, &str) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    ) {
        self.partition_selected.write().push(Box::new(hook));
    }

    pub fn register_version_conflict(
        &self,
        hook: impl Fn(Option<&RequestContext>) -> Option<ConflictRetryPolicy> + Send + Sync + 'static,
    ) {
        self.version_conflict.write().push(Box::new(hook));
    }

    // ---- invocation ----

    /// First `Some` from the any-operation identity point.
    #[must_use]
    pub fn invoke_identify_any(&self, request: &RequestContext) -> Option<PartitionId> {
        let result = self.identify_any.read().iter().find_map(|hook| hook(request));
        trace!(point = %HookKind::IdentifyPartitionAny, resolved = ?result, "extension point consulted");
        result
    }

    /// First `Some` from the read identity point.
    #[must_use]
    pub fn invoke_identify_read(
        &self,
        request: &RequestContext,
        details: &ReadDetails,
    ) -> Option<PartitionId> {
        let result = self
            .identify_read
            .read()
            .iter()
            .find_map(|hook| hook(request, details));
        trace!(point = %HookKind::IdentifyPartitionRead, resolved = ?result, "extension point consulted");
        result
    }

    /// First `Some` from the create identity point.
    #[must_use]
    pub fn invoke_identify_create(
        &self,
        request: &RequestContext,
        resource: &Value,
    ) -> Option<PartitionId> {
        let result = self
            .identify_create
            .read()
            .iter()
            .find_map(|hook| hook(request, resource));
        trace!(point = %HookKind::IdentifyPartitionCreate, resolved = ?result, "extension point consulted");
        result
    }

    /// Broadcasts the selected partition to every callback. The first
    /// error vetoes the selection.
    ///
    /// # Errors
    ///
    /// Propagates the first callback error unchanged.
    pub fn invoke_partition_selected(
        &self,
        request: &RequestContext,
        partition: &PartitionId,
        resource_kind: &str,
    ) -> anyhow::Result<()> {
        for hook in self.partition_selected.read().iter() {
            hook(request, partition, resource_kind)?;
        }
        trace!(point = %HookKind::PartitionSelected, partition = %partition, "extension point consulted");
        Ok(())
    }

    /// First `Some` from the version-conflict point. `request` is absent
    /// for units of work started without a request context.
    #[must_use]
    pub fn invoke_version_conflict(
        &self,
        request: Option<&RequestContext>,
    ) -> Option<ConflictRetryPolicy> {
        let result = self
            .version_conflict
            .read()
            .iter()
            .find_map(|hook| hook(request));
        trace!(point = %HookKind::VersionConflict, policy = ?result, "extension point consulted");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn make_context() -> RequestContext {
        RequestContext::client().with_request_id("req-1")
    }

    // ---- identity points ----

    #[test]
    fn first_some_wins_in_registration_order() {
        let registry = HookRegistry::new();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_calls_in_hook = Arc::clone(&second_calls);

        registry.register_identify_any(|_| Some(PartitionId::from_id(1)));
        registry.register_identify_any(move |_| {
            second_calls_in_hook.fetch_add(1, Ordering::SeqCst);
            Some(PartitionId::from_id(2))
        });

        let resolved = registry.invoke_identify_any(&make_context());
        assert_eq!(resolved, Some(PartitionId::from_id(1)));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn none_falls_through_to_later_hooks() {
        let registry = HookRegistry::new();
        registry.register_identify_any(|_| None);
        registry.register_identify_any(|_| Some(PartitionId::from_name("fallback")));

        let resolved = registry.invoke_identify_any(&make_context());
        assert_eq!(resolved, Some(PartitionId::from_name("fallback")));
    }

    #[test]
    fn read_hook_sees_operation_details() {
        let registry = HookRegistry::new();
        registry.register_identify_read(|_, details| {
            assert_eq!(details.operation, ReadOperation::Search);
            assert_eq!(details.resource_kind.as_deref(), Some("Patient"));
            assert!(details.resource_id.is_none());
            Some(PartitionId::from_id(5))
        });

        let resolved =
            registry.invoke_identify_read(&make_context(), &ReadDetails::for_search("Patient"));
        assert_eq!(resolved, Some(PartitionId::from_id(5)));
    }

    #[test]
    fn create_hook_sees_resource_body() {
        let registry = HookRegistry::new();
        registry.register_identify_create(|_, resource| {
            let tenant = resource.get("managingOrganization")?.as_str()?;
            Some(PartitionId::from_name(tenant))
        });

        let resource = serde_json::json!({ "managingOrganization": "org-7" });
        let resolved = registry.invoke_identify_create(&make_context(), &resource);
        assert_eq!(resolved, Some(PartitionId::from_name("org-7")));
    }

    #[test]
    fn has_hooks_tracks_each_point() {
        let registry = HookRegistry::new();
        assert!(!registry.has_hooks(HookKind::IdentifyPartitionAny));
        assert!(!registry.has_hooks(HookKind::PartitionSelected));

        registry.register_identify_any(|_| None);
        registry.register_partition_selected(|_, _, _| Ok(()));

        assert!(registry.has_hooks(HookKind::IdentifyPartitionAny));
        assert!(registry.has_hooks(HookKind::PartitionSelected));
        assert!(!registry.has_hooks(HookKind::IdentifyPartitionRead));
        assert!(!registry.has_hooks(HookKind::VersionConflict));
    }

    // ---- partition-selected ----

    #[test]
    fn selected_point_runs_every_hook_until_veto() {
        let registry = HookRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_first = Arc::clone(&calls);
        registry.register_partition_selected(move |_, _, _| {
            calls_first.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry.register_partition_selected(|_, _, kind| {
            anyhow::bail!("kind {kind} not allowed here")
        });
        let calls_third = Arc::clone(&calls);
        registry.register_partition_selected(move |_, _, _| {
            calls_third.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = registry.invoke_partition_selected(
            &make_context(),
            &PartitionId::from_id(2),
            "Observation",
        );
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_selected_point_is_a_no_op() {
        let registry = HookRegistry::new();
        let result = registry.invoke_partition_selected(
            &make_context(),
            &PartitionId::from_id(2),
            "Observation",
        );
        assert!(result.is_ok());
    }

    // ---- version-conflict ----

    #[test]
    fn conflict_policy_with_and_without_request() {
        let registry = HookRegistry::new();
        registry.register_version_conflict(|request| {
            if request.is_some() {
                Some(ConflictRetryPolicy::retry_up_to(4))
            } else {
                Some(ConflictRetryPolicy::no_retry())
            }
        });

        let context = make_context();
        assert_eq!(
            registry.invoke_version_conflict(Some(&context)),
            Some(ConflictRetryPolicy::retry_up_to(4))
        );
        assert_eq!(
            registry.invoke_version_conflict(None),
            Some(ConflictRetryPolicy::no_retry())
        );
    }
}
