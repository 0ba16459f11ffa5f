use serde::{Deserialize, Serialize};

use crate::partition::PartitionId;

/// How a request entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOrigin {
    /// An interactive caller: REST, UI, or an integration acting for a user.
    Client,
    /// Internal machinery: background jobs, startup tasks, maintenance.
    System,
}

/// Per-request context carrying origin, tenancy, and partition information.
/// Threaded through partition resolution and transactional execution so the
/// two agree on where a request's data lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// How this request entered the system.
    pub origin: RequestOrigin,
    /// Tenant scope from the caller's URL or headers. `None` for
    /// single-tenant deployments or tenant-less system work.
    pub tenant_id: Option<String>,
    /// Partition pre-selected by the caller. Only honored for
    /// system-originated requests; client requests are resolved through
    /// the registered extension points instead.
    pub partition: Option<PartitionId>,
    /// Correlation identifier for log output.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// A client-originated request with nothing resolved yet.
    #[must_use]
    pub fn client() -> Self {
        Self {
            origin: RequestOrigin::Client,
            tenant_id: None,
            partition: None,
            request_id: None,
        }
    }

    /// A system-originated request with no partition preference.
    #[must_use]
    pub fn system() -> Self {
        Self {
            origin: RequestOrigin::System,
            tenant_id: None,
            partition: None,
            request_id: None,
        }
    }

    /// A system-originated request pinned to `partition`.
    #[must_use]
    pub fn system_on_partition(partition: PartitionId) -> Self {
        Self {
            origin: RequestOrigin::System,
            tenant_id: None,
            partition: Some(partition),
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.origin == RequestOrigin::System
    }

    /// Whether the caller named a partition, either directly or through a
    /// tenant identifier.
    #[must_use]
    pub fn has_explicit_partition(&self) -> bool {
        self.partition.is_some() || self.tenant_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_origin() {
        assert!(!RequestContext::client().is_system());
        assert!(RequestContext::system().is_system());
        assert!(RequestContext::system_on_partition(PartitionId::from_id(1)).is_system());
    }

    #[test]
    fn explicit_partition_via_value_or_tenant() {
        assert!(!RequestContext::system().has_explicit_partition());
        assert!(RequestContext::system_on_partition(PartitionId::default_partition())
            .has_explicit_partition());
        assert!(RequestContext::system()
            .with_tenant_id("tenant-a")
            .has_explicit_partition());
    }
}
