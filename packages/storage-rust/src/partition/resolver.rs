//! Partition resolution for reads, creates, and generic requests.
//!
//! [`PartitionResolutionService`] decides which partition a piece of work
//! belongs to. Three entry points cover the three call shapes:
//!
//! - [`determine_read_partition`](PartitionResolutionService::determine_read_partition):
//!   read-type operations (read, vread, search, history),
//! - [`determine_create_partition`](PartitionResolutionService::determine_create_partition):
//!   create-type operations, validated to exactly one target partition,
//! - [`determine_generic_partition`](PartitionResolutionService::determine_generic_partition):
//!   operations that are neither, such as transaction bundles.
//!
//! System requests may name their partition directly (or via tenant id);
//! everything else is answered by the identity extension points. Whatever
//! comes back is normalized against provisioned partition metadata so ids
//! and names always travel together.

use std::collections::HashSet;
use std::sync::Arc;

use cohort_core::context::RequestContext;
use cohort_core::partition::{PartitionId, PartitionRef};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::hooks::{HookKind, HookRegistry, ReadDetails};
use crate::partition::directory::PartitionDirectory;
use crate::partition::settings::PartitionSettings;

// ---------------------------------------------------------------------------
// ResolveError
// ---------------------------------------------------------------------------

/// Why partition resolution failed.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Partitioning is on but nothing identified a partition. Some
    /// interceptor must own the routing decision; none did.
    #[error("no extension point identified a partition; consulted: {}", format_kinds(.consulted))]
    NoPartitionResolved { consulted: Vec<HookKind> },

    /// Creates go to exactly one partition.
    #[error("create operations must target exactly one partition, found {partition}")]
    CreateCardinality { partition: PartitionId },

    /// A system caller tried to write a non-partitionable kind somewhere
    /// other than the default partition.
    #[error("system request attempted to write non-partitionable data to partition {partition}")]
    NonPartitionableSystemWrite { partition: PartitionId },

    /// A caller tried to place a non-partitionable kind somewhere other
    /// than the default partition.
    #[error("resource kind {kind} is not partitionable and cannot be placed on partition {partition}")]
    NonPartitionableKind { kind: String, partition: PartitionId },

    #[error("no partition is provisioned with name {0}")]
    UnknownPartitionName(String),

    #[error("no partition is provisioned with id {0}")]
    UnknownPartitionId(i32),

    /// A ref arrived carrying both a name and an id, and they belong to
    /// different partitions.
    #[error("partition {name} is not provisioned with id {id}")]
    NameIdMismatch { name: String, id: i32 },

    /// A partition-selected callback rejected the routing decision.
    #[error("partition selection vetoed for kind {kind}: {source}")]
    SelectionVetoed {
        kind: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ResolveError {
    /// Whether the failure reflects caller input rather than a deployment
    /// or programming problem. User errors map to 4xx responses at the
    /// surface; the rest map to 500s.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPartitionName(_)
                | Self::UnknownPartitionId(_)
                | Self::NonPartitionableKind { .. }
                | Self::SelectionVetoed { .. }
        )
    }
}

fn format_kinds(kinds: &[HookKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// PartitionResolutionService
// ---------------------------------------------------------------------------

/// Maps requests to partitions and normalizes the result.
pub struct PartitionResolutionService {
    settings: Arc<PartitionSettings>,
    directory: Arc<dyn PartitionDirectory>,
    hooks: Arc<HookRegistry>,
}

impl PartitionResolutionService {
    #[must_use]
    pub fn new(
        settings: Arc<PartitionSettings>,
        directory: Arc<dyn PartitionDirectory>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            settings,
            directory,
            hooks,
        }
    }

    /// Resolves the partition for a read-type operation.
    ///
    /// System requests with an explicit partition are honored directly,
    /// except that non-partitionable kinds are forced onto the default
    /// partition. Client requests are answered by the any-operation
    /// identity point, falling back to the read identity point.
    ///
    /// # Errors
    ///
    /// Fails when no extension point identifies a partition, when the
    /// identified partition is not provisioned, or when a
    /// partition-selected callback vetoes the choice.
    pub fn determine_read_partition(
        &self,
        request: Option<&RequestContext>,
        details: &ReadDetails,
    ) -> Result<PartitionId, ResolveError> {
        if !self.settings.partitioning_enabled {
            return Ok(PartitionId::all_partitions());
        }

        let substitute;
        let context = match request {
            Some(context) => context,
            None => {
                trace!("no request context present, substituting a system context");
                substitute = RequestContext::system();
                &substitute
            }
        };

        let kind = details.resource_kind.as_deref();
        let non_partitionable = self.settings.is_kind_non_partitionable(kind);

        let resolved = if context.is_system() && context.has_explicit_partition() && !non_partitionable
        {
            Some(self.system_request_partition(context, false)?)
        } else if context.is_system() && non_partitionable {
            if context.has_explicit_partition() {
                warn!(
                    resource_kind = ?kind,
                    "explicit partition discarded: kind is pinned to the default partition"
                );
            } else {
                trace!(resource_kind = ?kind, "kind is pinned to the default partition");
            }
            Some(self.settings.default_request_partition())
        } else if self.hooks.has_hooks(HookKind::IdentifyPartitionAny) {
            self.hooks.invoke_identify_any(context)
        } else if self.hooks.has_hooks(HookKind::IdentifyPartitionRead) {
            self.hooks.invoke_identify_read(context, details)
        } else {
            None
        };

        let resolved = resolved.ok_or_else(|| ResolveError::NoPartitionResolved {
            consulted: vec![
                HookKind::IdentifyPartitionAny,
                HookKind::IdentifyPartitionRead,
            ],
        })?;

        let normalized = self.validate_and_normalize(resolved, context, kind)?;
        debug!(
            action = "read",
            resource_kind = ?kind,
            tenant_id = ?context.tenant_id,
            partition = %normalized,
            "partition routing decision"
        );
        Ok(normalized)
    }

    /// Resolves the partition for a create-type operation.
    ///
    /// System requests with an explicit partition are honored, but a
    /// system write of a non-partitionable kind anywhere other than the
    /// default partition is rejected outright. Other requests are
    /// answered by the any-operation identity point, falling back to the
    /// create identity point with the resource body. Non-partitionable
    /// kinds left unresolved land on the default partition.
    ///
    /// # Errors
    ///
    /// Fails when no partition is identified, when the target is not a
    /// single provisioned partition, when a non-partitionable kind is
    /// aimed outside the default partition, or when a partition-selected
    /// callback vetoes the choice.
    pub fn determine_create_partition(
        &self,
        request: Option<&RequestContext>,
        resource: &Value,
        resource_kind: &str,
    ) -> Result<PartitionId, ResolveError> {
        if !self.settings.partitioning_enabled {
            return Ok(PartitionId::all_partitions());
        }

        let substitute;
        let context = match request {
            Some(context) => context,
            None => {
                trace!("no request context present, substituting a system context");
                substitute = RequestContext::system();
                &substitute
            }
        };

        let non_partitionable = !self.settings.is_kind_partitionable(resource_kind);

        let resolved = if context.is_system() && context.has_explicit_partition() {
            Some(self.system_request_partition(context, non_partitionable)?)
        } else if self.hooks.has_hooks(HookKind::IdentifyPartitionAny) {
            self.hooks.invoke_identify_any(context)
        } else if self.hooks.has_hooks(HookKind::IdentifyPartitionCreate) {
            self.hooks.invoke_identify_create(context, resource)
        } else {
            None
        };

        let resolved = match resolved {
            Some(partition) => partition,
            None if non_partitionable => {
                trace!(resource_kind, "kind is pinned to the default partition");
                self.settings.default_request_partition()
            }
            None => {
                return Err(ResolveError::NoPartitionResolved {
                    consulted: vec![
                        HookKind::IdentifyPartitionCreate,
                        HookKind::IdentifyPartitionAny,
                    ],
                })
            }
        };

        self.validate_partition_for_create(&resolved, resource_kind)?;
        let normalized = self.validate_and_normalize(resolved, context, Some(resource_kind))?;
        debug!(
            action = "create",
            resource_kind,
            tenant_id = ?context.tenant_id,
            partition = %normalized,
            "partition routing decision"
        );
        Ok(normalized)
    }

    /// Resolves the partition for an operation that is neither a read nor
    /// a create, such as a transaction bundle. Unlike the other paths, no
    /// answer is acceptable: the operation may span partitions decided
    /// deeper in its processing.
    ///
    /// # Errors
    ///
    /// Fails when an identified partition cannot be normalized.
    pub fn determine_generic_partition(
        &self,
        request: &RequestContext,
    ) -> Result<Option<PartitionId>, ResolveError> {
        if !self.settings.partitioning_enabled {
            return Ok(Some(PartitionId::all_partitions()));
        }

        let resolved = if request.is_system() && request.has_explicit_partition() {
            Some(self.system_request_partition(request, false)?)
        } else if self.hooks.has_hooks(HookKind::IdentifyPartitionAny) {
            self.hooks.invoke_identify_any(request)
        } else {
            None
        };

        let normalized = match resolved {
            Some(partition) => Some(self.validate_and_normalize(partition, request, None)?),
            None => None,
        };
        debug!(
            action = "generic",
            tenant_id = ?request.tenant_id,
            partition = ?normalized,
            "partition routing decision"
        );
        Ok(normalized)
    }

    /// Whether `kind` may be placed outside the default partition.
    #[must_use]
    pub fn is_kind_partitionable(&self, kind: &str) -> bool {
        self.settings.is_kind_partitionable(kind)
    }

    /// The configured default partition id, if any.
    #[must_use]
    pub fn default_partition_id(&self) -> Option<i32> {
        self.settings.default_partition_id
    }

    /// The numeric ids a read against `partition` touches. Unresolved
    /// placeholders map to the configured default id; `None` entries
    /// survive when no default id is configured. Callers are expected to
    /// pass normalized values.
    #[must_use]
    pub fn to_read_partitions(&self, partition: &PartitionId) -> HashSet<Option<i32>> {
        partition
            .ids()
            .map(|id| id.or(self.settings.default_partition_id))
            .collect()
    }

    // ---- internals ----

    /// Partition cascade for system requests: explicit value, then tenant
    /// name, then the default placeholder.
    fn system_request_partition(
        &self,
        context: &RequestContext,
        must_be_default: bool,
    ) -> Result<PartitionId, ResolveError> {
        let partition = if let Some(partition) = &context.partition {
            partition.clone()
        } else if let Some(tenant_id) = &context.tenant_id {
            PartitionId::from_name(tenant_id.clone())
        } else {
            PartitionId::default_partition()
        };
        if must_be_default && !self.settings.is_default_partition(&partition) {
            return Err(ResolveError::NonPartitionableSystemWrite { partition });
        }
        Ok(partition)
    }

    fn validate_partition_for_create(
        &self,
        partition: &PartitionId,
        resource_kind: &str,
    ) -> Result<(), ResolveError> {
        if partition.is_all_partitions() || partition.refs().len() != 1 {
            return Err(ResolveError::CreateCardinality {
                partition: partition.clone(),
            });
        }
        if self.settings.is_default_partition(partition) {
            return Ok(());
        }
        if !self.settings.is_kind_partitionable(resource_kind) {
            return Err(ResolveError::NonPartitionableKind {
                kind: resource_kind.to_string(),
                partition: partition.clone(),
            });
        }
        Ok(())
    }

    /// Fills the missing side of every ref, runs the partition-selected
    /// veto point, and replaces default placeholders with the configured
    /// default id.
    fn validate_and_normalize(
        &self,
        partition: PartitionId,
        context: &RequestContext,
        resource_kind: Option<&str>,
    ) -> Result<PartitionId, ResolveError> {
        let before = partition.to_string();
        let mut normalized = partition;

        if !self.settings.unnamed_partition_mode && !normalized.is_all_partitions() {
            normalized = if normalized.has_names() {
                self.normalize_named_refs(&normalized)?
            } else {
                self.normalize_id_refs(&normalized)?
            };
        }

        if let Some(kind) = resource_kind.filter(|kind| !kind.is_empty()) {
            self.hooks
                .invoke_partition_selected(context, &normalized, kind)
                .map_err(|source| ResolveError::SelectionVetoed {
                    kind: kind.to_string(),
                    source,
                })?;
        }

        if let Some(default_id) = self.settings.default_partition_id {
            if normalized.has_unresolved_default() {
                let replaced = PartitionId::from_refs(
                    normalized
                        .refs()
                        .iter()
                        .map(|r| {
                            if r.is_unresolved_default() {
                                PartitionRef::from_id(default_id)
                            } else {
                                r.clone()
                            }
                        })
                        .collect(),
                );
                normalized = replaced;
            }
        }

        trace!(from = %before, to = %normalized, "partition normalization");
        Ok(normalized)
    }

    fn normalize_named_refs(&self, partition: &PartitionId) -> Result<PartitionId, ResolveError> {
        let mut refs = Vec::with_capacity(partition.refs().len());
        for r in partition.refs() {
            let Some(name) = r.name() else {
                refs.push(r.clone());
                continue;
            };
            let expected_id = if name == self.settings.default_partition_name {
                self.settings.default_partition_id
            } else {
                let definition = self
                    .directory
                    .find_by_name(name)
                    .ok_or_else(|| ResolveError::UnknownPartitionName(name.to_string()))?;
                Some(definition.id)
            };
            if let Some(id) = r.id() {
                if Some(id) != expected_id {
                    return Err(ResolveError::NameIdMismatch {
                        name: name.to_string(),
                        id,
                    });
                }
            }
            refs.push(PartitionRef::new(expected_id, Some(name.to_string())));
        }
        Ok(PartitionId::from_refs(refs))
    }

    fn normalize_id_refs(&self, partition: &PartitionId) -> Result<PartitionId, ResolveError> {
        let mut refs = Vec::with_capacity(partition.refs().len());
        for r in partition.refs() {
            let Some(id) = r.id() else {
                // Default placeholder, handled by the replacement step.
                refs.push(r.clone());
                continue;
            };
            let name = if Some(id) == self.settings.default_partition_id {
                self.settings.default_partition_name.clone()
            } else {
                self.directory
                    .find_by_id(id)
                    .ok_or(ResolveError::UnknownPartitionId(id))?
                    .name
            };
            refs.push(PartitionRef::new(Some(id), Some(name)));
        }
        Ok(PartitionId::from_refs(refs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
