//! Partitioning configuration.
//!
//! [`PartitionSettings`] is the single switchboard for multi-tenant
//! behavior: whether partitioning is on at all, how the default partition
//! is identified, and which resource kinds are pinned to it.

use std::collections::HashSet;

use cohort_core::partition::PartitionId;

/// Name reserved for the default partition.
pub const DEFAULT_PARTITION_NAME: &str = "DEFAULT";

/// Partitioning configuration for a repository instance.
#[derive(Debug, Clone)]
pub struct PartitionSettings {
    /// Master switch. When off, every resolution returns the
    /// all-partitions scope and partition compatibility checks pass
    /// unconditionally.
    pub partitioning_enabled: bool,
    /// Partitions are identified by id only; name normalization and
    /// name/id consistency checks are skipped.
    pub unnamed_partition_mode: bool,
    /// Numeric id of the default partition. `None` leaves the default as
    /// an unresolved placeholder, for deployments whose storage layer
    /// models the default partition as NULL.
    pub default_partition_id: Option<i32>,
    /// Display name of the default partition.
    pub default_partition_name: String,
    /// Resource kinds that must always live in the default partition.
    pub non_partitionable_kinds: HashSet<String>,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            partitioning_enabled: false,
            unnamed_partition_mode: false,
            default_partition_id: None,
            default_partition_name: DEFAULT_PARTITION_NAME.to_string(),
            non_partitionable_kinds: default_non_partitionable_kinds(),
        }
    }
}

impl PartitionSettings {
    /// Settings with partitioning switched on and everything else default.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            partitioning_enabled: true,
            ..Self::default()
        }
    }

    /// Whether `kind` may be placed outside the default partition.
    #[must_use]
    pub fn is_kind_partitionable(&self, kind: &str) -> bool {
        !self.non_partitionable_kinds.contains(kind)
    }

    /// Like [`Self::is_kind_partitionable`] but treats an absent kind
    /// (server-level operations) as partitionable.
    #[must_use]
    pub fn is_kind_non_partitionable(&self, kind: Option<&str>) -> bool {
        kind.is_some_and(|k| !self.is_kind_partitionable(k))
    }

    /// The default partition as a scope: the configured id when set,
    /// otherwise the unresolved placeholder.
    #[must_use]
    pub fn default_request_partition(&self) -> PartitionId {
        match self.default_partition_id {
            Some(id) => PartitionId::from_id(id),
            None => PartitionId::default_partition(),
        }
    }

    /// Whether `partition` resolves to the default partition.
    ///
    /// True when every ref either carries the configured default id, is
    /// the unresolved placeholder, or is named with the default name.
    /// The all-partitions scope is never the default partition.
    #[must_use]
    pub fn is_default_partition(&self, partition: &PartitionId) -> bool {
        if partition.is_all_partitions() || partition.refs().is_empty() {
            return false;
        }
        partition.refs().iter().all(|r| {
            r.is_unresolved_default()
                || (r.id().is_some() && r.id() == self.default_partition_id)
                || r.name() == Some(self.default_partition_name.as_str())
        })
    }
}

/// Kinds that describe the system itself rather than partitioned data.
/// They are read during request processing for every tenant, so they live
/// in the default partition where every tenant's requests can see them.
fn default_non_partitionable_kinds() -> HashSet<String> {
    [
        // Infrastructure
        "SearchParameter",
        // Validation and conformance
        "StructureDefinition",
        "Questionnaire",
        "CapabilityStatement",
        "CompartmentDefinition",
        "OperationDefinition",
        "Library",
        // Terminology
        "ConceptMap",
        "CodeSystem",
        "ValueSet",
        "NamingSystem",
        "StructureMap",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::partition::PartitionRef;

    #[test]
    fn defaults_are_disabled_and_named() {
        let settings = PartitionSettings::default();
        assert!(!settings.partitioning_enabled);
        assert!(!settings.unnamed_partition_mode);
        assert_eq!(settings.default_partition_id, None);
        assert_eq!(settings.default_partition_name, "DEFAULT");
        assert!(PartitionSettings::enabled().partitioning_enabled);
    }

    #[test]
    fn conformance_kinds_are_not_partitionable() {
        let settings = PartitionSettings::default();
        assert!(!settings.is_kind_partitionable("CodeSystem"));
        assert!(!settings.is_kind_partitionable("SearchParameter"));
        assert!(settings.is_kind_partitionable("Patient"));
        assert!(settings.is_kind_non_partitionable(Some("ValueSet")));
        assert!(!settings.is_kind_non_partitionable(None));
    }

    #[test]
    fn default_request_partition_uses_configured_id() {
        let mut settings = PartitionSettings::enabled();
        assert_eq!(
            settings.default_request_partition(),
            PartitionId::default_partition()
        );
        settings.default_partition_id = Some(0);
        assert_eq!(settings.default_request_partition(), PartitionId::from_id(0));
    }

    #[test]
    fn default_partition_detection() {
        let mut settings = PartitionSettings::enabled();

        assert!(settings.is_default_partition(&PartitionId::default_partition()));
        assert!(settings.is_default_partition(&PartitionId::from_name("DEFAULT")));
        assert!(!settings.is_default_partition(&PartitionId::from_id(3)));
        assert!(!settings.is_default_partition(&PartitionId::all_partitions()));

        settings.default_partition_id = Some(0);
        assert!(settings.is_default_partition(&PartitionId::from_id(0)));
        assert!(settings.is_default_partition(&PartitionId::default_partition()));
        assert!(!settings.is_default_partition(&PartitionId::from_id(1)));
        assert!(settings.is_default_partition(&PartitionId::from_refs(vec![
            PartitionRef::new(Some(0), Some("DEFAULT".into())),
        ])));
    }
}
