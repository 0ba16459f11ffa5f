//! Provisioned-partition metadata lookups.
//!
//! Partition resolution needs to turn names into ids and ids into names.
//! [`PartitionDirectory`] is the read-only seam it does that through;
//! [`InMemoryPartitionDirectory`] is the concrete store used by embedded
//! deployments and tests. Database-backed deployments implement the trait
//! over their partition table.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata for one provisioned partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDefinition {
    /// Stable numeric id. Unique across the deployment.
    pub id: i32,
    /// Human-facing name. Unique across the deployment.
    pub name: String,
    /// Free-text description, if the administrator provided one.
    pub description: Option<String>,
}

impl PartitionDefinition {
    #[must_use]
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
        }
    }
}

/// Read-only id and name lookups against provisioned partition metadata.
pub trait PartitionDirectory: Send + Sync {
    /// The partition with this numeric id, if provisioned.
    fn find_by_id(&self, id: i32) -> Option<PartitionDefinition>;

    /// The partition with this exact name, if provisioned.
    fn find_by_name(&self, name: &str) -> Option<PartitionDefinition>;
}

/// Rejected registration of a partition definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("a partition with id {0} is already registered")]
    DuplicateId(i32),
    #[error("a partition named {0} is already registered")]
    DuplicateName(String),
}

/// In-memory partition metadata, indexed by id and by name.
#[derive(Debug, Default)]
pub struct InMemoryPartitionDirectory {
    by_id: DashMap<i32, PartitionDefinition>,
    by_name: DashMap<String, i32>,
}

impl InMemoryPartitionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a partition definition.
    ///
    /// # Errors
    ///
    /// Returns an error when the id or the name is already taken.
    pub fn register(&self, definition: PartitionDefinition) -> Result<(), DirectoryError> {
        if self.by_id.contains_key(&definition.id) {
            return Err(DirectoryError::DuplicateId(definition.id));
        }
        if self.by_name.contains_key(&definition.name) {
            return Err(DirectoryError::DuplicateName(definition.name));
        }
        self.by_name.insert(definition.name.clone(), definition.id);
        self.by_id.insert(definition.id, definition);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl PartitionDirectory for InMemoryPartitionDirectory {
    fn find_by_id(&self, id: i32) -> Option<PartitionDefinition> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    fn find_by_name(&self, name: &str) -> Option<PartitionDefinition> {
        let id = *self.by_name.get(name)?;
        self.find_by_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_directory() -> InMemoryPartitionDirectory {
        let directory = InMemoryPartitionDirectory::new();
        directory
            .register(PartitionDefinition::new(1, "tenant-a"))
            .unwrap();
        directory
            .register(PartitionDefinition::new(2, "tenant-b"))
            .unwrap();
        directory
    }

    #[test]
    fn lookup_by_id_and_name() {
        let directory = make_directory();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.find_by_id(1).unwrap().name, "tenant-a");
        assert_eq!(directory.find_by_name("tenant-b").unwrap().id, 2);
        assert!(directory.find_by_id(9).is_none());
        assert!(directory.find_by_name("nobody").is_none());
    }

    #[test]
    fn duplicate_registrations_are_rejected() {
        let directory = make_directory();
        assert_eq!(
            directory.register(PartitionDefinition::new(1, "fresh-name")),
            Err(DirectoryError::DuplicateId(1))
        );
        assert_eq!(
            directory.register(PartitionDefinition::new(9, "tenant-a")),
            Err(DirectoryError::DuplicateName("tenant-a".into()))
        );
        assert_eq!(directory.len(), 2);
    }
}
