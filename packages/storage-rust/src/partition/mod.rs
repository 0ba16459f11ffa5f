//! Multi-tenant partition resolution.
//!
//! This module decides where a request's data lives:
//!
//! 1. **Settings** (`settings`): the partitioning switchboard
//! 2. **Directory** (`directory`): provisioned-partition metadata lookups
//! 3. **Resolver** (`resolver`): read/create/generic resolution paths

pub mod directory;
pub mod resolver;
pub mod settings;

// Re-export key types for convenient access.
pub use directory::{
    DirectoryError, InMemoryPartitionDirectory, PartitionDefinition, PartitionDirectory,
};
pub use resolver::{PartitionResolutionService, ResolveError};
pub use settings::{PartitionSettings, DEFAULT_PARTITION_NAME};
