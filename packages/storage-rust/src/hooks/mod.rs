//! Extension points for deployment-specific behavior.
//!
//! Partition routing and retry policy are deployment decisions, not core
//! ones. Deployments register callbacks on a [`HookRegistry`] and the
//! resolution and execution services consult it at fixed points.

pub mod registry;

// Re-export key types for convenient access.
pub use registry::{
    ConflictRetryPolicy, HookKind, HookRegistry, ReadDetails, ReadOperation,
};
