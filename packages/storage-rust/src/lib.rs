//! Cohort storage: partition resolution, extension points, and transactional execution.

pub mod execution;
pub mod hooks;
pub mod partition;

pub use execution::{ExecuteError, TransactionExecutionService};
pub use hooks::HookRegistry;
pub use partition::{PartitionResolutionService, PartitionSettings};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
