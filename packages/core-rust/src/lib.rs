//! Cohort core: partition identity and request-context value types.

pub mod context;
pub mod partition;

pub use context::{RequestContext, RequestOrigin};
pub use partition::{PartitionId, PartitionRef};
