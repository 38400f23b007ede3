//! Custom resource types for the Storm operator: [`Cluster`], [`Topology`], and [`WorkerPool`].
//!
//! Each type follows the same shape (a `kube::CustomResource` derive with a `status`
//! subresource and print columns for `phase`/age), grown to the richer spec/status
//! surface each of the three resources needs.

mod cluster;
mod condition;
mod topology;
mod workerpool;

pub use cluster::*;
pub use condition::*;
pub use topology::*;
pub use workerpool::*;

/// Standard condition `type` values written by the three reconcilers.
pub mod condition_types {
    pub const AVAILABLE: &str = "Available";
    pub const READY: &str = "Ready";
}
