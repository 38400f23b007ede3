/// User-friendly message to display in `status.message` whenever a resource's
/// deletion is pending garbage collection.
pub const TERMINATING: &str = "Resource deletion is pending garbage collection.";

pub const AWAITING_DEPENDENCY: &str =
    "Waiting for the referenced cluster/topology to become ready.";
