//! Address space, liveness, and local interface lookup for active scanning.

pub mod interfaces;
pub mod range;
pub mod reachability;
