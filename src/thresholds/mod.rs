//! Per-(machine type, metric) threshold bounds
//!
//! - [`registry`]: the concurrent bound map shared by every reader
//! - [`replica`]: periodic pull of the authoritative bounds into a local registry
//! - [`evaluator`]: compares payload samples against a registry

pub mod evaluator;
pub mod registry;
pub mod replica;

pub use evaluator::{Violation, evaluate};
pub use registry::{BoundKind, Bounds, ThresholdError, ThresholdRegistry, ThresholdSnapshot};
pub use replica::{RefreshOutcome, ThresholdReplica, ThresholdSource};
