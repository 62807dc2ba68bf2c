//! Planning, batch execution and orchestration of group operations.

/// Async orchestrator and query surface.
pub mod archiver;
/// Single-batch executor.
pub mod executor;
/// Operation planner.
pub mod planner;
/// Group reads and id streaming.
pub mod snapshot;
