//! In-memory operation tracking and domain events.

/// Domain events and publishers.
pub mod events;
/// Operation state machine.
pub mod manager;
