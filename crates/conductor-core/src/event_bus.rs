//! EventBus - broadcast-based event system for orchestration lifecycle events.
//!
//! The workflow, coordinator, message bus and learning engine publish here so
//! that the CLI, log sinks and tests can observe progress without coupling to
//! the components themselves.

/// Core event bus implementation (broadcast channel).
pub mod bus;
/// Event type definitions.
pub mod types;

pub use bus::EventBus;
pub use types::OrchestrationEvent;

#[cfg(test)]
mod tests;
