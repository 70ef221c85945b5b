//! Agent roster and execution interface
//!
//! - [`AgentRole`]: the closed set of eleven roles with their capabilities,
//!   memory affinity and access tier
//! - [`Agent`]: the single execution contract every role implements
//! - [`AgentRegistry`]: role → implementation lookup with capability routing

mod agent;
mod registry;
mod role;

pub use agent::{Agent, AgentError};
pub use registry::AgentRegistry;
pub use role::AgentRole;
