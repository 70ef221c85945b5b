//! Conductor Memory: historical knowledge store
//!
//! Holds the project facts, reusable patterns, team conventions and error
//! post-mortems that the orchestrator consults when planning and preparing
//! agent context, and that the learning engine writes back into.
//!
//! # Architecture
//!
//! ```text
//!   Planner / ContextEngine (read)      LearningEngine / teach (write)
//!                 │                                  │
//!                 └────────────► MemoryStore ◄───────┘
//!                                 ╱       ╲
//!                      InMemoryStore     SqliteMemoryStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use sqlite::SqliteMemoryStore;
pub use store::{InMemoryStore, MemoryStore};
pub use types::{
    search_terms, MemoryCategory, MemoryFilter, MemoryLink, MemoryRecord, RecordId,
    SecurityLevel,
};
