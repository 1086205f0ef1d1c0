//! In-memory collaborators
//!
//! Process-local implementations of the profile store and identity provider,
//! with scripted faults and delays. Used by tests and the CLI simulator.

pub mod source;
pub mod store;

pub use source::MemorySessionSource;
pub use store::{MemoryProfileStore, StoreFault};
