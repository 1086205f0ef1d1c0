//! Profile Loading Module
//!
//! Resolves the authorization profile for a user with bounded retries,
//! per-attempt timeouts, auto-provisioning and a degraded fallback.

pub mod loader;
pub mod outcome;

pub use loader::ProfileLoader;
pub use outcome::{DegradedReason, LoadOutcome, LoadResult};
