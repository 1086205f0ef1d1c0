//! Stockroom Core - Data model, collaborator traits and shared infrastructure
//!
//! This crate defines the types exchanged between the session subsystem and its
//! external collaborators (identity provider and profile store), together with
//! the error, logging, configuration and retry utilities used across Stockroom.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
