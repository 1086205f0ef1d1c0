//! Authorization Module
//!
//! Derives role predicates and feature visibility from the cached profile.
//! Every decision is fail-closed: no profile, or a degraded one, grants no role.

pub mod features;
pub mod gate;

pub use features::{Feature, FeatureRule, FEATURE_TABLE};
pub use gate::AuthorizationGate;
