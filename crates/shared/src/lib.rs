//! # Hangar Shared
//!
//! Common types used across all Hangar crates: bundle coordinates,
//! artifact descriptors, the error taxonomy, deployment configuration and
//! the deployment listener protocol.

pub mod config;
pub mod coordinate;
pub mod descriptor;
pub mod error;
pub mod listener;
pub mod properties;

// Re-exports
pub use config::*;
pub use coordinate::*;
pub use descriptor::*;
pub use error::*;
pub use listener::*;
pub use properties::*;
