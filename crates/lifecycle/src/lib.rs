//! # Hangar Lifecycle
//!
//! Bookkeeping for deployed artifacts.
//!
//! ## Components
//!
//! - `ArtifactStatus` - The per-artifact state machine
//! - `ArtifactRegistry` - Known artifacts of one kind, in registration order
//! - `ZombieTracker` - Failed artifacts and the inputs that made them fail
//! - `ResourceTimestamps` - Modification times of the files an artifact is built from

pub mod registry;
pub mod status;
pub mod timestamps;
pub mod zombie;

pub use registry::{ArtifactRegistry, RegistryEntry};
pub use status::ArtifactStatus;
pub use timestamps::ResourceTimestamps;
pub use zombie::{ZombieEntry, ZombieTracker};
