//! # Hangar Deployment
//!
//! Brings artifacts found on disk to a running state and keeps them in
//! sync with the filesystem.
//!
//! ## Components
//!
//! - `ArchiveInstaller` - Expands packages, manages anchor files
//! - `ArtifactFactory` - Descriptor + isolation graph -> `DeployableArtifact`
//! - `ArchiveDeployer` - Deploy/undeploy/redeploy of one artifact kind, zombie tracking
//! - `DeploymentService` - Serializes every operation behind the deployment lock
//! - `DirectoryWatcher` - Polling reconciliation loop

pub mod archive;
pub mod artifact;
pub mod deployer;
pub mod engine;
pub mod factory;
pub mod service;
pub mod watcher;

pub use archive::{pack_directory, ArchiveInstaller};
pub use artifact::DeployableArtifact;
pub use deployer::ArchiveDeployer;
pub use engine::{ArtifactEngine, NullArtifactEngine};
pub use factory::ArtifactFactory;
pub use service::{DeploymentService, DeploymentServiceBuilder};
pub use watcher::DirectoryWatcher;

#[cfg(test)]
pub(crate) mod testing;
