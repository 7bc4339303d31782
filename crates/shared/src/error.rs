//! Error types for Hangar

use std::path::PathBuf;
use thiserror::Error;

/// A declared dependency coordinate could not be resolved
#[derive(Debug, Clone, Error)]
#[error("Artifact '{artifact}' declares dependency '{dependency}' which cannot be resolved: {reason}")]
pub struct MissingDependencyError {
    pub artifact: String,
    pub dependency: String,
    pub reason: String,
}

/// Two parties disagree on the version of the same bundle
#[derive(Debug, Clone, Error)]
#[error("Incompatible version of '{dependency}' for '{artifact}': requires '{required}' but context provides '{found}'")]
pub struct VersionMismatchError {
    pub artifact: String,
    pub dependency: String,
    pub required: String,
    pub found: String,
}

/// A symbol (package, class or resource) is not visible from a node
#[derive(Debug, Clone, Error)]
#[error("Symbol '{symbol}' is not visible from '{node}': {reason}")]
pub struct SymbolNotVisibleError {
    pub node: String,
    pub symbol: String,
    pub reason: String,
}

/// The descriptor of an artifact cannot be read or is invalid
#[derive(Debug, Clone, Error)]
#[error("Malformed descriptor at '{}': {reason}", location.display())]
pub struct DescriptorMalformedError {
    pub location: PathBuf,
    pub reason: String,
}

/// General deployment error type
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    MissingDependency(#[from] MissingDependencyError),

    #[error(transparent)]
    VersionMismatch(#[from] VersionMismatchError),

    #[error("Unresolvable dependency graph for '{artifact}': {reason}")]
    UnresolvableLoader { artifact: String, reason: String },

    #[error(transparent)]
    DescriptorMalformed(#[from] DescriptorMalformedError),

    #[error(transparent)]
    SymbolNotVisible(#[from] SymbolNotVisibleError),

    #[error("Artifact '{artifact}' cannot move from {from} to {to}")]
    InvalidTransition {
        artifact: String,
        from: String,
        to: String,
    },

    #[error("Lifecycle callback '{phase}' of '{artifact}' failed: {reason}")]
    LifecycleCallback {
        artifact: String,
        phase: String,
        reason: String,
    },

    #[error("Artifact '{0}' not found")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DeploymentError {
    /// Whether a failure with this error should leave a zombie entry
    pub fn is_zombie_worthy(&self) -> bool {
        !matches!(
            self,
            DeploymentError::NotFound(_) | DeploymentError::InvalidTransition { .. }
        )
    }
}

/// Error raised when attaching a policy to an application
#[derive(Debug, Error)]
pub enum PolicyRegistrationError {
    #[error(transparent)]
    VersionMismatch(#[from] VersionMismatchError),

    #[error("Policy '{policy_id}' is already applied to application '{application}'")]
    DuplicatePolicy {
        application: String,
        policy_id: String,
    },

    #[error("Policy template '{template}' cannot be registered: {source}")]
    Template {
        template: String,
        #[source]
        source: Box<DeploymentError>,
    },

    #[error("Application '{0}' is not started")]
    ApplicationNotStarted(String),
}

pub type Result<T> = std::result::Result<T, DeploymentError>;
